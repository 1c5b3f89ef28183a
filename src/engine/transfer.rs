//! Two-leg processing of confirmed transfer links.
//!
//! The source leg disposes lots (the asset leaves the source pool) and
//! records lot transfers carrying the basis across the link; the target leg
//! consumes those transfers to open a new lot with inherited cost basis.
//! Source legs must be processed before their target legs.

use crate::domain::{
    AcquisitionLot, AssetSymbol, CostBasisMethod, Decimal, LotDisposal, LotTransfer,
    LotTransferMetadata, Transaction, TransactionLink, TxId,
};
use crate::engine::strategy::{CostBasisStrategy, DisposalRequest, LotEngineError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// How a jurisdiction treats the network/platform fee of a same-asset
/// transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferFeePolicy {
    /// The fee quantity is its own zero-proceeds disposal.
    Disposal,
    /// The full gross amount is disposed and the fee's value rides along in
    /// the transferred basis.
    AddToBasis,
}

impl FromStr for TransferFeePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disposal" => Ok(TransferFeePolicy::Disposal),
            "add-to-basis" => Ok(TransferFeePolicy::AddToBasis),
            other => Err(format!("unknown transfer fee policy: {}", other)),
        }
    }
}

/// Warn/error variance thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarianceThresholds {
    pub warn: Decimal,
    pub error: Decimal,
}

/// Per-source variance tolerance table with a global default.
///
/// Sources are looked up case-insensitively; exchanges with noisier fee
/// reporting get looser thresholds.
#[derive(Debug, Clone)]
pub struct VarianceTolerances {
    default: VarianceThresholds,
    by_source: HashMap<String, VarianceThresholds>,
}

impl VarianceTolerances {
    pub fn new(default: VarianceThresholds) -> Self {
        VarianceTolerances {
            default,
            by_source: HashMap::new(),
        }
    }

    /// Built-in table: a 1%/5% global default, looser for binance, tighter
    /// for kraken.
    pub fn builtin() -> Self {
        let pct = |s: &str| Decimal::from_str(s).expect("valid decimal");
        VarianceTolerances::new(VarianceThresholds {
            warn: pct("1"),
            error: pct("5"),
        })
        .with_source(
            "binance",
            VarianceThresholds {
                warn: pct("2"),
                error: pct("10"),
            },
        )
        .with_source(
            "kraken",
            VarianceThresholds {
                warn: pct("0.5"),
                error: pct("3"),
            },
        )
    }

    pub fn with_source(mut self, source: &str, thresholds: VarianceThresholds) -> Self {
        self.by_source.insert(source.to_lowercase(), thresholds);
        self
    }

    pub fn for_source(&self, source: &str) -> VarianceThresholds {
        self.by_source
            .get(&source.to_lowercase())
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for VarianceTolerances {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Non-blocking findings collected during transfer processing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum TransferWarning {
    /// Expected and actual transfer amounts diverge past the warn level.
    Variance {
        link_id: Uuid,
        expected: Decimal,
        actual: Decimal,
        variance_pct: Decimal,
    },
    /// A fiat fee had no price; its contribution to basis was skipped.
    MissingPrice {
        transaction_id: TxId,
        asset_symbol: AssetSymbol,
        amount: Decimal,
    },
}

/// A transfer leg that cannot be processed correctly.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(
        "net amount of transaction {transaction_id} off by {variance_pct}% from gross minus fees \
         (threshold {threshold}%)"
    )]
    NetAmountMismatch {
        transaction_id: TxId,
        variance_pct: Decimal,
        threshold: Decimal,
    },
    #[error(
        "no lot transfers exist for link {0}; source transaction should have been processed first"
    )]
    SourceNotProcessed(Uuid),
    #[error("received quantity for link {0} must be positive")]
    NonPositiveReceived(Uuid),
    #[error(transparent)]
    Lot(#[from] LotEngineError),
}

/// Inputs for the source leg of a transfer.
pub struct TransferSourceRequest<'a> {
    pub link: &'a TransactionLink,
    pub source_tx: &'a Transaction,
    /// Full lot pool; only this asset's open lots are consumed.
    pub lots: &'a [AcquisitionLot],
    /// Set for UTXO partial-outflow adjustments, where the fee is already
    /// folded into the amount and must not be extracted again.
    pub effective_amount: Option<Decimal>,
    pub fee_policy: TransferFeePolicy,
}

/// Everything the source leg produced.
#[derive(Debug)]
pub struct TransferSourceOutcome {
    pub disposals: Vec<LotDisposal>,
    pub transfers: Vec<LotTransfer>,
    /// The full lot pool with consumed quantities applied.
    pub updated_lots: Vec<AcquisitionLot>,
    pub warnings: Vec<TransferWarning>,
}

/// Apply disposals to a lot pool, returning a new pool.
///
/// Remaining quantities decrease and statuses are recomputed; the input is
/// untouched.
pub fn apply_disposals(
    lots: &[AcquisitionLot],
    disposals: &[LotDisposal],
) -> Vec<AcquisitionLot> {
    let mut consumed: HashMap<Uuid, Decimal> = HashMap::new();
    for disposal in disposals {
        *consumed.entry(disposal.lot_id).or_insert_with(Decimal::zero) +=
            disposal.quantity_disposed;
    }

    lots.iter()
        .map(|lot| match consumed.get(&lot.id) {
            Some(quantity) => lot.with_remaining(lot.remaining_quantity - *quantity),
            None => lot.clone(),
        })
        .collect()
}

fn variance_pct(expected: Decimal, actual: Decimal) -> Decimal {
    (expected - actual)
        .abs()
        .checked_div(expected.abs())
        .map(|ratio| ratio * Decimal::hundred())
        .unwrap_or_else(Decimal::zero)
}

/// Sum of fee movements in the transferred asset.
fn crypto_fee_amount(tx: &Transaction, link: &TransactionLink) -> Decimal {
    tx.fees
        .iter()
        .filter(|fee| fee.asset_id == link.asset_id)
        .map(|fee| fee.effective_amount())
        .sum()
}

/// USD value of the crypto fee, when a USD price is attached.
fn crypto_fee_usd_value(tx: &Transaction, link: &TransactionLink) -> Option<Decimal> {
    let mut total = Decimal::zero();
    let mut any = false;
    for fee in &tx.fees {
        if fee.asset_id != link.asset_id {
            continue;
        }
        let price = fee.price_at_tx_time.as_ref()?;
        if !price.currency.is_usd() {
            return None;
        }
        total += fee.effective_amount() * price.amount;
        any = true;
    }
    any.then_some(total)
}

/// Process the source leg of a confirmed link.
///
/// Disposes the policy-determined quantity from open lots and records lot
/// transfers proportionally allocating the net transferred quantity over
/// the disposed slices, preserving the disposed basis in the transfer.
pub fn process_transfer_source(
    request: &TransferSourceRequest<'_>,
    strategy: &dyn CostBasisStrategy,
    tolerances: &VarianceTolerances,
) -> Result<TransferSourceOutcome, TransferError> {
    let link = request.link;
    let source_tx = request.source_tx;
    let thresholds = tolerances.for_source(&source_tx.source_name);
    let mut warnings = Vec::new();

    let gross = link.source_amount;
    let (fee, net) = match request.effective_amount {
        // Fee already baked into the adjusted amount.
        Some(effective) => (Decimal::zero(), effective),
        None => {
            let fee = crypto_fee_amount(source_tx, link);
            (fee, gross - fee)
        }
    };

    // Reconcile the reported net amount with gross minus extracted fees.
    if request.effective_amount.is_none() {
        let reported_net: Option<Decimal> = source_tx
            .outflows
            .iter()
            .find(|m| m.asset_id == link.asset_id)
            .and_then(|m| m.net_amount);
        if let Some(reported) = reported_net {
            let pct = variance_pct(net, reported);
            if pct > thresholds.error {
                return Err(TransferError::NetAmountMismatch {
                    transaction_id: source_tx.id.clone(),
                    variance_pct: pct,
                    threshold: thresholds.error,
                });
            }
            if pct > thresholds.warn {
                warnings.push(TransferWarning::Variance {
                    link_id: link.id,
                    expected: net,
                    actual: reported,
                    variance_pct: pct,
                });
            }
        }
    }

    // The recorded target amount should agree with what left after fees.
    let target_variance = variance_pct(net, link.target_amount);
    if target_variance > thresholds.warn {
        warnings.push(TransferWarning::Variance {
            link_id: link.id,
            expected: net,
            actual: link.target_amount,
            variance_pct: target_variance,
        });
    }

    let disposal_quantity = match request.fee_policy {
        TransferFeePolicy::AddToBasis => gross,
        TransferFeePolicy::Disposal => net,
    };

    let main_request = DisposalRequest {
        asset_id: link.asset_id.clone(),
        asset_symbol: link.asset_symbol.clone(),
        quantity: disposal_quantity,
        date: source_tx.time_ms,
        // A transfer is not a sale; the asset keeps moving at its basis.
        proceeds_per_unit: Decimal::zero(),
        transaction_id: source_tx.id.clone(),
    };
    let main_disposals = strategy.match_disposal(&main_request, request.lots)?;
    let mut working_lots = apply_disposals(request.lots, &main_disposals);

    let mut all_disposals = main_disposals.clone();
    if request.fee_policy == TransferFeePolicy::Disposal && fee.is_positive() {
        let fee_request = DisposalRequest {
            quantity: fee,
            ..main_request.clone()
        };
        let fee_disposals = strategy.match_disposal(&fee_request, &working_lots)?;
        working_lots = apply_disposals(&working_lots, &fee_disposals);
        all_disposals.extend(fee_disposals);
    }

    let total_disposed: Decimal = main_disposals.iter().map(|d| d.quantity_disposed).sum();
    let fee_usd = match request.fee_policy {
        TransferFeePolicy::AddToBasis if fee.is_positive() => {
            crypto_fee_usd_value(source_tx, link)
        }
        _ => None,
    };

    let mut transfers = Vec::with_capacity(main_disposals.len());
    for disposal in &main_disposals {
        let quantity_transferred = match (disposal.quantity_disposed * net)
            .checked_div(total_disposed)
        {
            Some(q) => q,
            None => continue,
        };
        if !quantity_transferred.is_positive() {
            continue;
        }
        // Basis of the whole disposed slice rides on the transferred
        // quantity, so a fee folded into the disposal inflates the unit
        // basis instead of vanishing.
        let basis_per_unit = (disposal.quantity_disposed * disposal.cost_basis_per_unit)
            / quantity_transferred;

        let metadata = fee_usd.map(|value| LotTransferMetadata {
            crypto_fee_usd_value: (value * quantity_transferred).checked_div(net),
        });

        transfers.push(LotTransfer {
            source_lot_id: disposal.lot_id,
            quantity_transferred,
            cost_basis_per_unit: basis_per_unit,
            link_id: link.id,
            source_transaction_id: link.source_transaction_id.clone(),
            target_transaction_id: link.target_transaction_id.clone(),
            metadata,
            transfer_date: source_tx.time_ms,
        });
    }

    Ok(TransferSourceOutcome {
        disposals: all_disposals,
        transfers,
        updated_lots: working_lots,
        warnings,
    })
}

/// Inputs for the target leg of a transfer.
pub struct TransferTargetRequest<'a> {
    pub link: &'a TransactionLink,
    pub source_tx: &'a Transaction,
    pub target_tx: &'a Transaction,
    /// Lot transfers already recorded for this calculation run.
    pub transfers: &'a [LotTransfer],
    pub calculation_id: Uuid,
    pub method: CostBasisMethod,
}

/// The target leg's product: one new lot plus any warnings.
#[derive(Debug)]
pub struct TransferTargetOutcome {
    pub lot: AcquisitionLot,
    pub warnings: Vec<TransferWarning>,
}

/// Process the target leg of a confirmed link.
///
/// Inherits cost basis from the link's lot transfers, adds priced fiat
/// fees from either leg, and opens a new lot for the received quantity.
pub fn process_transfer_target(
    request: &TransferTargetRequest<'_>,
    tolerances: &VarianceTolerances,
) -> Result<TransferTargetOutcome, TransferError> {
    let link = request.link;
    let mut warnings = Vec::new();

    let link_transfers: Vec<&LotTransfer> = request
        .transfers
        .iter()
        .filter(|t| t.link_id == link.id)
        .collect();
    if link_transfers.is_empty() {
        return Err(TransferError::SourceNotProcessed(link.id));
    }

    let transferred_quantity: Decimal = link_transfers
        .iter()
        .map(|t| t.quantity_transferred)
        .sum();
    let mut inherited_basis: Decimal = link_transfers
        .iter()
        .map(|t| t.quantity_transferred * t.cost_basis_per_unit)
        .sum();

    let received = request
        .target_tx
        .inflows
        .iter()
        .find(|m| m.asset_id == link.asset_id)
        .map(|m| m.effective_amount())
        .unwrap_or(link.target_amount);
    if !received.is_positive() {
        return Err(TransferError::NonPositiveReceived(link.id));
    }

    let thresholds = tolerances.for_source(&request.target_tx.source_name);
    let pct = variance_pct(transferred_quantity, received);
    if pct > thresholds.warn {
        warnings.push(TransferWarning::Variance {
            link_id: link.id,
            expected: transferred_quantity,
            actual: received,
            variance_pct: pct,
        });
    }

    // Fiat fees on either leg join the basis when their price is known.
    for tx in [request.source_tx, request.target_tx] {
        for fee in &tx.fees {
            if !fee.asset_symbol.is_fiat() {
                continue;
            }
            let usd_value = fee.price_at_tx_time.as_ref().and_then(|price| {
                price
                    .currency
                    .is_usd()
                    .then(|| fee.effective_amount() * price.amount)
            });
            match usd_value {
                Some(value) => inherited_basis += value,
                None => warnings.push(TransferWarning::MissingPrice {
                    transaction_id: tx.id.clone(),
                    asset_symbol: fee.asset_symbol.clone(),
                    amount: fee.effective_amount(),
                }),
            }
        }
    }

    let cost_basis_per_unit = inherited_basis
        .checked_div(received)
        .unwrap_or_else(Decimal::zero);

    let lot = AcquisitionLot::new(
        request.calculation_id,
        request.target_tx.id.clone(),
        link.asset_id.clone(),
        link.asset_symbol.clone(),
        received,
        cost_basis_per_unit,
        request.target_tx.time_ms,
        request.method,
    );

    Ok(TransferTargetOutcome { lot, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AssetId, AssetMovement, LinkMetadata, LinkStatus, LinkType, LotStatus, MatchCriteria,
        PriceAtTxTime, PriceSource, SourceType, TimeMs,
    };
    use crate::engine::strategy::FifoStrategy;
    use chrono::Utc;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn link(source_amount: &str, target_amount: &str) -> TransactionLink {
        let now = Utc::now();
        TransactionLink {
            id: Uuid::new_v4(),
            source_transaction_id: TxId::new("w-1"),
            target_transaction_id: TxId::new("d-1"),
            asset_id: AssetId::new("bitcoin"),
            asset_symbol: AssetSymbol::new("BTC"),
            source_amount: d(source_amount),
            target_amount: d(target_amount),
            link_type: LinkType::ExchangeToBlockchain,
            confidence_score: d("1"),
            match_criteria: MatchCriteria {
                asset_match: true,
                amount_similarity: d("1"),
                timing_valid: true,
                timing_hours: 0.1,
                address_match: None,
                hash_match: Some(true),
            },
            status: LinkStatus::Confirmed,
            reviewed_by: None,
            reviewed_at: None,
            metadata: LinkMetadata {
                variance: Decimal::zero(),
                variance_pct: Decimal::zero(),
                implied_fee: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn btc_fee(amount: &str, priced_usd: Option<&str>) -> AssetMovement {
        let movement = AssetMovement::new(
            AssetId::new("bitcoin"),
            AssetSymbol::new("BTC"),
            d(amount),
        );
        match priced_usd {
            Some(price) => movement.with_price(PriceAtTxTime::execution(
                d(price),
                AssetSymbol::new("USD"),
                PriceSource::LinkPropagated,
            )),
            None => movement,
        }
    }

    fn source_tx(fees: Vec<AssetMovement>) -> Transaction {
        Transaction {
            id: TxId::new("w-1"),
            external_id: None,
            source_name: "kraken".to_string(),
            source_type: SourceType::Exchange,
            time_ms: TimeMs::new(1_700_000_000_000),
            tx_hash: None,
            inflows: vec![],
            outflows: vec![AssetMovement::new(
                AssetId::new("bitcoin"),
                AssetSymbol::new("BTC"),
                d("1"),
            )],
            fees,
        }
    }

    fn target_tx(received: &str, fees: Vec<AssetMovement>) -> Transaction {
        Transaction {
            id: TxId::new("d-1"),
            external_id: None,
            source_name: "bitcoin".to_string(),
            source_type: SourceType::Blockchain,
            time_ms: TimeMs::new(1_700_000_600_000),
            tx_hash: Some("abc".to_string()),
            inflows: vec![AssetMovement::new(
                AssetId::new("bitcoin"),
                AssetSymbol::new("BTC"),
                d(received),
            )],
            outflows: vec![],
            fees,
        }
    }

    fn open_lot(quantity: &str, basis: &str, date_ms: i64) -> AcquisitionLot {
        AcquisitionLot::new(
            Uuid::new_v4(),
            TxId::new("acq-tx"),
            AssetId::new("bitcoin"),
            AssetSymbol::new("BTC"),
            d(quantity),
            d(basis),
            TimeMs::new(date_ms),
            CostBasisMethod::Fifo,
        )
    }

    #[test]
    fn test_add_to_basis_disposes_gross() {
        // 1 BTC out with 0.001 BTC fee: the full 1 BTC leaves the pool and
        // 0.999 is transferred carrying the whole basis.
        let link = link("1", "0.999");
        let tx = source_tx(vec![btc_fee("0.001", Some("30000"))]);
        let lots = vec![open_lot("2", "30000", 1_690_000_000_000)];

        let request = TransferSourceRequest {
            link: &link,
            source_tx: &tx,
            lots: &lots,
            effective_amount: None,
            fee_policy: TransferFeePolicy::AddToBasis,
        };
        let outcome =
            process_transfer_source(&request, &FifoStrategy, &VarianceTolerances::builtin())
                .unwrap();

        let disposed: Decimal = outcome.disposals.iter().map(|l| l.quantity_disposed).sum();
        assert_eq!(disposed, d("1"));

        assert_eq!(outcome.transfers.len(), 1);
        let transfer = &outcome.transfers[0];
        assert_eq!(transfer.quantity_transferred, d("0.999"));
        // Basis preserved: 1 * 30000 spread over 0.999 transferred.
        assert_eq!(
            transfer.quantity_transferred * transfer.cost_basis_per_unit,
            d("30000")
        );
        // Fee USD value recorded: 0.001 * 30000 = 30.
        assert_eq!(
            transfer.metadata.as_ref().unwrap().crypto_fee_usd_value,
            Some(d("30"))
        );

        let updated = &outcome.updated_lots[0];
        assert_eq!(updated.remaining_quantity, d("1"));
        assert_eq!(updated.status, LotStatus::PartiallyDisposed);
    }

    #[test]
    fn test_disposal_policy_splits_fee_disposal() {
        let link = link("1", "0.999");
        let tx = source_tx(vec![btc_fee("0.001", None)]);
        let lots = vec![open_lot("2", "30000", 1_690_000_000_000)];

        let request = TransferSourceRequest {
            link: &link,
            source_tx: &tx,
            lots: &lots,
            effective_amount: None,
            fee_policy: TransferFeePolicy::Disposal,
        };
        let outcome =
            process_transfer_source(&request, &FifoStrategy, &VarianceTolerances::builtin())
                .unwrap();

        // 0.999 transfer disposal + 0.001 fee disposal.
        assert_eq!(outcome.disposals.len(), 2);
        let disposed: Decimal = outcome.disposals.iter().map(|l| l.quantity_disposed).sum();
        assert_eq!(disposed, d("1"));
        assert!(outcome
            .disposals
            .iter()
            .all(|l| l.proceeds_per_unit.is_zero()));

        let transfer = &outcome.transfers[0];
        assert_eq!(transfer.quantity_transferred, d("0.999"));
        // No fee folding: transferred basis is the plain lot basis.
        assert_eq!(transfer.cost_basis_per_unit, d("30000"));
        assert!(transfer.metadata.is_none());

        assert_eq!(outcome.updated_lots[0].remaining_quantity, d("1"));
    }

    #[test]
    fn test_effective_amount_skips_fee_extraction() {
        let link = link("0.5995", "0.5995");
        // Fees present on the row, but the adjusted amount already folded
        // them in.
        let tx = source_tx(vec![btc_fee("0.0005", None)]);
        let lots = vec![open_lot("2", "30000", 1_690_000_000_000)];

        let request = TransferSourceRequest {
            link: &link,
            source_tx: &tx,
            lots: &lots,
            effective_amount: Some(d("0.5995")),
            fee_policy: TransferFeePolicy::Disposal,
        };
        let outcome =
            process_transfer_source(&request, &FifoStrategy, &VarianceTolerances::builtin())
                .unwrap();

        let disposed: Decimal = outcome.disposals.iter().map(|l| l.quantity_disposed).sum();
        assert_eq!(disposed, d("0.5995"));
        assert_eq!(outcome.transfers[0].quantity_transferred, d("0.5995"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_variance_warning_emitted_not_blocking() {
        // Net 0.999 vs recorded target 0.98: ~1.9% off, above kraken's
        // 0.5% warn but below its 3% error.
        let link = link("1", "0.98");
        let tx = source_tx(vec![btc_fee("0.001", None)]);
        let lots = vec![open_lot("2", "30000", 1_690_000_000_000)];

        let request = TransferSourceRequest {
            link: &link,
            source_tx: &tx,
            lots: &lots,
            effective_amount: None,
            fee_policy: TransferFeePolicy::AddToBasis,
        };
        let outcome =
            process_transfer_source(&request, &FifoStrategy, &VarianceTolerances::builtin())
                .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(
            outcome.warnings[0],
            TransferWarning::Variance { .. }
        ));
    }

    #[test]
    fn test_net_reconciliation_error_blocks() {
        let link = link("1", "0.999");
        let mut tx = source_tx(vec![btc_fee("0.001", None)]);
        // Reported net wildly off from gross minus fee.
        tx.outflows[0].net_amount = Some(d("0.8"));
        let lots = vec![open_lot("2", "30000", 1_690_000_000_000)];

        let request = TransferSourceRequest {
            link: &link,
            source_tx: &tx,
            lots: &lots,
            effective_amount: None,
            fee_policy: TransferFeePolicy::AddToBasis,
        };
        let err =
            process_transfer_source(&request, &FifoStrategy, &VarianceTolerances::builtin())
                .unwrap_err();
        assert!(matches!(err, TransferError::NetAmountMismatch { .. }));
    }

    #[test]
    fn test_transfer_spans_multiple_lots() {
        let link = link("1.5", "1.499");
        let tx = source_tx(vec![btc_fee("0.001", None)]);
        let lot_a = open_lot("1", "30000", 1_690_000_000_000);
        let lot_b = open_lot("0.5", "35000", 1_695_000_000_000);
        let lots = vec![lot_a.clone(), lot_b.clone()];

        let request = TransferSourceRequest {
            link: &link,
            source_tx: &tx,
            lots: &lots,
            effective_amount: None,
            fee_policy: TransferFeePolicy::Disposal,
        };
        let outcome =
            process_transfer_source(&request, &FifoStrategy, &VarianceTolerances::builtin())
                .unwrap();

        // 1.499 transfer + 0.001 fee consume both lots completely.
        let total_transferred: Decimal = outcome
            .transfers
            .iter()
            .map(|t| t.quantity_transferred)
            .sum();
        assert_eq!(total_transferred, d("1.499"));
        assert!(outcome
            .updated_lots
            .iter()
            .all(|lot| lot.status == LotStatus::FullyDisposed));
    }

    #[test]
    fn test_target_requires_source_first() {
        let link = link("1", "0.999");
        let source = source_tx(vec![]);
        let target = target_tx("0.999", vec![]);

        let request = TransferTargetRequest {
            link: &link,
            source_tx: &source,
            target_tx: &target,
            transfers: &[],
            calculation_id: Uuid::new_v4(),
            method: CostBasisMethod::Fifo,
        };
        let err = process_transfer_target(&request, &VarianceTolerances::builtin()).unwrap_err();
        assert!(matches!(err, TransferError::SourceNotProcessed(_)));
        assert!(err
            .to_string()
            .contains("source transaction should have been processed first"));
    }

    #[test]
    fn test_target_inherits_basis() {
        let link = link("1", "0.999");
        let source = source_tx(vec![]);
        let target = target_tx("0.999", vec![]);

        let transfers = vec![LotTransfer {
            source_lot_id: Uuid::new_v4(),
            quantity_transferred: d("0.999"),
            cost_basis_per_unit: d("30030.03003003003003003003"),
            link_id: link.id,
            source_transaction_id: link.source_transaction_id.clone(),
            target_transaction_id: link.target_transaction_id.clone(),
            metadata: None,
            transfer_date: TimeMs::new(1_700_000_000_000),
        }];

        let calculation_id = Uuid::new_v4();
        let request = TransferTargetRequest {
            link: &link,
            source_tx: &source,
            target_tx: &target,
            transfers: &transfers,
            calculation_id,
            method: CostBasisMethod::Fifo,
        };
        let outcome = process_transfer_target(&request, &VarianceTolerances::builtin()).unwrap();

        let lot = &outcome.lot;
        assert_eq!(lot.calculation_id, calculation_id);
        assert_eq!(lot.quantity, d("0.999"));
        assert_eq!(lot.status, LotStatus::Open);
        assert_eq!(lot.method, CostBasisMethod::Fifo);
        // Inherited basis spread over the received quantity.
        let total = lot.quantity * lot.cost_basis_per_unit;
        assert!((total - d("30000")).abs() < d("0.0001"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_target_adds_priced_fiat_fees() {
        let link = link("1", "1");
        let mut source = source_tx(vec![]);
        source.fees.push(
            AssetMovement::new(AssetId::new("usd"), AssetSymbol::new("USD"), d("10"))
                .with_price(PriceAtTxTime::fiat_identity(AssetSymbol::new("USD"))),
        );
        let target = target_tx("1", vec![]);

        let transfers = vec![LotTransfer {
            source_lot_id: Uuid::new_v4(),
            quantity_transferred: d("1"),
            cost_basis_per_unit: d("30000"),
            link_id: link.id,
            source_transaction_id: link.source_transaction_id.clone(),
            target_transaction_id: link.target_transaction_id.clone(),
            metadata: None,
            transfer_date: TimeMs::new(1_700_000_000_000),
        }];

        let request = TransferTargetRequest {
            link: &link,
            source_tx: &source,
            target_tx: &target,
            transfers: &transfers,
            calculation_id: Uuid::new_v4(),
            method: CostBasisMethod::Fifo,
        };
        let outcome = process_transfer_target(&request, &VarianceTolerances::builtin()).unwrap();
        assert_eq!(outcome.lot.cost_basis_per_unit, d("30010"));
    }

    #[test]
    fn test_target_unpriced_fiat_fee_warns_and_excludes() {
        let link = link("1", "1");
        let source = source_tx(vec![]);
        let target = target_tx(
            "1",
            vec![AssetMovement::new(
                AssetId::new("eur"),
                AssetSymbol::new("EUR"),
                d("5"),
            )],
        );

        let transfers = vec![LotTransfer {
            source_lot_id: Uuid::new_v4(),
            quantity_transferred: d("1"),
            cost_basis_per_unit: d("30000"),
            link_id: link.id,
            source_transaction_id: link.source_transaction_id.clone(),
            target_transaction_id: link.target_transaction_id.clone(),
            metadata: None,
            transfer_date: TimeMs::new(1_700_000_000_000),
        }];

        let request = TransferTargetRequest {
            link: &link,
            source_tx: &source,
            target_tx: &target,
            transfers: &transfers,
            calculation_id: Uuid::new_v4(),
            method: CostBasisMethod::Fifo,
        };
        let outcome = process_transfer_target(&request, &VarianceTolerances::builtin()).unwrap();

        assert_eq!(outcome.lot.cost_basis_per_unit, d("30000"));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(
            outcome.warnings[0],
            TransferWarning::MissingPrice { .. }
        ));
    }

    #[test]
    fn test_tolerances_case_insensitive_lookup() {
        let tolerances = VarianceTolerances::builtin();
        let kraken = tolerances.for_source("Kraken");
        assert_eq!(kraken.warn, d("0.5"));
        let binance = tolerances.for_source("BINANCE");
        assert_eq!(binance.warn, d("2"));
        let unknown = tolerances.for_source("unknown-exchange");
        assert_eq!(unknown.warn, d("1"));
    }
}
