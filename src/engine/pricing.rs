//! Multi-pass price inference over asset movements.
//!
//! Passes run strictly in sequence, each over the previous pass's output,
//! so later passes can safely upgrade lower-confidence prices. Every pass
//! builds new transactions instead of mutating its input and reports which
//! transaction ids it touched, so callers persist only deltas.

use crate::domain::{
    AssetMovement, Decimal, LinkStatus, PriceAtTxTime, PriceSource, Transaction, TransactionLink,
    TxId,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Result of one pass (or the whole pipeline): the transformed
/// transactions plus the ids whose movements changed.
#[derive(Debug)]
pub struct PricingOutcome {
    pub transactions: Vec<Transaction>,
    pub modified_ids: HashSet<TxId>,
}

fn can_replace(existing: Option<&PriceAtTxTime>, incoming: PriceSource) -> bool {
    match existing {
        None => true,
        Some(price) => price.source.priority() < incoming.priority(),
    }
}

/// Ratio-derived unit price of `priced_for` implied by the opposite leg.
///
/// `price(inflow) = price(outflow) × outflowAmount / inflowAmount`.
fn ratio_price(
    outflow_price: &PriceAtTxTime,
    outflow_amount: Decimal,
    inflow_amount: Decimal,
    source: PriceSource,
) -> Option<PriceAtTxTime> {
    let implied = (outflow_price.amount * outflow_amount).checked_div(inflow_amount)?;
    Some(PriceAtTxTime::execution(
        implied,
        outflow_price.currency.clone(),
        source,
    ))
}

fn is_simple_trade(tx: &Transaction) -> bool {
    tx.inflows.len() == 1 && tx.outflows.len() == 1
}

/// Pass 0 — execution prices from fiat trades.
///
/// For a one-in/one-out trade with exactly one fiat side, the crypto leg's
/// price is the trade ratio: USD trades are authoritative
/// (`exchange-execution`), other fiat awaits FX normalization
/// (`fiat-execution-tentative`). Any remaining fiat-denominated movement
/// without a price gets the identity price of its own currency.
pub fn apply_execution_prices(txs: &[Transaction]) -> PricingOutcome {
    let mut out = Vec::with_capacity(txs.len());
    let mut modified_ids = HashSet::new();

    for tx in txs {
        let mut tx = tx.clone();
        let mut modified = false;

        if is_simple_trade(&tx) {
            let inflow_fiat = tx.inflows[0].asset_symbol.is_fiat();
            let outflow_fiat = tx.outflows[0].asset_symbol.is_fiat();

            if outflow_fiat && !inflow_fiat {
                // Buy: the fiat outflow prices the crypto inflow.
                let fiat = &tx.outflows[0];
                let source = if fiat.asset_symbol.is_usd() {
                    PriceSource::ExchangeExecution
                } else {
                    PriceSource::FiatExecutionTentative
                };
                if can_replace(tx.inflows[0].price_at_tx_time.as_ref(), source) {
                    if let Some(unit) = fiat
                        .effective_amount()
                        .checked_div(tx.inflows[0].effective_amount())
                    {
                        tx.inflows[0].price_at_tx_time = Some(PriceAtTxTime::execution(
                            unit,
                            fiat.asset_symbol.clone(),
                            source,
                        ));
                        modified = true;
                    }
                }
            } else if inflow_fiat && !outflow_fiat {
                // Sell: the fiat inflow prices the crypto outflow.
                let fiat = &tx.inflows[0];
                let source = if fiat.asset_symbol.is_usd() {
                    PriceSource::ExchangeExecution
                } else {
                    PriceSource::FiatExecutionTentative
                };
                if can_replace(tx.outflows[0].price_at_tx_time.as_ref(), source) {
                    if let Some(unit) = fiat
                        .effective_amount()
                        .checked_div(tx.outflows[0].effective_amount())
                    {
                        tx.outflows[0].price_at_tx_time = Some(PriceAtTxTime::execution(
                            unit,
                            fiat.asset_symbol.clone(),
                            source,
                        ));
                        modified = true;
                    }
                }
            }
        }

        // Identity prices for fiat movements still lacking one.
        for movement in tx
            .inflows
            .iter_mut()
            .chain(tx.outflows.iter_mut())
            .chain(tx.fees.iter_mut())
        {
            if movement.asset_symbol.is_fiat() && movement.is_unpriced() {
                movement.price_at_tx_time =
                    Some(PriceAtTxTime::fiat_identity(movement.asset_symbol.clone()));
                modified = true;
            }
        }

        if modified {
            modified_ids.insert(tx.id.clone());
        }
        out.push(tx);
    }

    PricingOutcome {
        transactions: out,
        modified_ids,
    }
}

/// Pass 1 — derive a missing inflow price from a priced outflow.
///
/// Trades with more than one inflow or outflow are ambiguous and skipped.
pub fn derive_missing_inflow_prices(txs: &[Transaction]) -> PricingOutcome {
    let mut out = Vec::with_capacity(txs.len());
    let mut modified_ids = HashSet::new();

    for tx in txs {
        let mut tx = tx.clone();

        if is_simple_trade(&tx) && tx.inflows[0].is_unpriced() {
            if let Some(outflow_price) = tx.outflows[0].price_at_tx_time.clone() {
                if let Some(price) = ratio_price(
                    &outflow_price,
                    tx.outflows[0].effective_amount(),
                    tx.inflows[0].effective_amount(),
                    PriceSource::DerivedRatio,
                ) {
                    tx.inflows[0].price_at_tx_time = Some(price);
                    modified_ids.insert(tx.id.clone());
                }
            }
        }

        out.push(tx);
    }

    PricingOutcome {
        transactions: out,
        modified_ids,
    }
}

/// Pass 2 — crypto-crypto execution override.
///
/// When both legs of a simple trade carry prices and neither asset is fiat
/// or a stablecoin, the acquisition side is recomputed from the disposal
/// side's ratio. The disposal-side fair market value is the execution's
/// ground truth; a market quote fetched for the acquisition side must not
/// disagree with what was actually paid.
pub fn override_crypto_crypto_prices(txs: &[Transaction]) -> PricingOutcome {
    let mut out = Vec::with_capacity(txs.len());
    let mut modified_ids = HashSet::new();

    for tx in txs {
        let mut tx = tx.clone();

        if is_simple_trade(&tx)
            && !tx.inflows[0].asset_symbol.is_fiat_or_stablecoin()
            && !tx.outflows[0].asset_symbol.is_fiat_or_stablecoin()
            && tx.inflows[0].price_at_tx_time.is_some()
        {
            if let Some(outflow_price) = tx.outflows[0].price_at_tx_time.clone() {
                if let Some(price) = ratio_price(
                    &outflow_price,
                    tx.outflows[0].effective_amount(),
                    tx.inflows[0].effective_amount(),
                    PriceSource::DerivedRatio,
                ) {
                    if tx.inflows[0].price_at_tx_time.as_ref() != Some(&price) {
                        tx.inflows[0].price_at_tx_time = Some(price);
                        modified_ids.insert(tx.id.clone());
                    }
                }
            }
        }

        out.push(tx);
    }

    PricingOutcome {
        transactions: out,
        modified_ids,
    }
}

fn amounts_within_tolerance(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    if !a.is_positive() {
        return false;
    }
    (a - b).abs() / a <= tolerance
}

/// Propagate prices across confirmed links.
///
/// For each link, each priced source outflow is matched to the first target
/// inflow of the same asset whose amount is within 10% (network fees eat
/// into the received amount); the price is copied with a `link-propagated`
/// tag. Only confirmed links participate.
pub fn propagate_link_prices(
    txs: &[Transaction],
    links: &[TransactionLink],
) -> PricingOutcome {
    let tolerance = Decimal::from_str("0.1").expect("valid decimal");

    let mut out: Vec<Transaction> = txs.to_vec();
    let mut modified_ids = HashSet::new();
    let index: HashMap<TxId, usize> = out
        .iter()
        .enumerate()
        .map(|(i, tx)| (tx.id.clone(), i))
        .collect();

    for link in links {
        if link.status != LinkStatus::Confirmed {
            continue;
        }
        let (Some(&source_idx), Some(&target_idx)) = (
            index.get(&link.source_transaction_id),
            index.get(&link.target_transaction_id),
        ) else {
            continue;
        };
        if source_idx == target_idx {
            continue;
        }

        let source_outflows: Vec<AssetMovement> = out[source_idx]
            .outflows
            .iter()
            .filter(|m| m.price_at_tx_time.is_some())
            .cloned()
            .collect();

        let target = &mut out[target_idx];
        for source_movement in &source_outflows {
            let source_price = source_movement
                .price_at_tx_time
                .as_ref()
                .expect("filtered to priced movements");

            for target_movement in target.inflows.iter_mut() {
                if target_movement.asset_id != source_movement.asset_id {
                    continue;
                }
                if !amounts_within_tolerance(
                    source_movement.effective_amount(),
                    target_movement.effective_amount(),
                    tolerance,
                ) {
                    continue;
                }

                if can_replace(
                    target_movement.price_at_tx_time.as_ref(),
                    PriceSource::LinkPropagated,
                ) {
                    target_movement.price_at_tx_time =
                        Some(source_price.retagged(PriceSource::LinkPropagated));
                    modified_ids.insert(target.id.clone());
                }
                break;
            }
        }
    }

    PricingOutcome {
        transactions: out,
        modified_ids,
    }
}

/// Final pass — price fee movements.
///
/// A fee shares its transaction's timestamp, so a price already attached to
/// any same-asset inflow/outflow is directly reusable. Fiat fees that
/// remain unpriced get the identity price.
pub fn enrich_fee_prices(txs: &[Transaction]) -> PricingOutcome {
    let mut out = Vec::with_capacity(txs.len());
    let mut modified_ids = HashSet::new();

    for tx in txs {
        let mut tx = tx.clone();
        let mut modified = false;

        let sibling_prices: Vec<(crate::domain::AssetId, PriceAtTxTime)> = tx
            .inflows
            .iter()
            .chain(tx.outflows.iter())
            .filter_map(|m| {
                m.price_at_tx_time
                    .as_ref()
                    .map(|p| (m.asset_id.clone(), p.clone()))
            })
            .collect();

        for fee in tx.fees.iter_mut() {
            if !fee.is_unpriced() {
                continue;
            }
            if let Some((_, price)) = sibling_prices
                .iter()
                .find(|(asset_id, _)| *asset_id == fee.asset_id)
            {
                fee.price_at_tx_time = Some(price.clone());
                modified = true;
            } else if fee.asset_symbol.is_fiat() {
                fee.price_at_tx_time =
                    Some(PriceAtTxTime::fiat_identity(fee.asset_symbol.clone()));
                modified = true;
            }
        }

        if modified {
            modified_ids.insert(tx.id.clone());
        }
        out.push(tx);
    }

    PricingOutcome {
        transactions: out,
        modified_ids,
    }
}

/// Run the full inference pipeline in its required order.
pub fn run_pricing_passes(
    txs: Vec<Transaction>,
    links: &[TransactionLink],
) -> PricingOutcome {
    let mut modified_ids = HashSet::new();

    let pass0 = apply_execution_prices(&txs);
    modified_ids.extend(pass0.modified_ids);

    let pass1 = derive_missing_inflow_prices(&pass0.transactions);
    modified_ids.extend(pass1.modified_ids);

    let pass2 = override_crypto_crypto_prices(&pass1.transactions);
    modified_ids.extend(pass2.modified_ids);

    let propagated = propagate_link_prices(&pass2.transactions, links);
    modified_ids.extend(propagated.modified_ids);

    let fees = enrich_fee_prices(&propagated.transactions);
    modified_ids.extend(fees.modified_ids);

    PricingOutcome {
        transactions: fees.transactions,
        modified_ids,
    }
}
