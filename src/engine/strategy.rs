//! Cost-basis strategies for matching disposals to open lots.

use crate::domain::{
    AcquisitionLot, AssetId, AssetSymbol, CostBasisMethod, Decimal, LotDisposal, TimeMs, TxId,
};
use thiserror::Error;

/// One outflow to be satisfied from the open-lot pool.
#[derive(Debug, Clone, PartialEq)]
pub struct DisposalRequest {
    pub asset_id: AssetId,
    pub asset_symbol: AssetSymbol,
    pub quantity: Decimal,
    pub date: TimeMs,
    pub proceeds_per_unit: Decimal,
    pub transaction_id: TxId,
}

/// A disposal the lot pool cannot satisfy correctly.
#[derive(Debug, Error, PartialEq)]
pub enum LotEngineError {
    #[error(
        "insufficient open lots for {asset}: requested {requested}, available {available}"
    )]
    InsufficientLots {
        asset: String,
        requested: Decimal,
        available: Decimal,
    },
    #[error("cost basis method {0} is not implemented")]
    NotImplemented(CostBasisMethod),
    #[error("disposal quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),
}

/// Capability interface over the accounting methods.
pub trait CostBasisStrategy: Send + Sync {
    /// The method this strategy implements, recorded on produced lots.
    fn method(&self) -> CostBasisMethod;

    /// Match a disposal against open lots, oldest-state-preserving: the
    /// input lots are not mutated; callers apply the returned disposals.
    fn match_disposal(
        &self,
        disposal: &DisposalRequest,
        open_lots: &[AcquisitionLot],
    ) -> Result<Vec<LotDisposal>, LotEngineError>;
}

/// Build the strategy for a configured method.
///
/// Specific-id is declared but unimplemented and fails here rather than
/// silently degrading to another method.
pub fn strategy_for(method: CostBasisMethod) -> Result<Box<dyn CostBasisStrategy>, LotEngineError> {
    match method {
        CostBasisMethod::Fifo => Ok(Box::new(FifoStrategy)),
        CostBasisMethod::Lifo => Ok(Box::new(LifoStrategy)),
        CostBasisMethod::AverageCost => Ok(Box::new(AverageCostStrategy)),
        CostBasisMethod::SpecificId => Err(LotEngineError::NotImplemented(method)),
    }
}

fn open_lots_for_asset<'a>(
    lots: &'a [AcquisitionLot],
    asset_id: &AssetId,
) -> Vec<&'a AcquisitionLot> {
    lots.iter()
        .filter(|lot| &lot.asset_id == asset_id && lot.remaining_quantity.is_positive())
        .collect()
}

/// Walk sorted lots consuming `min(remaining, still needed)` from each.
///
/// `basis_override` replaces each lot's own unit cost (average-cost).
fn consume_in_order(
    sorted_lots: &[&AcquisitionLot],
    disposal: &DisposalRequest,
    basis_override: Option<Decimal>,
) -> Result<Vec<LotDisposal>, LotEngineError> {
    if !disposal.quantity.is_positive() {
        return Err(LotEngineError::NonPositiveQuantity(disposal.quantity));
    }

    let available: Decimal = sorted_lots.iter().map(|lot| lot.remaining_quantity).sum();
    if available < disposal.quantity {
        return Err(LotEngineError::InsufficientLots {
            asset: disposal.asset_symbol.as_str().to_string(),
            requested: disposal.quantity,
            available,
        });
    }

    let mut disposals = Vec::new();
    let mut needed = disposal.quantity;

    for lot in sorted_lots {
        if !needed.is_positive() {
            break;
        }
        let take = lot.remaining_quantity.min(needed);
        disposals.push(LotDisposal {
            lot_id: lot.id,
            quantity_disposed: take,
            cost_basis_per_unit: basis_override.unwrap_or(lot.cost_basis_per_unit),
            proceeds_per_unit: disposal.proceeds_per_unit,
            transaction_id: disposal.transaction_id.clone(),
            date: disposal.date,
        });
        needed -= take;
    }

    Ok(disposals)
}

fn sort_oldest_first(lots: &mut [&AcquisitionLot]) {
    lots.sort_by(|a, b| {
        a.acquisition_date
            .cmp(&b.acquisition_date)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// First-in-first-out: oldest acquisitions are consumed first.
pub struct FifoStrategy;

impl CostBasisStrategy for FifoStrategy {
    fn method(&self) -> CostBasisMethod {
        CostBasisMethod::Fifo
    }

    fn match_disposal(
        &self,
        disposal: &DisposalRequest,
        open_lots: &[AcquisitionLot],
    ) -> Result<Vec<LotDisposal>, LotEngineError> {
        let mut lots = open_lots_for_asset(open_lots, &disposal.asset_id);
        sort_oldest_first(&mut lots);
        consume_in_order(&lots, disposal, None)
    }
}

/// Last-in-first-out: newest acquisitions are consumed first.
pub struct LifoStrategy;

impl CostBasisStrategy for LifoStrategy {
    fn method(&self) -> CostBasisMethod {
        CostBasisMethod::Lifo
    }

    fn match_disposal(
        &self,
        disposal: &DisposalRequest,
        open_lots: &[AcquisitionLot],
    ) -> Result<Vec<LotDisposal>, LotEngineError> {
        let mut lots = open_lots_for_asset(open_lots, &disposal.asset_id);
        lots.sort_by(|a, b| {
            b.acquisition_date
                .cmp(&a.acquisition_date)
                .then_with(|| b.id.cmp(&a.id))
        });
        consume_in_order(&lots, disposal, None)
    }
}

/// Average cost: all open lots collapse into one weighted-average unit
/// cost; consumption then proceeds oldest first so remaining-quantity
/// bookkeeping stays per-lot.
pub struct AverageCostStrategy;

impl CostBasisStrategy for AverageCostStrategy {
    fn method(&self) -> CostBasisMethod {
        CostBasisMethod::AverageCost
    }

    fn match_disposal(
        &self,
        disposal: &DisposalRequest,
        open_lots: &[AcquisitionLot],
    ) -> Result<Vec<LotDisposal>, LotEngineError> {
        let mut lots = open_lots_for_asset(open_lots, &disposal.asset_id);
        sort_oldest_first(&mut lots);

        let total_quantity: Decimal = lots.iter().map(|lot| lot.remaining_quantity).sum();
        let total_basis: Decimal = lots
            .iter()
            .map(|lot| lot.remaining_quantity * lot.cost_basis_per_unit)
            .sum();
        let average = total_basis
            .checked_div(total_quantity)
            .unwrap_or_else(Decimal::zero);

        consume_in_order(&lots, disposal, Some(average))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn lot(quantity: &str, basis: &str, date_ms: i64) -> AcquisitionLot {
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

    fn disposal(quantity: &str, date_ms: i64) -> DisposalRequest {
        DisposalRequest {
            asset_id: AssetId::new("bitcoin"),
            asset_symbol: AssetSymbol::new("BTC"),
            quantity: d(quantity),
            date: TimeMs::new(date_ms),
            proceeds_per_unit: d("40000"),
            transaction_id: TxId::new("sell-tx"),
        }
    }

    const JAN_1: i64 = 1_704_067_200_000;
    const JAN_15: i64 = 1_705_276_800_000;
    const FEB_1: i64 = 1_706_745_600_000;

    #[test]
    fn test_fifo_consumes_oldest_first() {
        // Lot A: 1 BTC @ 30,000 (Jan 1); lot B: 1 BTC @ 35,000 (Jan 15).
        let lot_a = lot("1", "30000", JAN_1);
        let lot_b = lot("1", "35000", JAN_15);
        let lots = vec![lot_b.clone(), lot_a.clone()];

        let disposals = FifoStrategy
            .match_disposal(&disposal("1.5", FEB_1), &lots)
            .unwrap();

        assert_eq!(disposals.len(), 2);
        assert_eq!(disposals[0].lot_id, lot_a.id);
        assert_eq!(disposals[0].quantity_disposed, d("1"));
        assert_eq!(disposals[0].cost_basis_per_unit, d("30000"));
        assert_eq!(disposals[1].lot_id, lot_b.id);
        assert_eq!(disposals[1].quantity_disposed, d("0.5"));
        assert_eq!(disposals[1].cost_basis_per_unit, d("35000"));
    }

    #[test]
    fn test_lifo_consumes_newest_first() {
        let lot_a = lot("1", "30000", JAN_1);
        let lot_b = lot("1", "35000", JAN_15);
        let lots = vec![lot_a.clone(), lot_b.clone()];

        let disposals = LifoStrategy
            .match_disposal(&disposal("1.5", FEB_1), &lots)
            .unwrap();

        assert_eq!(disposals.len(), 2);
        assert_eq!(disposals[0].lot_id, lot_b.id);
        assert_eq!(disposals[0].quantity_disposed, d("1"));
        assert_eq!(disposals[1].lot_id, lot_a.id);
        assert_eq!(disposals[1].quantity_disposed, d("0.5"));
    }

    #[test]
    fn test_fifo_lifo_agree_on_single_lot() {
        let lots = vec![lot("2", "30000", JAN_1)];
        let request = disposal("1.5", FEB_1);

        let fifo = FifoStrategy.match_disposal(&request, &lots).unwrap();
        let lifo = LifoStrategy.match_disposal(&request, &lots).unwrap();
        assert_eq!(fifo, lifo);
    }

    #[test]
    fn test_disposal_quantity_conservation() {
        let lots = vec![
            lot("0.3", "30000", JAN_1),
            lot("0.5", "32000", JAN_15),
            lot("1", "35000", FEB_1),
        ];
        let request = disposal("1.2", FEB_1 + 1000);

        let disposals = FifoStrategy.match_disposal(&request, &lots).unwrap();
        let total: Decimal = disposals.iter().map(|d| d.quantity_disposed).sum();
        assert_eq!(total, d("1.2"));
    }

    #[test]
    fn test_insufficient_lots_is_error() {
        let lots = vec![lot("1", "30000", JAN_1)];
        let err = FifoStrategy
            .match_disposal(&disposal("1.5", FEB_1), &lots)
            .unwrap_err();
        assert_eq!(
            err,
            LotEngineError::InsufficientLots {
                asset: "BTC".to_string(),
                requested: d("1.5"),
                available: d("1"),
            }
        );
    }

    #[test]
    fn test_fully_disposed_lots_excluded() {
        let spent = lot("1", "30000", JAN_1).with_remaining(Decimal::zero());
        let open = lot("1", "35000", JAN_15);
        let lots = vec![spent, open.clone()];

        let disposals = FifoStrategy
            .match_disposal(&disposal("1", FEB_1), &lots)
            .unwrap();
        assert_eq!(disposals.len(), 1);
        assert_eq!(disposals[0].lot_id, open.id);
    }

    #[test]
    fn test_average_cost_collapses_basis() {
        // 1 @ 30,000 + 1 @ 35,000 -> 32,500 average.
        let lots = vec![lot("1", "30000", JAN_1), lot("1", "35000", JAN_15)];

        let disposals = AverageCostStrategy
            .match_disposal(&disposal("1.5", FEB_1), &lots)
            .unwrap();

        assert_eq!(disposals.len(), 2);
        assert!(disposals
            .iter()
            .all(|dis| dis.cost_basis_per_unit == d("32500")));
        let total: Decimal = disposals.iter().map(|dis| dis.quantity_disposed).sum();
        assert_eq!(total, d("1.5"));
    }

    #[test]
    fn test_average_cost_weights_by_remaining() {
        // Partially consumed lot weighs by what is left.
        let mut lot_a = lot("2", "30000", JAN_1);
        lot_a = lot_a.with_remaining(d("0.5"));
        let lot_b = lot("1", "36000", JAN_15);
        let lots = vec![lot_a, lot_b];

        // (0.5 * 30000 + 1 * 36000) / 1.5 = 34000
        let disposals = AverageCostStrategy
            .match_disposal(&disposal("1", FEB_1), &lots)
            .unwrap();
        assert!(disposals
            .iter()
            .all(|dis| dis.cost_basis_per_unit == d("34000")));
    }

    #[test]
    fn test_specific_id_fails_construction() {
        let err = strategy_for(CostBasisMethod::SpecificId).err().unwrap();
        assert_eq!(err, LotEngineError::NotImplemented(CostBasisMethod::SpecificId));
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_factory_returns_requested_method() {
        assert_eq!(
            strategy_for(CostBasisMethod::Fifo).unwrap().method(),
            CostBasisMethod::Fifo
        );
        assert_eq!(
            strategy_for(CostBasisMethod::Lifo).unwrap().method(),
            CostBasisMethod::Lifo
        );
        assert_eq!(
            strategy_for(CostBasisMethod::AverageCost).unwrap().method(),
            CostBasisMethod::AverageCost
        );
    }

    #[test]
    fn test_other_assets_ignored() {
        let mut eth_lot = lot("5", "2000", JAN_1);
        eth_lot.asset_id = AssetId::new("ethereum");
        eth_lot.asset_symbol = AssetSymbol::new("ETH");
        let btc_lot = lot("1", "30000", JAN_15);
        let lots = vec![eth_lot, btc_lot.clone()];

        let disposals = FifoStrategy
            .match_disposal(&disposal("1", FEB_1), &lots)
            .unwrap();
        assert_eq!(disposals.len(), 1);
        assert_eq!(disposals[0].lot_id, btc_lot.id);
    }

    #[test]
    fn test_non_positive_disposal_rejected() {
        let lots = vec![lot("1", "30000", JAN_1)];
        let err = FifoStrategy
            .match_disposal(&disposal("0", FEB_1), &lots)
            .unwrap_err();
        assert_eq!(err, LotEngineError::NonPositiveQuantity(Decimal::zero()));
    }
}
