//! Acquisition lots, disposals, and inter-platform lot transfers.

use crate::domain::{AssetId, AssetSymbol, Decimal, TimeMs, TxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Accounting method for matching disposals to lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CostBasisMethod {
    Fifo,
    Lifo,
    AverageCost,
    SpecificId,
}

impl std::fmt::Display for CostBasisMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostBasisMethod::Fifo => write!(f, "fifo"),
            CostBasisMethod::Lifo => write!(f, "lifo"),
            CostBasisMethod::AverageCost => write!(f, "average-cost"),
            CostBasisMethod::SpecificId => write!(f, "specific-id"),
        }
    }
}

impl FromStr for CostBasisMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(CostBasisMethod::Fifo),
            "lifo" => Ok(CostBasisMethod::Lifo),
            "average-cost" => Ok(CostBasisMethod::AverageCost),
            "specific-id" => Ok(CostBasisMethod::SpecificId),
            other => Err(format!("unknown cost basis method: {}", other)),
        }
    }
}

/// Consumption state of a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    Open,
    PartiallyDisposed,
    FullyDisposed,
}

impl std::fmt::Display for LotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LotStatus::Open => write!(f, "open"),
            LotStatus::PartiallyDisposed => write!(f, "partially_disposed"),
            LotStatus::FullyDisposed => write!(f, "fully_disposed"),
        }
    }
}

/// Status is a pure function of remaining versus acquired quantity.
pub fn lot_status_for(remaining_quantity: Decimal, quantity: Decimal) -> LotStatus {
    if remaining_quantity.is_zero() {
        LotStatus::FullyDisposed
    } else if remaining_quantity < quantity {
        LotStatus::PartiallyDisposed
    } else {
        LotStatus::Open
    }
}

/// A quantity of an asset acquired at a point in time at a known unit cost.
///
/// Never deleted; disposal matching only decreases `remaining_quantity` and
/// recomputes `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionLot {
    pub id: Uuid,
    /// Groups lots produced by one calculation run.
    pub calculation_id: Uuid,
    pub acquisition_transaction_id: TxId,
    pub asset_id: AssetId,
    pub asset_symbol: AssetSymbol,
    pub quantity: Decimal,
    pub cost_basis_per_unit: Decimal,
    pub total_cost_basis: Decimal,
    pub acquisition_date: TimeMs,
    pub method: CostBasisMethod,
    pub remaining_quantity: Decimal,
    pub status: LotStatus,
    pub updated_at: DateTime<Utc>,
}

impl AcquisitionLot {
    /// Create a fresh, fully-open lot.
    pub fn new(
        calculation_id: Uuid,
        acquisition_transaction_id: TxId,
        asset_id: AssetId,
        asset_symbol: AssetSymbol,
        quantity: Decimal,
        cost_basis_per_unit: Decimal,
        acquisition_date: TimeMs,
        method: CostBasisMethod,
    ) -> Self {
        AcquisitionLot {
            id: Uuid::new_v4(),
            calculation_id,
            acquisition_transaction_id,
            asset_id,
            asset_symbol,
            quantity,
            cost_basis_per_unit,
            total_cost_basis: quantity * cost_basis_per_unit,
            acquisition_date,
            method,
            remaining_quantity: quantity,
            status: LotStatus::Open,
            updated_at: Utc::now(),
        }
    }

    /// Copy of this lot with a new remaining quantity and recomputed status.
    pub fn with_remaining(&self, remaining_quantity: Decimal) -> Self {
        AcquisitionLot {
            remaining_quantity,
            status: lot_status_for(remaining_quantity, self.quantity),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Record of consuming part of a lot to satisfy an outflow.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotDisposal {
    pub lot_id: Uuid,
    pub quantity_disposed: Decimal,
    /// Copied from the lot at disposal time.
    pub cost_basis_per_unit: Decimal,
    pub proceeds_per_unit: Decimal,
    pub transaction_id: TxId,
    pub date: TimeMs,
}

/// Extra data carried on a lot transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LotTransferMetadata {
    /// USD value of the crypto network/platform fee folded into basis under
    /// the add-to-basis policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_fee_usd_value: Option<Decimal>,
}

/// Cost-basis inheritance across a confirmed transaction link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotTransfer {
    pub source_lot_id: Uuid,
    pub quantity_transferred: Decimal,
    pub cost_basis_per_unit: Decimal,
    pub link_id: Uuid,
    pub source_transaction_id: TxId,
    pub target_transaction_id: TxId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<LotTransferMetadata>,
    pub transfer_date: TimeMs,
}
