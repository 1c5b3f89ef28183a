//! Flat directional matching candidates.

use crate::domain::{AssetId, AssetSymbol, Decimal, Direction, SourceType, TimeMs, TxId};
use serde::{Deserialize, Serialize};

/// One directional asset movement extracted from a transaction for matching.
///
/// Built fresh per matching run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCandidate {
    pub transaction_id: TxId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub source_name: String,
    pub source_type: SourceType,
    pub time_ms: TimeMs,
    pub asset_id: AssetId,
    pub asset_symbol: AssetSymbol,
    pub amount: Decimal,
    pub direction: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl TransactionCandidate {
    /// True when this candidate can act as the withdrawal side of a match.
    pub fn is_outflow(&self) -> bool {
        self.direction == Direction::Out
    }

    /// True when this candidate can act as the deposit side of a match.
    pub fn is_inflow(&self) -> bool {
        self.direction == Direction::In
    }
}
