//! Domain types and determinism layer for the lot ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, TxId, SourceType, Direction
//! - Normalized transactions and per-movement price enrichment
//! - Transfer links and acquisition-lot records

pub mod asset;
pub mod candidate;
pub mod decimal;
pub mod link;
pub mod lot;
pub mod movement;
pub mod primitives;
pub mod transaction;

pub use asset::{AssetId, AssetSymbol};
pub use candidate::TransactionCandidate;
pub use decimal::Decimal;
pub use link::{LinkMetadata, LinkStatus, LinkType, MatchCriteria, PotentialMatch, TransactionLink};
pub use lot::{
    lot_status_for, AcquisitionLot, CostBasisMethod, LotDisposal, LotStatus, LotTransfer,
    LotTransferMetadata,
};
pub use movement::{AssetMovement, PriceAtTxTime, PriceGranularity, PriceSource};
pub use primitives::{Direction, SourceType, TimeMs, TxId};
pub use transaction::Transaction;
