pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, LedgerStore, Repository};
pub use domain::{
    AcquisitionLot, AssetId, AssetSymbol, CostBasisMethod, Decimal, Direction, LotDisposal,
    LotStatus, LotTransfer, SourceType, TimeMs, Transaction, TransactionCandidate,
    TransactionLink, TxId,
};
pub use error::AppError;
