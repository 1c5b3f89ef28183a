//! Storage interface consumed by the orchestration layer.

use crate::db::Repository;
use crate::domain::{
    AcquisitionLot, LinkStatus, LotDisposal, LotTransfer, Transaction, TransactionLink,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Query/update operations over transactions, links, and lots.
///
/// `Repository` is the production implementation; orchestration depends on
/// this trait so runs can be driven against alternative stores in tests.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Fetch all transactions, optionally restricted to one source.
    async fn fetch_transactions(
        &self,
        source_name: Option<&str>,
    ) -> Result<Vec<Transaction>, sqlx::Error>;

    /// Persist a transaction's movement arrays back onto its row.
    async fn update_transaction_movements(&self, tx: &Transaction) -> Result<(), sqlx::Error>;

    /// Fetch links, optionally filtered by status.
    async fn fetch_links(
        &self,
        status: Option<LinkStatus>,
    ) -> Result<Vec<TransactionLink>, sqlx::Error>;

    /// Persist newly created links; returns the count actually inserted.
    async fn insert_links(&self, links: &[TransactionLink]) -> Result<usize, sqlx::Error>;

    /// Persist a calculation run's lots.
    async fn insert_lots(&self, lots: &[AcquisitionLot]) -> Result<usize, sqlx::Error>;

    /// Persist updated lot remaining quantities and statuses.
    async fn update_lots(&self, lots: &[AcquisitionLot]) -> Result<(), sqlx::Error>;

    /// Persist a calculation run's disposals.
    async fn insert_disposals(
        &self,
        calculation_id: Uuid,
        disposals: &[LotDisposal],
    ) -> Result<usize, sqlx::Error>;

    /// Persist a calculation run's lot transfers.
    async fn insert_transfers(
        &self,
        calculation_id: Uuid,
        transfers: &[LotTransfer],
    ) -> Result<usize, sqlx::Error>;
}

#[async_trait]
impl LedgerStore for Repository {
    async fn fetch_transactions(
        &self,
        source_name: Option<&str>,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        Repository::fetch_transactions(self, source_name).await
    }

    async fn update_transaction_movements(&self, tx: &Transaction) -> Result<(), sqlx::Error> {
        Repository::update_transaction_movements(self, tx).await
    }

    async fn fetch_links(
        &self,
        status: Option<LinkStatus>,
    ) -> Result<Vec<TransactionLink>, sqlx::Error> {
        Repository::fetch_links(self, status).await
    }

    async fn insert_links(&self, links: &[TransactionLink]) -> Result<usize, sqlx::Error> {
        self.insert_links_batch(links).await
    }

    async fn insert_lots(&self, lots: &[AcquisitionLot]) -> Result<usize, sqlx::Error> {
        self.insert_lots_batch(lots).await
    }

    async fn update_lots(&self, lots: &[AcquisitionLot]) -> Result<(), sqlx::Error> {
        self.update_lot_quantities(lots).await
    }

    async fn insert_disposals(
        &self,
        calculation_id: Uuid,
        disposals: &[LotDisposal],
    ) -> Result<usize, sqlx::Error> {
        self.insert_disposals_batch(calculation_id, disposals).await
    }

    async fn insert_transfers(
        &self,
        calculation_id: Uuid,
        transfers: &[LotTransfer],
    ) -> Result<usize, sqlx::Error> {
        self.insert_transfers_batch(calculation_id, transfers).await
    }
}
