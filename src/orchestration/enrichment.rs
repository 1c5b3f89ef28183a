//! The price enrichment run: pricing passes plus delta persistence.

use crate::db::LedgerStore;
use crate::domain::LinkStatus;
use crate::engine::pricing::run_pricing_passes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Counts reported by one enrichment run.
#[derive(Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct EnrichmentResult {
    pub transactions_processed: usize,
    pub transactions_updated: usize,
    /// Per-transaction persistence failures; the rest of the batch still
    /// commits.
    pub update_failures: usize,
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Runs the multi-pass price inference over stored transactions and
/// persists only the movements that changed.
#[derive(Clone)]
pub struct PriceEnricher {
    store: Arc<dyn LedgerStore>,
}

impl PriceEnricher {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<EnrichmentResult, EnrichmentError> {
        let txs = self.store.fetch_transactions(None).await?;
        let links = self.store.fetch_links(Some(LinkStatus::Confirmed)).await?;

        let transactions_processed = txs.len();
        let outcome = run_pricing_passes(txs, &links);

        let mut transactions_updated = 0usize;
        let mut update_failures = 0usize;
        for tx in &outcome.transactions {
            if !outcome.modified_ids.contains(&tx.id) {
                continue;
            }
            // One bad row must not sink the whole batch.
            match self.store.update_transaction_movements(tx).await {
                Ok(()) => transactions_updated += 1,
                Err(err) => {
                    warn!(
                        transaction = tx.id.as_str(),
                        "failed to persist enriched movements: {}", err
                    );
                    update_failures += 1;
                }
            }
        }

        info!(
            transactions_processed,
            transactions_updated, update_failures, "price enrichment run complete"
        );

        Ok(EnrichmentResult {
            transactions_processed,
            transactions_updated,
            update_failures,
        })
    }
}
