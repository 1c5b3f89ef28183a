//! The matching run: stored transactions in, persisted links out.

use crate::db::LedgerStore;
use crate::domain::{AssetId, Decimal, LinkStatus, Transaction, TransactionLink, TxId};
use crate::engine::candidates::{
    aggregate_movements_by_transaction, calculate_outflow_adjustment, convert_to_candidates,
    derive_internal_transfer_groups,
};
use crate::engine::finder::{find_potential_matches, MatchingConfig};
use crate::engine::resolver::{create_transaction_link, deduplicate_and_confirm};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Counts reported by one matching run.
#[derive(Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MatchingRunResult {
    pub candidates_built: usize,
    pub matches_found: usize,
    pub links_confirmed: usize,
    pub links_suggested: usize,
    /// Accepted matches whose amounts failed link validation.
    pub links_rejected: usize,
    pub links_persisted: usize,
}

#[derive(Debug, Error)]
pub enum MatchingRunError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Runs candidate building, match finding, and resolution over the stored
/// transaction set.
#[derive(Clone)]
pub struct LinkMatcher {
    store: Arc<dyn LedgerStore>,
    config: MatchingConfig,
}

impl LinkMatcher {
    pub fn new(store: Arc<dyn LedgerStore>, config: MatchingConfig) -> Self {
        Self { store, config }
    }

    /// Execute a full matching run and persist the resulting links.
    pub async fn run(&self) -> Result<MatchingRunResult, MatchingRunError> {
        let txs = self.store.fetch_transactions(None).await?;
        let (candidates, _) = build_candidates(&txs);

        let sources: Vec<_> = candidates.iter().filter(|c| c.is_outflow()).collect();
        let targets: Vec<_> = candidates
            .iter()
            .filter(|c| c.is_inflow())
            .cloned()
            .collect();

        let mut all_matches = Vec::new();
        for source in sources {
            all_matches.extend(find_potential_matches(source, &targets, &self.config));
        }
        let matches_found = all_matches.len();

        let resolved = deduplicate_and_confirm(all_matches, &self.config);

        let mut links: Vec<TransactionLink> = Vec::new();
        let mut links_confirmed = 0usize;
        let mut links_suggested = 0usize;
        let mut links_rejected = 0usize;

        let statused = resolved
            .confirmed
            .into_iter()
            .map(|m| (m, LinkStatus::Confirmed))
            .chain(
                resolved
                    .suggested
                    .into_iter()
                    .map(|m| (m, LinkStatus::Suggested)),
            );
        for (m, status) in statused {
            match create_transaction_link(&m, status) {
                Ok(link) => {
                    match status {
                        LinkStatus::Confirmed => links_confirmed += 1,
                        _ => links_suggested += 1,
                    }
                    links.push(link);
                }
                Err(err) => {
                    warn!(
                        source = m.source.transaction_id.as_str(),
                        target = m.target.transaction_id.as_str(),
                        "rejecting matched pair: {}",
                        err
                    );
                    links_rejected += 1;
                }
            }
        }

        let links_persisted = self.store.insert_links(&links).await?;
        info!(
            candidates = candidates.len(),
            matches_found, links_confirmed, links_suggested, links_rejected, links_persisted,
            "matching run complete"
        );

        Ok(MatchingRunResult {
            candidates_built: candidates.len(),
            matches_found,
            links_confirmed,
            links_suggested,
            links_rejected,
            links_persisted,
        })
    }
}

/// Candidates for a transaction set, with UTXO change adjustment applied.
///
/// Also returns the override map so calculation runs can reuse the
/// adjusted amounts for linked outflows.
pub fn build_candidates(
    txs: &[Transaction],
) -> (
    Vec<crate::domain::TransactionCandidate>,
    HashMap<(TxId, AssetId), Decimal>,
) {
    let aggregates = aggregate_movements_by_transaction(txs);
    let groups = derive_internal_transfer_groups(txs);
    let by_id: HashMap<&TxId, &Transaction> = txs.iter().map(|tx| (&tx.id, tx)).collect();

    let mut overrides: HashMap<(TxId, AssetId), Decimal> = HashMap::new();
    for group in &groups {
        let members: Vec<&Transaction> = group
            .members
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        match calculate_outflow_adjustment(&group.asset_id, &members, &aggregates) {
            Ok(adjustment) => {
                overrides.insert(
                    (adjustment.representative, adjustment.asset_id),
                    adjustment.amount,
                );
            }
            Err(skip) => {
                debug!(asset = group.asset_id.as_str(), "skipping outflow adjustment: {:?}", skip);
            }
        }
    }

    let candidates = convert_to_candidates(txs, &overrides, &groups);
    (candidates, overrides)
}
