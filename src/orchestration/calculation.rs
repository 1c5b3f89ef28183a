//! The calculation run: ordered lot/disposal/transfer production.
//!
//! Transactions are processed in link-dependency order (source legs before
//! target legs, chronological otherwise), so a single pass satisfies the
//! transfer processor's ordering requirement. All lots, disposals, and
//! transfers for the run are committed together at the end; a hard failure
//! aborts the run without touching prior runs.

use crate::config::Config;
use crate::db::LedgerStore;
use crate::domain::{
    AcquisitionLot, AssetId, AssetSymbol, LinkStatus, LotDisposal, LotTransfer, Transaction,
    TransactionLink, TxId,
};
use crate::engine::ordering::sort_with_logical_ordering;
use crate::engine::strategy::{strategy_for, DisposalRequest, LotEngineError};
use crate::engine::transfer::{
    apply_disposals, process_transfer_source, process_transfer_target, TransferError,
    TransferSourceRequest, TransferTargetRequest, TransferWarning, VarianceTolerances,
};
use crate::orchestration::matching::build_candidates;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// What one calculation run produced.
#[derive(Debug, serde::Serialize)]
pub struct CalculationReport {
    pub calculation_id: Uuid,
    pub transactions_processed: usize,
    pub lots_created: usize,
    pub disposals_created: usize,
    pub transfers_created: usize,
    pub warnings: Vec<TransferWarning>,
}

#[derive(Debug, Error)]
pub enum CalculationError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Lot(#[from] LotEngineError),
    #[error("missing price on {asset_symbol} movement of transaction {transaction_id}")]
    MissingPrice {
        transaction_id: TxId,
        asset_symbol: AssetSymbol,
    },
}

/// Runs cost-basis computation over priced transactions and confirmed
/// links.
#[derive(Clone)]
pub struct CalculationRunner {
    store: Arc<dyn LedgerStore>,
    config: Config,
    tolerances: VarianceTolerances,
}

impl CalculationRunner {
    pub fn new(store: Arc<dyn LedgerStore>, config: Config) -> Self {
        Self {
            store,
            config,
            tolerances: VarianceTolerances::builtin(),
        }
    }

    /// Execute a calculation run under a fresh calculation id.
    ///
    /// Rerunning with the same inputs produces an equivalent new
    /// lot/disposal/transfer set; prior runs are never merged or mutated.
    pub async fn run(&self) -> Result<CalculationReport, CalculationError> {
        // Fails fast on the unimplemented specific-id method.
        let strategy = strategy_for(self.config.cost_basis_method)?;

        let txs = self.store.fetch_transactions(None).await?;
        let links = self.store.fetch_links(Some(LinkStatus::Confirmed)).await?;
        let ordered = sort_with_logical_ordering(&txs, &links);

        let (_, outflow_overrides) = build_candidates(&txs);
        let grouped_assets = grouped_asset_index(&txs);

        let by_id: HashMap<&TxId, &Transaction> = txs.iter().map(|tx| (&tx.id, tx)).collect();
        let mut links_by_source: HashMap<&TxId, Vec<&TransactionLink>> = HashMap::new();
        let mut links_by_target: HashMap<&TxId, Vec<&TransactionLink>> = HashMap::new();
        for link in &links {
            links_by_source
                .entry(&link.source_transaction_id)
                .or_default()
                .push(link);
            links_by_target
                .entry(&link.target_transaction_id)
                .or_default()
                .push(link);
        }

        let calculation_id = Uuid::new_v4();
        let mut lots: Vec<AcquisitionLot> = Vec::new();
        let mut disposals: Vec<LotDisposal> = Vec::new();
        let mut transfers: Vec<LotTransfer> = Vec::new();
        let mut warnings: Vec<TransferWarning> = Vec::new();

        for tx in &ordered {
            let source_links = links_by_source.get(&tx.id).cloned().unwrap_or_default();
            let target_links = links_by_target.get(&tx.id).cloned().unwrap_or_default();

            // Transfer source legs dispose from the pool.
            for link in &source_links {
                let effective_amount = outflow_overrides
                    .get(&(tx.id.clone(), link.asset_id.clone()))
                    .copied();
                let request = TransferSourceRequest {
                    link,
                    source_tx: tx,
                    lots: &lots,
                    effective_amount,
                    fee_policy: self.config.transfer_fee_policy,
                };
                let outcome =
                    process_transfer_source(&request, strategy.as_ref(), &self.tolerances)?;
                lots = outcome.updated_lots;
                disposals.extend(outcome.disposals);
                transfers.extend(outcome.transfers);
                warnings.extend(outcome.warnings);
            }

            // Transfer target legs open lots with inherited basis.
            for link in &target_links {
                let source_tx = by_id
                    .get(&link.source_transaction_id)
                    .copied()
                    .ok_or(TransferError::SourceNotProcessed(link.id))?;
                let request = TransferTargetRequest {
                    link,
                    source_tx,
                    target_tx: tx,
                    transfers: &transfers,
                    calculation_id,
                    method: self.config.cost_basis_method,
                };
                let outcome = process_transfer_target(&request, &self.tolerances)?;
                lots.push(outcome.lot);
                warnings.extend(outcome.warnings);
            }

            let linked_in: HashSet<&AssetId> =
                target_links.iter().map(|l| &l.asset_id).collect();
            let linked_out: HashSet<&AssetId> =
                source_links.iter().map(|l| &l.asset_id).collect();

            // Plain acquisitions.
            for movement in &tx.inflows {
                if movement.asset_symbol.is_fiat() {
                    continue;
                }
                if linked_in.contains(&movement.asset_id) {
                    continue;
                }
                // Change inflows of a grouped on-chain send never left the
                // pool; the adjusted outflow already accounts for them.
                if grouped_assets.contains(&(tx.id.clone(), movement.asset_id.clone())) {
                    continue;
                }
                let quantity = movement.effective_amount();
                if !quantity.is_positive() {
                    continue;
                }
                let price = movement.price_at_tx_time.as_ref().ok_or_else(|| {
                    CalculationError::MissingPrice {
                        transaction_id: tx.id.clone(),
                        asset_symbol: movement.asset_symbol.clone(),
                    }
                })?;
                lots.push(AcquisitionLot::new(
                    calculation_id,
                    tx.id.clone(),
                    movement.asset_id.clone(),
                    movement.asset_symbol.clone(),
                    quantity,
                    price.amount,
                    tx.time_ms,
                    self.config.cost_basis_method,
                ));
            }

            // Plain disposals.
            for movement in &tx.outflows {
                if movement.asset_symbol.is_fiat() {
                    continue;
                }
                if linked_out.contains(&movement.asset_id) {
                    continue;
                }
                let key = (tx.id.clone(), movement.asset_id.clone());
                let quantity = match outflow_overrides.get(&key) {
                    // Representative of a grouped send: dispose the
                    // adjusted external amount.
                    Some(adjusted) => *adjusted,
                    None if grouped_assets.contains(&key) => continue,
                    None => movement.effective_amount(),
                };
                if !quantity.is_positive() {
                    continue;
                }
                let price = movement.price_at_tx_time.as_ref().ok_or_else(|| {
                    CalculationError::MissingPrice {
                        transaction_id: tx.id.clone(),
                        asset_symbol: movement.asset_symbol.clone(),
                    }
                })?;
                let request = DisposalRequest {
                    asset_id: movement.asset_id.clone(),
                    asset_symbol: movement.asset_symbol.clone(),
                    quantity,
                    date: tx.time_ms,
                    proceeds_per_unit: price.amount,
                    transaction_id: tx.id.clone(),
                };
                let matched = strategy.match_disposal(&request, &lots)?;
                lots = apply_disposals(&lots, &matched);
                disposals.extend(matched);
            }
        }

        self.store.insert_lots(&lots).await?;
        self.store.insert_disposals(calculation_id, &disposals).await?;
        self.store.insert_transfers(calculation_id, &transfers).await?;

        info!(
            %calculation_id,
            transactions = ordered.len(),
            lots = lots.len(),
            disposals = disposals.len(),
            transfers = transfers.len(),
            warnings = warnings.len(),
            "calculation run complete"
        );

        Ok(CalculationReport {
            calculation_id,
            transactions_processed: ordered.len(),
            lots_created: lots.len(),
            disposals_created: disposals.len(),
            transfers_created: transfers.len(),
            warnings,
        })
    }
}

/// (transaction, asset) pairs that belong to a grouped on-chain send. The
/// representative's adjusted outflow stands in for all of them.
fn grouped_asset_index(txs: &[Transaction]) -> HashSet<(TxId, AssetId)> {
    crate::engine::candidates::derive_internal_transfer_groups(txs)
        .into_iter()
        .flat_map(|group| {
            let asset_id = group.asset_id;
            group
                .members
                .into_iter()
                .map(move |member| (member, asset_id.clone()))
        })
        .collect()
}
