//! Flattening stored transactions into directional matching candidates.
//!
//! UTXO chains report one transaction row per address, so a single on-chain
//! send shows up as several outflow rows plus a change inflow back to the
//! sender. Candidates built naively from those rows would double count the
//! internal movement; the adjustment below folds each hash-sharing cluster
//! into one externally-visible outflow on a representative row.

use crate::domain::{
    AssetId, Decimal, Direction, SourceType, Transaction, TransactionCandidate, TxId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Per-transaction, per-asset movement sums (net amount when present).
#[derive(Debug, Default)]
pub struct MovementAggregates {
    pub inflow_amounts_by_tx: HashMap<TxId, HashMap<AssetId, Decimal>>,
    pub outflow_amounts_by_tx: HashMap<TxId, HashMap<AssetId, Decimal>>,
    pub asset_ids: BTreeSet<AssetId>,
}

/// Sum gross/net movement amounts per transaction per asset.
pub fn aggregate_movements_by_transaction(txs: &[Transaction]) -> MovementAggregates {
    let mut aggregates = MovementAggregates::default();

    for tx in txs {
        for movement in &tx.inflows {
            let entry = aggregates
                .inflow_amounts_by_tx
                .entry(tx.id.clone())
                .or_default()
                .entry(movement.asset_id.clone())
                .or_insert_with(Decimal::zero);
            *entry += movement.effective_amount();
            aggregates.asset_ids.insert(movement.asset_id.clone());
        }
        for movement in &tx.outflows {
            let entry = aggregates
                .outflow_amounts_by_tx
                .entry(tx.id.clone())
                .or_default()
                .entry(movement.asset_id.clone())
                .or_insert_with(Decimal::zero);
            *entry += movement.effective_amount();
            aggregates.asset_ids.insert(movement.asset_id.clone());
        }
    }

    aggregates
}

/// A cluster of per-address rows that belong to one on-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutflowGroup {
    pub asset_id: AssetId,
    pub members: Vec<TxId>,
}

impl OutflowGroup {
    /// Deterministic representative: the member with the smallest id.
    pub fn representative(&self) -> Option<&TxId> {
        self.members.iter().min()
    }
}

/// The corrected external transfer amount for a grouped outflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutflowAdjustment {
    pub representative: TxId,
    pub asset_id: AssetId,
    pub amount: Decimal,
}

/// Why a group produced no adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentSkip {
    /// Adjusted amount came out zero or negative.
    NonPositive,
    /// Nothing to correct: no change inflows and no fee in the group.
    NoAdjustment,
}

/// Derive hash-sharing clusters of blockchain rows that look like internal
/// transfers (the group moves an asset out and receives change of the same
/// asset back).
pub fn derive_internal_transfer_groups(txs: &[Transaction]) -> Vec<OutflowGroup> {
    let mut by_hash: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
    for tx in txs {
        if tx.source_type != SourceType::Blockchain {
            continue;
        }
        if let Some(hash) = &tx.tx_hash {
            by_hash.entry(hash.clone()).or_default().push(tx);
        }
    }

    let mut groups = Vec::new();
    for members in by_hash.values() {
        if members.len() < 2 {
            continue;
        }

        let mut outflow_assets: BTreeSet<&AssetId> = BTreeSet::new();
        let mut inflow_assets: BTreeSet<&AssetId> = BTreeSet::new();
        for tx in members {
            outflow_assets.extend(tx.outflows.iter().map(|m| &m.asset_id));
            inflow_assets.extend(tx.inflows.iter().map(|m| &m.asset_id));
        }

        for asset_id in outflow_assets {
            if inflow_assets.contains(asset_id) {
                groups.push(OutflowGroup {
                    asset_id: asset_id.clone(),
                    members: members.iter().map(|t| t.id.clone()).collect(),
                });
            }
        }
    }

    groups
}

/// Compute the true external transfer amount for a grouped outflow:
/// `Σ(outflows) − Σ(internal inflows/change) − deduped on-chain fee`.
///
/// Only correct under the per-address row model, where the same on-chain
/// fee repeats on every member row and change arrives as an inflow row.
pub fn calculate_outflow_adjustment(
    asset_id: &AssetId,
    group: &[&Transaction],
    aggregates: &MovementAggregates,
) -> Result<OutflowAdjustment, AdjustmentSkip> {
    let representative = group
        .iter()
        .map(|tx| &tx.id)
        .min()
        .ok_or(AdjustmentSkip::NoAdjustment)?;

    let mut total_outflows = Decimal::zero();
    let mut internal_inflows = Decimal::zero();
    for tx in group {
        if let Some(amount) = aggregates
            .outflow_amounts_by_tx
            .get(&tx.id)
            .and_then(|assets| assets.get(asset_id))
        {
            total_outflows += *amount;
        }
        if let Some(amount) = aggregates
            .inflow_amounts_by_tx
            .get(&tx.id)
            .and_then(|assets| assets.get(asset_id))
        {
            internal_inflows += *amount;
        }
    }

    // The per-address model repeats the fee on each member row; distinct
    // amounts are distinct fees, repeats are the same fee echoed.
    let mut fee_amounts: BTreeSet<Decimal> = BTreeSet::new();
    for tx in group {
        for fee in &tx.fees {
            if &fee.asset_id == asset_id && fee.effective_amount().is_positive() {
                fee_amounts.insert(fee.effective_amount());
            }
        }
    }
    let deduped_fee: Decimal = fee_amounts.iter().sum();

    if internal_inflows.is_zero() && deduped_fee.is_zero() {
        return Err(AdjustmentSkip::NoAdjustment);
    }

    let adjusted = total_outflows - internal_inflows - deduped_fee;
    if !adjusted.is_positive() {
        return Err(AdjustmentSkip::NonPositive);
    }

    Ok(OutflowAdjustment {
        representative: representative.clone(),
        asset_id: asset_id.clone(),
        amount: adjusted,
    })
}

/// Emit one candidate per inflow and one per qualifying outflow.
///
/// Outflows of a grouped asset are emitted only on the group's
/// representative row, with the override amount when an adjustment was
/// computed; other members' outflows are already folded in and are skipped
/// to avoid double counting.
pub fn convert_to_candidates(
    txs: &[Transaction],
    amount_overrides: &HashMap<(TxId, AssetId), Decimal>,
    outflow_groupings: &[OutflowGroup],
) -> Vec<TransactionCandidate> {
    // (member, asset) -> representative
    let mut grouped: HashMap<(&TxId, &AssetId), &TxId> = HashMap::new();
    for group in outflow_groupings {
        if let Some(representative) = group.representative() {
            for member in &group.members {
                grouped.insert((member, &group.asset_id), representative);
            }
        }
    }

    let mut candidates = Vec::new();

    for tx in txs {
        for movement in &tx.inflows {
            let amount = movement.effective_amount();
            if !amount.is_positive() {
                continue;
            }
            candidates.push(candidate_from(tx, movement, Direction::In, amount));
        }

        let mut emitted_grouped_assets: BTreeSet<&AssetId> = BTreeSet::new();
        for movement in &tx.outflows {
            let asset_id = &movement.asset_id;

            if let Some(representative) = grouped.get(&(&tx.id, asset_id)) {
                if *representative != &tx.id {
                    // Folded into the representative candidate.
                    continue;
                }
                if !emitted_grouped_assets.insert(asset_id) {
                    continue;
                }
                let amount = amount_overrides
                    .get(&(tx.id.clone(), asset_id.clone()))
                    .copied()
                    .unwrap_or_else(|| movement.effective_amount());
                if !amount.is_positive() {
                    continue;
                }
                candidates.push(candidate_from(tx, movement, Direction::Out, amount));
                continue;
            }

            let amount = movement.effective_amount();
            if !amount.is_positive() {
                continue;
            }
            candidates.push(candidate_from(tx, movement, Direction::Out, amount));
        }
    }

    candidates
}

fn candidate_from(
    tx: &Transaction,
    movement: &crate::domain::AssetMovement,
    direction: Direction,
    amount: Decimal,
) -> TransactionCandidate {
    TransactionCandidate {
        transaction_id: tx.id.clone(),
        external_id: tx.external_id.clone(),
        source_name: tx.source_name.clone(),
        source_type: tx.source_type,
        time_ms: tx.time_ms,
        asset_id: movement.asset_id.clone(),
        asset_symbol: movement.asset_symbol.clone(),
        amount,
        direction,
        from_address: movement.from_address.clone(),
        to_address: movement.to_address.clone(),
        tx_hash: tx.tx_hash.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetMovement, AssetSymbol, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn btc_movement(amount: &str) -> AssetMovement {
        AssetMovement::new(AssetId::new("bitcoin"), AssetSymbol::new("BTC"), d(amount))
    }

    fn chain_tx(
        id: &str,
        hash: Option<&str>,
        inflows: Vec<AssetMovement>,
        outflows: Vec<AssetMovement>,
        fees: Vec<AssetMovement>,
    ) -> Transaction {
        Transaction {
            id: TxId::new(id),
            external_id: None,
            source_name: "bitcoin".to_string(),
            source_type: SourceType::Blockchain,
            time_ms: TimeMs::new(1_700_000_000_000),
            tx_hash: hash.map(|h| h.to_string()),
            inflows,
            outflows,
            fees,
        }
    }

    #[test]
    fn test_aggregate_sums_per_tx_per_asset() {
        let txs = vec![chain_tx(
            "tx-1",
            None,
            vec![btc_movement("0.3"), btc_movement("0.2")],
            vec![btc_movement("1.0")],
            vec![],
        )];

        let aggregates = aggregate_movements_by_transaction(&txs);
        let inflow = &aggregates.inflow_amounts_by_tx[&TxId::new("tx-1")];
        assert_eq!(inflow[&AssetId::new("bitcoin")], d("0.5"));
        let outflow = &aggregates.outflow_amounts_by_tx[&TxId::new("tx-1")];
        assert_eq!(outflow[&AssetId::new("bitcoin")], d("1.0"));
        assert!(aggregates.asset_ids.contains(&AssetId::new("bitcoin")));
    }

    #[test]
    fn test_aggregate_prefers_net_amount() {
        let movement = btc_movement("1.0").with_net_amount(d("0.999"));
        let txs = vec![chain_tx("tx-1", None, vec![], vec![movement], vec![])];

        let aggregates = aggregate_movements_by_transaction(&txs);
        let outflow = &aggregates.outflow_amounts_by_tx[&TxId::new("tx-1")];
        assert_eq!(outflow[&AssetId::new("bitcoin")], d("0.999"));
    }

    #[test]
    fn test_outflow_adjustment_subtracts_change_and_fee() {
        // Two address rows of one on-chain send: 1.0 out + 0.4 change back,
        // fee 0.0005 echoed on both rows.
        let tx_a = chain_tx(
            "tx-a",
            Some("hash1"),
            vec![],
            vec![btc_movement("1.0")],
            vec![btc_movement("0.0005")],
        );
        let tx_b = chain_tx(
            "tx-b",
            Some("hash1"),
            vec![btc_movement("0.4")],
            vec![],
            vec![btc_movement("0.0005")],
        );
        let txs = vec![tx_a, tx_b];
        let aggregates = aggregate_movements_by_transaction(&txs);
        let group: Vec<&Transaction> = txs.iter().collect();

        let adjustment =
            calculate_outflow_adjustment(&AssetId::new("bitcoin"), &group, &aggregates).unwrap();
        assert_eq!(adjustment.representative, TxId::new("tx-a"));
        assert_eq!(adjustment.amount, d("0.5995"));
    }

    #[test]
    fn test_outflow_adjustment_skips_when_nothing_to_adjust() {
        let tx = chain_tx("tx-a", Some("hash1"), vec![], vec![btc_movement("1.0")], vec![]);
        let txs = vec![tx];
        let aggregates = aggregate_movements_by_transaction(&txs);
        let group: Vec<&Transaction> = txs.iter().collect();

        assert_eq!(
            calculate_outflow_adjustment(&AssetId::new("bitcoin"), &group, &aggregates),
            Err(AdjustmentSkip::NoAdjustment)
        );
    }

    #[test]
    fn test_outflow_adjustment_skips_non_positive() {
        // Change exceeds the outflow; nothing external actually left.
        let tx_a = chain_tx("tx-a", Some("hash1"), vec![], vec![btc_movement("0.4")], vec![]);
        let tx_b = chain_tx("tx-b", Some("hash1"), vec![btc_movement("0.5")], vec![], vec![]);
        let txs = vec![tx_a, tx_b];
        let aggregates = aggregate_movements_by_transaction(&txs);
        let group: Vec<&Transaction> = txs.iter().collect();

        assert_eq!(
            calculate_outflow_adjustment(&AssetId::new("bitcoin"), &group, &aggregates),
            Err(AdjustmentSkip::NonPositive)
        );
    }

    #[test]
    fn test_derive_groups_requires_shared_hash_and_change() {
        let tx_a = chain_tx("tx-a", Some("hash1"), vec![], vec![btc_movement("1.0")], vec![]);
        let tx_b = chain_tx("tx-b", Some("hash1"), vec![btc_movement("0.4")], vec![], vec![]);
        // Different hash, no group.
        let tx_c = chain_tx("tx-c", Some("hash2"), vec![], vec![btc_movement("2.0")], vec![]);

        let groups = derive_internal_transfer_groups(&[tx_a, tx_b, tx_c]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].asset_id, AssetId::new("bitcoin"));
        assert_eq!(
            groups[0].members,
            vec![TxId::new("tx-a"), TxId::new("tx-b")]
        );
    }

    #[test]
    fn test_convert_skips_non_representative_members() {
        let tx_a = chain_tx("tx-a", Some("hash1"), vec![], vec![btc_movement("1.0")], vec![]);
        let tx_b = chain_tx(
            "tx-b",
            Some("hash1"),
            vec![btc_movement("0.4")],
            vec![btc_movement("0.1")],
            vec![],
        );
        let txs = vec![tx_a, tx_b];
        let groups = derive_internal_transfer_groups(&txs);
        let mut overrides = HashMap::new();
        overrides.insert(
            (TxId::new("tx-a"), AssetId::new("bitcoin")),
            d("0.7"),
        );

        let candidates = convert_to_candidates(&txs, &overrides, &groups);

        let outflows: Vec<_> = candidates.iter().filter(|c| c.is_outflow()).collect();
        assert_eq!(outflows.len(), 1, "only the representative emits an outflow");
        assert_eq!(outflows[0].transaction_id, TxId::new("tx-a"));
        assert_eq!(outflows[0].amount, d("0.7"));

        // Change inflow still produces an inflow candidate.
        let inflows: Vec<_> = candidates.iter().filter(|c| c.is_inflow()).collect();
        assert_eq!(inflows.len(), 1);
        assert_eq!(inflows[0].transaction_id, TxId::new("tx-b"));
    }

    #[test]
    fn test_convert_ungrouped_passes_through() {
        let tx = chain_tx(
            "tx-1",
            Some("hash9"),
            vec![btc_movement("2.0")],
            vec![btc_movement("1.0")],
            vec![],
        );
        let candidates = convert_to_candidates(&[tx], &HashMap::new(), &[]);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|c| c.is_inflow() && c.amount == d("2.0")));
        assert!(candidates.iter().any(|c| c.is_outflow() && c.amount == d("1.0")));
    }

    #[test]
    fn test_convert_skips_non_positive_amounts() {
        let tx = chain_tx("tx-1", None, vec![btc_movement("0")], vec![], vec![]);
        let candidates = convert_to_candidates(&[tx], &HashMap::new(), &[]);
        assert!(candidates.is_empty());
    }
}
