//! Deterministic transaction processing order for calculation runs.
//!
//! A transfer target cannot be processed before its source leg has created
//! the link's lot transfers. Links therefore impose a partial order on
//! transactions; within it, processing stays chronological.

use crate::domain::{LinkStatus, Transaction, TransactionLink, TxId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::warn;

/// Edges from each link source to its target: the target depends on the
/// source having been processed. Only confirmed links participate.
pub fn build_dependency_graph(
    txs: &[Transaction],
    links: &[TransactionLink],
) -> HashMap<TxId, Vec<TxId>> {
    let known: HashSet<&TxId> = txs.iter().map(|tx| &tx.id).collect();
    let mut graph: HashMap<TxId, Vec<TxId>> = HashMap::new();

    for link in links {
        if link.status != LinkStatus::Confirmed {
            continue;
        }
        if !known.contains(&link.source_transaction_id)
            || !known.contains(&link.target_transaction_id)
        {
            continue;
        }
        if link.source_transaction_id == link.target_transaction_id {
            continue;
        }
        graph
            .entry(link.source_transaction_id.clone())
            .or_default()
            .push(link.target_transaction_id.clone());
    }

    graph
}

/// Topologically sort transactions under the link dependencies, breaking
/// ties chronologically (then by id).
///
/// If the link graph contains a cycle (bad data), the remaining
/// transactions are appended in chronological order so the run can still
/// proceed and surface its validation errors downstream.
pub fn sort_with_logical_ordering(
    txs: &[Transaction],
    links: &[TransactionLink],
) -> Vec<Transaction> {
    let graph = build_dependency_graph(txs, links);

    let mut in_degree: HashMap<&TxId, usize> = txs.iter().map(|tx| (&tx.id, 0)).collect();
    for targets in graph.values() {
        for target in targets {
            if let Some(degree) = in_degree.get_mut(target) {
                *degree += 1;
            }
        }
    }

    let by_id: HashMap<&TxId, &Transaction> = txs.iter().map(|tx| (&tx.id, tx)).collect();

    // Min-heap on (time_ms, id) keeps ready transactions chronological.
    let mut ready: BinaryHeap<Reverse<(i64, TxId)>> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| Reverse((by_id[*id].time_ms.as_ms(), (*id).clone())))
        .collect();

    let mut ordered = Vec::with_capacity(txs.len());
    let mut emitted: HashSet<TxId> = HashSet::new();

    while let Some(Reverse((_, id))) = ready.pop() {
        let tx = by_id[&id];
        ordered.push(tx.clone());
        emitted.insert(id.clone());

        if let Some(targets) = graph.get(&id) {
            for target in targets {
                if let Some(degree) = in_degree.get_mut(target) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((by_id[target].time_ms.as_ms(), target.clone())));
                    }
                }
            }
        }
    }

    if ordered.len() < txs.len() {
        warn!(
            "link dependency cycle detected; {} transactions fall back to chronological order",
            txs.len() - ordered.len()
        );
        let mut rest: Vec<&Transaction> = txs
            .iter()
            .filter(|tx| !emitted.contains(&tx.id))
            .collect();
        rest.sort_by(|a, b| a.time_ms.cmp(&b.time_ms).then_with(|| a.id.cmp(&b.id)));
        ordered.extend(rest.into_iter().cloned());
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AssetId, AssetSymbol, Decimal, LinkMetadata, LinkType, MatchCriteria, SourceType, TimeMs,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn tx(id: &str, time_ms: i64) -> Transaction {
        Transaction {
            id: TxId::new(id),
            external_id: None,
            source_name: "kraken".to_string(),
            source_type: SourceType::Exchange,
            time_ms: TimeMs::new(time_ms),
            tx_hash: None,
            inflows: vec![],
            outflows: vec![],
            fees: vec![],
        }
    }

    fn link(source: &str, target: &str, status: LinkStatus) -> TransactionLink {
        let now = Utc::now();
        TransactionLink {
            id: Uuid::new_v4(),
            source_transaction_id: TxId::new(source),
            target_transaction_id: TxId::new(target),
            asset_id: AssetId::new("bitcoin"),
            asset_symbol: AssetSymbol::new("BTC"),
            source_amount: Decimal::one(),
            target_amount: Decimal::one(),
            link_type: LinkType::ExchangeToBlockchain,
            confidence_score: Decimal::one(),
            match_criteria: MatchCriteria {
                asset_match: true,
                amount_similarity: Decimal::one(),
                timing_valid: true,
                timing_hours: 0.1,
                address_match: None,
                hash_match: None,
            },
            status,
            reviewed_by: None,
            reviewed_at: None,
            metadata: LinkMetadata {
                variance: Decimal::zero(),
                variance_pct: Decimal::zero(),
                implied_fee: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn ids(ordered: &[Transaction]) -> Vec<&str> {
        ordered.iter().map(|tx| tx.id.as_str()).collect()
    }

    #[test]
    fn test_chronological_without_links() {
        let txs = vec![tx("c", 3000), tx("a", 1000), tx("b", 2000)];
        let ordered = sort_with_logical_ordering(&txs, &[]);
        assert_eq!(ids(&ordered), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_link_source_precedes_target() {
        // The deposit was recorded before the withdrawal (clock skew), but
        // the link still forces the source first.
        let txs = vec![tx("deposit", 1000), tx("withdrawal", 2000)];
        let links = vec![link("withdrawal", "deposit", LinkStatus::Confirmed)];

        let ordered = sort_with_logical_ordering(&txs, &links);
        assert_eq!(ids(&ordered), vec!["withdrawal", "deposit"]);
    }

    #[test]
    fn test_suggested_links_do_not_constrain() {
        let txs = vec![tx("deposit", 1000), tx("withdrawal", 2000)];
        let links = vec![link("withdrawal", "deposit", LinkStatus::Suggested)];

        let ordered = sort_with_logical_ordering(&txs, &links);
        assert_eq!(ids(&ordered), vec!["deposit", "withdrawal"]);
    }

    #[test]
    fn test_chronological_tiebreak_among_ready() {
        let txs = vec![
            tx("w-1", 1000),
            tx("d-1", 5000),
            tx("other", 2000),
        ];
        let links = vec![link("w-1", "d-1", LinkStatus::Confirmed)];

        let ordered = sort_with_logical_ordering(&txs, &links);
        assert_eq!(ids(&ordered), vec!["w-1", "other", "d-1"]);
    }

    #[test]
    fn test_chain_of_links() {
        // a -> b -> c despite reversed timestamps.
        let txs = vec![tx("c", 1000), tx("b", 2000), tx("a", 3000)];
        let links = vec![
            link("a", "b", LinkStatus::Confirmed),
            link("b", "c", LinkStatus::Confirmed),
        ];

        let ordered = sort_with_logical_ordering(&txs, &links);
        assert_eq!(ids(&ordered), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_falls_back_chronologically() {
        let txs = vec![tx("a", 2000), tx("b", 1000)];
        let links = vec![
            link("a", "b", LinkStatus::Confirmed),
            link("b", "a", LinkStatus::Confirmed),
        ];

        let ordered = sort_with_logical_ordering(&txs, &links);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ids(&ordered), vec!["b", "a"]);
    }

    #[test]
    fn test_graph_ignores_unknown_transactions() {
        let txs = vec![tx("a", 1000)];
        let links = vec![link("a", "ghost", LinkStatus::Confirmed)];
        let graph = build_dependency_graph(&txs, &links);
        assert!(graph.is_empty());
    }
}
