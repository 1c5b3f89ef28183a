//! Global assignment of potential matches and link creation.

use crate::domain::{
    AssetId, Decimal, LinkMetadata, LinkStatus, PotentialMatch, TransactionLink, TxId,
};
use crate::engine::finder::MatchingConfig;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Accepted matches split by review requirement.
#[derive(Debug, Default)]
pub struct ResolvedMatches {
    /// Confidence at or above the auto-confirm threshold.
    pub confirmed: Vec<PotentialMatch>,
    /// Kept, but waiting for manual review.
    pub suggested: Vec<PotentialMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceUse {
    Hash,
    NonHash,
}

type CandidateKey = (TxId, AssetId);

fn source_key(m: &PotentialMatch) -> CandidateKey {
    (m.source.transaction_id.clone(), m.source.asset_id.clone())
}

fn target_key(m: &PotentialMatch) -> CandidateKey {
    (m.target.transaction_id.clone(), m.target.asset_id.clone())
}

/// Reduce scored matches to a consistent global assignment.
///
/// Matches are taken greedily by confidence, hash matches winning ties. A
/// target is consumed by at most one accepted match. A source is consumed
/// by at most one non-hash match, but may fund several hash matches (one
/// on-chain transaction paying multiple deposits) as long as no non-hash
/// match claimed it.
pub fn deduplicate_and_confirm(
    matches: Vec<PotentialMatch>,
    config: &MatchingConfig,
) -> ResolvedMatches {
    let mut sorted = matches;
    sorted.sort_by(|a, b| {
        b.confidence_score
            .cmp(&a.confidence_score)
            .then_with(|| b.is_hash_match().cmp(&a.is_hash_match()))
            .then_with(|| a.source.transaction_id.cmp(&b.source.transaction_id))
            .then_with(|| a.target.transaction_id.cmp(&b.target.transaction_id))
    });

    let mut used_targets: HashSet<CandidateKey> = HashSet::new();
    let mut source_use: HashMap<CandidateKey, SourceUse> = HashMap::new();
    let mut resolved = ResolvedMatches::default();

    for m in sorted {
        if used_targets.contains(&target_key(&m)) {
            continue;
        }

        let key = source_key(&m);
        let accepted = if m.is_hash_match() {
            source_use.get(&key) != Some(&SourceUse::NonHash)
        } else {
            !source_use.contains_key(&key)
        };
        if !accepted {
            continue;
        }

        used_targets.insert(target_key(&m));
        source_use.insert(
            key,
            if m.is_hash_match() {
                SourceUse::Hash
            } else {
                SourceUse::NonHash
            },
        );

        if m.confidence_score >= config.auto_confirm_threshold {
            resolved.confirmed.push(m);
        } else {
            resolved.suggested.push(m);
        }
    }

    resolved
}

/// A link amount pairing that cannot represent a real transfer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkValidationError {
    #[error("source amount must be positive, got {0}")]
    NonPositiveSource(Decimal),
    #[error("target amount must be positive, got {0}")]
    NonPositiveTarget(Decimal),
    #[error("target amount {target} exceeds source amount {source_amount}")]
    TargetExceedsSource {
        source_amount: Decimal,
        target: Decimal,
    },
    #[error("variance {variance_pct}% between source {source_amount} and target {target} exceeds 10%")]
    VarianceTooHigh {
        source_amount: Decimal,
        target: Decimal,
        variance_pct: Decimal,
    },
}

/// Validate the amount pairing of a match before a link is recorded.
///
/// A deposit cannot exceed its withdrawal beyond rounding noise (0.1%);
/// verified hash matches get 1% headroom because per-address UTXO data can
/// understate the source side. A variance above 10% means the pair is not
/// the same transfer regardless of how it was matched.
pub fn validate_link_amounts(
    source_amount: Decimal,
    target_amount: Decimal,
    hash_match: bool,
) -> Result<(), LinkValidationError> {
    if !source_amount.is_positive() {
        return Err(LinkValidationError::NonPositiveSource(source_amount));
    }
    if !target_amount.is_positive() {
        return Err(LinkValidationError::NonPositiveTarget(target_amount));
    }

    if target_amount > source_amount {
        let excess = (target_amount - source_amount) / source_amount;
        let allowed = if hash_match {
            Decimal::from_str("0.01").expect("valid decimal")
        } else {
            Decimal::from_str("0.001").expect("valid decimal")
        };
        if excess > allowed {
            return Err(LinkValidationError::TargetExceedsSource {
                source_amount,
                target: target_amount,
            });
        }
    }

    let variance_pct =
        (source_amount - target_amount).abs() / source_amount * Decimal::hundred();
    if variance_pct > Decimal::from_str("10").expect("valid decimal") {
        return Err(LinkValidationError::VarianceTooHigh {
            source_amount,
            target: target_amount,
            variance_pct,
        });
    }

    Ok(())
}

/// Materialize an accepted match as a durable link with audit metadata.
pub fn create_transaction_link(
    m: &PotentialMatch,
    status: LinkStatus,
) -> Result<TransactionLink, LinkValidationError> {
    validate_link_amounts(m.source.amount, m.target.amount, m.is_hash_match())?;

    let variance = m.source.amount - m.target.amount;
    let variance_pct = variance.abs() / m.source.amount * Decimal::hundred();
    let implied_fee = if variance.is_positive() {
        Some(variance)
    } else {
        None
    };

    let now = Utc::now();
    Ok(TransactionLink {
        id: Uuid::new_v4(),
        source_transaction_id: m.source.transaction_id.clone(),
        target_transaction_id: m.target.transaction_id.clone(),
        asset_id: m.source.asset_id.clone(),
        asset_symbol: m.source.asset_symbol.clone(),
        source_amount: m.source.amount,
        target_amount: m.target.amount,
        link_type: m.link_type,
        confidence_score: m.confidence_score,
        match_criteria: m.criteria.clone(),
        status,
        reviewed_by: None,
        reviewed_at: None,
        metadata: LinkMetadata {
            variance,
            variance_pct,
            implied_fee,
        },
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AssetSymbol, Direction, LinkType, MatchCriteria, SourceType, TimeMs, TransactionCandidate,
    };

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn candidate(id: &str, direction: Direction, amount: &str) -> TransactionCandidate {
        TransactionCandidate {
            transaction_id: TxId::new(id),
            external_id: None,
            source_name: "kraken".to_string(),
            source_type: SourceType::Exchange,
            time_ms: TimeMs::new(0),
            asset_id: AssetId::new("bitcoin"),
            asset_symbol: AssetSymbol::new("BTC"),
            amount: d(amount),
            direction,
            from_address: None,
            to_address: None,
            tx_hash: None,
        }
    }

    fn potential(
        source_id: &str,
        target_id: &str,
        confidence: &str,
        hash_match: bool,
    ) -> PotentialMatch {
        PotentialMatch {
            source: candidate(source_id, Direction::Out, "1.0"),
            target: candidate(target_id, Direction::In, "0.999"),
            criteria: MatchCriteria {
                asset_match: true,
                amount_similarity: d("0.999"),
                timing_valid: true,
                timing_hours: 0.1,
                address_match: None,
                hash_match: if hash_match { Some(true) } else { None },
            },
            confidence_score: d(confidence),
            link_type: LinkType::ExchangeToBlockchain,
        }
    }

    #[test]
    fn test_dedup_one_target_one_accepted_match() {
        let config = MatchingConfig::default();
        let matches = vec![
            potential("s-1", "t-1", "0.99", false),
            potential("s-2", "t-1", "0.98", false),
        ];

        let resolved = deduplicate_and_confirm(matches, &config);
        let accepted: Vec<_> = resolved
            .confirmed
            .iter()
            .chain(resolved.suggested.iter())
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].source.transaction_id, TxId::new("s-1"));
    }

    #[test]
    fn test_dedup_source_single_non_hash_match() {
        let config = MatchingConfig::default();
        let matches = vec![
            potential("s-1", "t-1", "0.99", false),
            potential("s-1", "t-2", "0.98", false),
        ];

        let resolved = deduplicate_and_confirm(matches, &config);
        let accepted: Vec<_> = resolved
            .confirmed
            .iter()
            .chain(resolved.suggested.iter())
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].target.transaction_id, TxId::new("t-1"));
    }

    #[test]
    fn test_dedup_source_may_fund_multiple_hash_matches() {
        let config = MatchingConfig::default();
        let matches = vec![
            potential("s-1", "t-1", "1", true),
            potential("s-1", "t-2", "1", true),
            // Competing non-hash pairing loses to the hash assignments.
            potential("s-1", "t-3", "0.9", false),
        ];

        let resolved = deduplicate_and_confirm(matches, &config);
        let accepted: Vec<_> = resolved
            .confirmed
            .iter()
            .chain(resolved.suggested.iter())
            .collect();
        assert_eq!(accepted.len(), 2);
        assert!(accepted.iter().all(|m| m.is_hash_match()));
    }

    #[test]
    fn test_dedup_hash_wins_confidence_tie() {
        let config = MatchingConfig::default();
        let matches = vec![
            potential("s-1", "t-1", "1", false),
            potential("s-2", "t-1", "1", true),
        ];

        let resolved = deduplicate_and_confirm(matches, &config);
        let accepted: Vec<_> = resolved
            .confirmed
            .iter()
            .chain(resolved.suggested.iter())
            .collect();
        assert_eq!(accepted.len(), 1);
        assert!(accepted[0].is_hash_match());
        assert_eq!(accepted[0].source.transaction_id, TxId::new("s-2"));
    }

    #[test]
    fn test_split_by_auto_confirm_threshold() {
        let config = MatchingConfig::default();
        let matches = vec![
            potential("s-1", "t-1", "0.99", false),
            potential("s-2", "t-2", "0.8", false),
        ];

        let resolved = deduplicate_and_confirm(matches, &config);
        assert_eq!(resolved.confirmed.len(), 1);
        assert_eq!(resolved.confirmed[0].source.transaction_id, TxId::new("s-1"));
        assert_eq!(resolved.suggested.len(), 1);
        assert_eq!(resolved.suggested[0].source.transaction_id, TxId::new("s-2"));
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        assert_eq!(
            validate_link_amounts(d("0"), d("1"), false),
            Err(LinkValidationError::NonPositiveSource(d("0")))
        );
        assert_eq!(
            validate_link_amounts(d("1"), d("-1"), false),
            Err(LinkValidationError::NonPositiveTarget(d("-1")))
        );
    }

    #[test]
    fn test_validate_rejects_oversized_target() {
        let err = validate_link_amounts(d("1.0"), d("1.15"), false).unwrap_err();
        assert!(err.to_string().contains("exceeds source amount"));
    }

    #[test]
    fn test_validate_hash_match_allows_small_excess() {
        // 0.5% excess: fine for a verified hash match, rejected otherwise.
        assert!(validate_link_amounts(d("1.0"), d("1.005"), true).is_ok());
        assert!(validate_link_amounts(d("1.0"), d("1.005"), false).is_err());
        // Beyond 1% even a hash match is rejected.
        assert!(validate_link_amounts(d("1.0"), d("1.02"), true).is_err());
    }

    #[test]
    fn test_validate_rejects_high_variance() {
        let err = validate_link_amounts(d("1.0"), d("0.85"), false).unwrap_err();
        assert!(matches!(err, LinkValidationError::VarianceTooHigh { .. }));
    }

    #[test]
    fn test_create_link_records_variance_metadata() {
        let m = potential("s-1", "t-1", "0.99", false);
        let link = create_transaction_link(&m, LinkStatus::Confirmed).unwrap();

        assert_eq!(link.source_amount, d("1.0"));
        assert_eq!(link.target_amount, d("0.999"));
        assert_eq!(link.metadata.variance, d("0.001"));
        assert_eq!(link.metadata.implied_fee, Some(d("0.001")));
        assert_eq!(link.status, LinkStatus::Confirmed);
        assert_eq!(link.metadata.variance_pct, d("0.1"));
    }
}
