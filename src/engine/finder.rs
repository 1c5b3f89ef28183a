//! Scoring inflow candidates against an outflow candidate.

use crate::domain::{
    Decimal, LinkType, MatchCriteria, PotentialMatch, SourceType, TransactionCandidate,
};
use crate::engine::similarity::{
    calculate_amount_similarity, calculate_time_difference_hours, check_address_match,
    check_transaction_hash_match, is_timing_valid,
};
use std::str::FromStr;
use tracing::debug;

/// Thresholds and weights for the matching run.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Maximum source-to-target gap in hours.
    pub max_timing_window_hours: f64,
    /// Minimum amount similarity for a heuristic match.
    pub min_amount_similarity: Decimal,
    /// Minimum confidence for a heuristic match to be kept at all.
    pub min_confidence_score: Decimal,
    /// Confidence at which an accepted match skips manual review.
    pub auto_confirm_threshold: Decimal,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            max_timing_window_hours: 48.0,
            min_amount_similarity: Decimal::from_str("0.95").expect("valid decimal"),
            min_confidence_score: Decimal::from_str("0.7").expect("valid decimal"),
            auto_confirm_threshold: Decimal::from_str("0.95").expect("valid decimal"),
        }
    }
}

fn weight(s: &str) -> Decimal {
    Decimal::from_str(s).expect("valid decimal")
}

/// Compute all comparison criteria for a candidate pair.
pub fn build_match_criteria(
    source: &TransactionCandidate,
    target: &TransactionCandidate,
    config: &MatchingConfig,
) -> MatchCriteria {
    let timing_hours = calculate_time_difference_hours(source.time_ms, target.time_ms);
    let hash_match = match (&source.tx_hash, &target.tx_hash) {
        (Some(a), Some(b)) => Some(check_transaction_hash_match(a, b)),
        _ => None,
    };

    MatchCriteria {
        asset_match: source.asset_id == target.asset_id,
        amount_similarity: calculate_amount_similarity(source.amount, target.amount),
        timing_valid: is_timing_valid(timing_hours, config.max_timing_window_hours),
        timing_hours,
        address_match: check_address_match(
            source.to_address.as_deref(),
            target.to_address.as_deref(),
        ),
        hash_match,
    }
}

/// Weighted confidence over the criteria that could be evaluated.
///
/// Weights: asset 30%, amount up to 40%, timing 20% plus a 5% bonus for a
/// gap of at most one hour, destination address 10%. An undeterminable
/// address drops out of the denominator rather than depressing the score;
/// an address mismatch (like an asset mismatch) zeroes the result. Rounded
/// to 6 decimal places, half up, for deterministic thresholding.
pub fn calculate_confidence_score(criteria: &MatchCriteria) -> Decimal {
    if !criteria.asset_match {
        return Decimal::zero();
    }
    if criteria.address_match == Some(false) {
        return Decimal::zero();
    }

    let mut score = weight("0.30");
    score += criteria.amount_similarity * weight("0.40");
    if criteria.timing_valid {
        score += weight("0.20");
        if criteria.timing_hours <= 1.0 {
            score += weight("0.05");
        }
    }

    let denominator = if criteria.address_match.is_some() {
        if criteria.address_match == Some(true) {
            score += weight("0.10");
        }
        weight("1.05")
    } else {
        weight("0.95")
    };

    (score / denominator).round_dp_half_up(6)
}

/// Derive the link type from the source/target platform pairing.
///
/// A blockchain source paired with an exchange target has no dedicated
/// variant and falls back to `exchange_to_blockchain`; the pairing is
/// recorded as-is for review rather than invented here.
pub fn determine_link_type(source: SourceType, target: SourceType) -> LinkType {
    match (source, target) {
        (SourceType::Exchange, SourceType::Blockchain) => LinkType::ExchangeToBlockchain,
        (SourceType::Blockchain, SourceType::Blockchain) => LinkType::BlockchainToBlockchain,
        (SourceType::Exchange, SourceType::Exchange) => LinkType::ExchangeToExchange,
        (SourceType::Blockchain, SourceType::Exchange) => {
            debug!("blockchain->exchange pairing has no dedicated link type, using fallback");
            LinkType::ExchangeToBlockchain
        }
    }
}

/// Find and rank all plausible matches for one outflow candidate.
///
/// Hard filters (self, direction, asset) are skipped, not scored. A
/// verified hash pairing short-circuits to confidence 1.0 unless the pair
/// is blockchain-to-blockchain (internal-transfer territory) or the
/// multi-output sum check fails, in which case the pair is scored
/// heuristically like any other.
pub fn find_potential_matches(
    source: &TransactionCandidate,
    targets: &[TransactionCandidate],
    config: &MatchingConfig,
) -> Vec<PotentialMatch> {
    if !source.is_outflow() {
        return Vec::new();
    }

    // Sum of inflow amounts claiming the source's hash, for the
    // multi-output validation below.
    let hash_claimed_total: Decimal = match &source.tx_hash {
        Some(source_hash) => targets
            .iter()
            .filter(|t| {
                t.transaction_id != source.transaction_id
                    && t.is_inflow()
                    && t.asset_id == source.asset_id
                    && t.tx_hash
                        .as_deref()
                        .map(|h| check_transaction_hash_match(source_hash, h))
                        .unwrap_or(false)
            })
            .map(|t| t.amount)
            .sum(),
        None => Decimal::zero(),
    };
    let hash_outputs_fit = hash_claimed_total <= source.amount;

    let mut matches = Vec::new();

    for target in targets {
        if target.transaction_id == source.transaction_id {
            continue;
        }
        if !target.is_inflow() {
            continue;
        }
        if target.asset_id != source.asset_id {
            continue;
        }

        let criteria = build_match_criteria(source, target, config);
        let link_type = determine_link_type(source.source_type, target.source_type);

        if criteria.is_hash_match()
            && link_type != LinkType::BlockchainToBlockchain
            && hash_outputs_fit
        {
            matches.push(PotentialMatch {
                source: source.clone(),
                target: target.clone(),
                criteria,
                confidence_score: Decimal::one(),
                link_type,
            });
            continue;
        }

        if !criteria.timing_valid {
            continue;
        }
        if criteria.amount_similarity < config.min_amount_similarity {
            continue;
        }
        let confidence_score = calculate_confidence_score(&criteria);
        if confidence_score < config.min_confidence_score {
            continue;
        }

        matches.push(PotentialMatch {
            source: source.clone(),
            target: target.clone(),
            criteria,
            confidence_score,
            link_type,
        });
    }

    matches.sort_by(|a, b| {
        b.confidence_score
            .cmp(&a.confidence_score)
            .then_with(|| b.is_hash_match().cmp(&a.is_hash_match()))
            .then_with(|| a.target.transaction_id.cmp(&b.target.transaction_id))
    });

    matches
}
