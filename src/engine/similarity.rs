//! Match criteria primitives: amount, timing, hash, and address comparison.

use crate::domain::Decimal;
use crate::domain::TimeMs;
use std::str::FromStr;

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Target excess tolerated as rounding noise, as a fraction of the source.
fn rounding_tolerance() -> Decimal {
    Decimal::from_str("0.001").expect("valid decimal")
}

/// Similarity of a target (deposit) amount to a source (withdrawal) amount.
///
/// `target / source` when the target does not exceed the source, clamped to
/// [0, 1]. A target exceeding the source by at most 0.1% is treated as
/// rounding noise and scored 0.99; a larger excess scores 0.
pub fn calculate_amount_similarity(source_amount: Decimal, target_amount: Decimal) -> Decimal {
    if !source_amount.is_positive() || !target_amount.is_positive() {
        return Decimal::zero();
    }

    if target_amount <= source_amount {
        let ratio = target_amount / source_amount;
        return ratio.min(Decimal::one()).max(Decimal::zero());
    }

    let excess = (target_amount - source_amount) / source_amount;
    if excess <= rounding_tolerance() {
        Decimal::from_str("0.99").expect("valid decimal")
    } else {
        Decimal::zero()
    }
}

/// Hours elapsed from source to target.
///
/// Infinite when the target precedes the source; a deposit cannot arrive
/// before its withdrawal.
pub fn calculate_time_difference_hours(source_time: TimeMs, target_time: TimeMs) -> f64 {
    let delta_ms = target_time.as_ms() - source_time.as_ms();
    if delta_ms < 0 {
        f64::INFINITY
    } else {
        delta_ms as f64 / MS_PER_HOUR
    }
}

/// True when the source-to-target gap is within the matching window.
pub fn is_timing_valid(timing_hours: f64, max_window_hours: f64) -> bool {
    timing_hours.is_finite() && (0.0..=max_window_hours).contains(&timing_hours)
}

/// Split a `-<logIndex>` suffix off a hash, when present.
fn split_log_index(hash: &str) -> (&str, Option<&str>) {
    match hash.rsplit_once('-') {
        Some((base, suffix))
            if !base.is_empty()
                && !suffix.is_empty()
                && suffix.chars().all(|c| c.is_ascii_digit()) =>
        {
            (base, Some(suffix))
        }
        _ => (hash, None),
    }
}

fn is_hex_hash(hash: &str) -> bool {
    hash.len() > 2 && (hash.starts_with("0x") || hash.starts_with("0X"))
}

fn hashes_equal(a: &str, b: &str) -> bool {
    if is_hex_hash(a) && is_hex_hash(b) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// Compare two chain hashes for the hash-match fast path.
///
/// A `-<logIndex>` suffix is stripped only when exactly one side carries
/// one (a per-event row matched against a whole-transaction hash). When
/// both sides carry log indices the full strings must match exactly.
/// Comparison is case-insensitive only for 0x-prefixed hex hashes.
pub fn check_transaction_hash_match(a: &str, b: &str) -> bool {
    let (base_a, idx_a) = split_log_index(a);
    let (base_b, idx_b) = split_log_index(b);

    let (lhs, rhs) = match (idx_a, idx_b) {
        (Some(_), Some(_)) => (a, b),
        (Some(_), None) => (base_a, b),
        (None, Some(_)) => (a, base_b),
        (None, None) => (a, b),
    };

    hashes_equal(lhs, rhs)
}

/// Compare destination addresses when both sides carry one.
///
/// None when either side lacks address data; the criterion is then not
/// determinable and carries no weight.
pub fn check_address_match(source_to: Option<&str>, target_to: Option<&str>) -> Option<bool> {
    match (source_to, target_to) {
        (Some(a), Some(b)) => Some(hashes_equal(a, b)),
        _ => None,
    }
}
