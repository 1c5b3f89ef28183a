//! Transfer links between transactions and their match metadata.

use crate::domain::{AssetId, AssetSymbol, Decimal, TransactionCandidate, TxId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Computed match criteria for a candidate pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCriteria {
    pub asset_match: bool,
    /// Similarity of target to source amount, in [0, 1].
    pub amount_similarity: Decimal,
    pub timing_valid: bool,
    /// Hours from source to target; infinite when the order is wrong.
    /// Hash matches ignore timing, so a persisted link can carry an
    /// infinite value; JSON has no Infinity, so it round-trips as null.
    #[serde(with = "infinite_as_null")]
    pub timing_hours: f64,
    /// None when neither side carries address data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_match: Option<bool>,
    /// None when either side lacks a chain hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_match: Option<bool>,
}

impl MatchCriteria {
    /// True for a verified on-chain hash pairing.
    pub fn is_hash_match(&self) -> bool {
        self.hash_match == Some(true)
    }
}

mod infinite_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
    }
}

/// A scored candidate pairing, consumed immediately by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialMatch {
    pub source: TransactionCandidate,
    pub target: TransactionCandidate,
    pub criteria: MatchCriteria,
    pub confidence_score: Decimal,
    pub link_type: LinkType,
}

impl PotentialMatch {
    /// True for a verified on-chain hash pairing.
    pub fn is_hash_match(&self) -> bool {
        self.criteria.is_hash_match()
    }
}

/// Pairing of source and target platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    ExchangeToBlockchain,
    BlockchainToBlockchain,
    ExchangeToExchange,
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkType::ExchangeToBlockchain => write!(f, "exchange_to_blockchain"),
            LinkType::BlockchainToBlockchain => write!(f, "blockchain_to_blockchain"),
            LinkType::ExchangeToExchange => write!(f, "exchange_to_exchange"),
        }
    }
}

/// Review lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Suggested,
    Confirmed,
    Rejected,
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Suggested => write!(f, "suggested"),
            LinkStatus::Confirmed => write!(f, "confirmed"),
            LinkStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Audit metadata recorded when a link is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    /// Source amount minus target amount.
    pub variance: Decimal,
    /// Variance as a percentage of the source amount.
    pub variance_pct: Decimal,
    /// Positive variance interpreted as the network/platform fee.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implied_fee: Option<Decimal>,
}

/// Durable record of a resolved match between two transactions.
///
/// Created as `suggested` or auto-`confirmed`; review transitions it to
/// `confirmed` or `rejected`. Immutable once confirmed except for the
/// review fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLink {
    pub id: Uuid,
    pub source_transaction_id: TxId,
    pub target_transaction_id: TxId,
    pub asset_id: AssetId,
    pub asset_symbol: AssetSymbol,
    pub source_amount: Decimal,
    pub target_amount: Decimal,
    pub link_type: LinkType,
    pub confidence_score: Decimal,
    pub match_criteria: MatchCriteria,
    pub status: LinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub metadata: LinkMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionLink {
    /// Apply a manual review decision.
    pub fn reviewed(mut self, status: LinkStatus, reviewer: impl Into<String>) -> Self {
        self.status = status;
        self.reviewed_by = Some(reviewer.into());
        self.reviewed_at = Some(Utc::now());
        self.updated_at = Utc::now();
        self
    }
}
