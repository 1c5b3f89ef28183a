//! Normalized transaction model shared by all importers.

use crate::domain::{AssetMovement, SourceType, TimeMs, TxId};
use serde::{Deserialize, Serialize};

/// A normalized transaction from any exchange or blockchain source.
///
/// Importers translate raw source formats into this shape; everything past
/// ingestion operates on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Stable unique identifier for this transaction.
    pub id: TxId,
    /// Source-assigned identifier, when the source provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Name of the originating source (e.g. "kraken", "bitcoin").
    pub source_name: String,
    /// Kind of source the transaction came from.
    pub source_type: SourceType,
    /// Time of the transaction in milliseconds since Unix epoch.
    pub time_ms: TimeMs,
    /// On-chain transaction hash, for blockchain transactions. May carry a
    /// `-<logIndex>` suffix for per-event rows on account-based chains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Assets received.
    pub inflows: Vec<AssetMovement>,
    /// Assets sent.
    pub outflows: Vec<AssetMovement>,
    /// Fees paid, as movements in the fee asset.
    pub fees: Vec<AssetMovement>,
}

impl Transaction {
    /// Generate a stable unique key for a transaction.
    ///
    /// Priority: `external_id` (if present) > hash of deterministic fields.
    pub fn compute_tx_key(
        external_id: Option<&str>,
        source_name: &str,
        time_ms: TimeMs,
        tx_hash: Option<&str>,
        movement_fingerprint: &str,
    ) -> String {
        if let Some(external_id) = external_id {
            return format!("ext:{}:{}", source_name, external_id);
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(source_name);
        hasher.update(time_ms.as_ms().to_le_bytes());
        if let Some(hash) = tx_hash {
            hasher.update(hash);
        }
        hasher.update(movement_fingerprint);
        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }

    /// Deterministic fingerprint over this transaction's movements, used as
    /// hash input when the source provides no external id.
    pub fn movement_fingerprint(&self) -> String {
        let mut parts = Vec::new();
        for m in &self.inflows {
            parts.push(format!("i:{}:{}", m.asset_id, m.amount.to_canonical_string()));
        }
        for m in &self.outflows {
            parts.push(format!("o:{}:{}", m.asset_id, m.amount.to_canonical_string()));
        }
        for m in &self.fees {
            parts.push(format!("f:{}:{}", m.asset_id, m.amount.to_canonical_string()));
        }
        parts.join("|")
    }

    /// Stable key for idempotent ingestion.
    pub fn tx_key(&self) -> String {
        Self::compute_tx_key(
            self.external_id.as_deref(),
            &self.source_name,
            self.time_ms,
            self.tx_hash.as_deref(),
            &self.movement_fingerprint(),
        )
    }
}
