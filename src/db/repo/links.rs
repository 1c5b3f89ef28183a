//! Transaction link persistence.

use super::{decode_err, decode_msg, parse_datetime, parse_decimal, parse_uuid, Repository};
use crate::domain::{
    AssetId, AssetSymbol, LinkMetadata, LinkStatus, LinkType, MatchCriteria, TransactionLink, TxId,
};
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

fn link_type_to_str(link_type: LinkType) -> &'static str {
    match link_type {
        LinkType::ExchangeToBlockchain => "exchange_to_blockchain",
        LinkType::BlockchainToBlockchain => "blockchain_to_blockchain",
        LinkType::ExchangeToExchange => "exchange_to_exchange",
    }
}

fn link_type_from_str(text: &str) -> Result<LinkType, sqlx::Error> {
    match text {
        "exchange_to_blockchain" => Ok(LinkType::ExchangeToBlockchain),
        "blockchain_to_blockchain" => Ok(LinkType::BlockchainToBlockchain),
        "exchange_to_exchange" => Ok(LinkType::ExchangeToExchange),
        other => Err(decode_msg(format!("unknown link type: {}", other))),
    }
}

fn status_to_str(status: LinkStatus) -> &'static str {
    match status {
        LinkStatus::Suggested => "suggested",
        LinkStatus::Confirmed => "confirmed",
        LinkStatus::Rejected => "rejected",
    }
}

fn status_from_str(text: &str) -> Result<LinkStatus, sqlx::Error> {
    match text {
        "suggested" => Ok(LinkStatus::Suggested),
        "confirmed" => Ok(LinkStatus::Confirmed),
        "rejected" => Ok(LinkStatus::Rejected),
        other => Err(decode_msg(format!("unknown link status: {}", other))),
    }
}

fn row_to_link(row: &sqlx::sqlite::SqliteRow) -> Result<TransactionLink, sqlx::Error> {
    let match_criteria: MatchCriteria =
        serde_json::from_str(&row.get::<String, _>("match_criteria")).map_err(decode_err)?;
    let metadata: LinkMetadata =
        serde_json::from_str(&row.get::<String, _>("metadata")).map_err(decode_err)?;

    Ok(TransactionLink {
        id: parse_uuid(&row.get::<String, _>("id"))?,
        source_transaction_id: TxId::new(row.get::<String, _>("source_transaction_id")),
        target_transaction_id: TxId::new(row.get::<String, _>("target_transaction_id")),
        asset_id: AssetId::new(row.get::<String, _>("asset_id")),
        asset_symbol: AssetSymbol::new(row.get::<String, _>("asset_symbol")),
        source_amount: parse_decimal(&row.get::<String, _>("source_amount"))?,
        target_amount: parse_decimal(&row.get::<String, _>("target_amount"))?,
        link_type: link_type_from_str(&row.get::<String, _>("link_type"))?,
        confidence_score: parse_decimal(&row.get::<String, _>("confidence_score"))?,
        match_criteria,
        status: status_from_str(&row.get::<String, _>("status"))?,
        reviewed_by: row.get::<Option<String>, _>("reviewed_by"),
        reviewed_at: row
            .get::<Option<String>, _>("reviewed_at")
            .as_deref()
            .map(parse_datetime)
            .transpose()?,
        metadata,
        created_at: parse_datetime(&row.get::<String, _>("created_at"))?,
        updated_at: parse_datetime(&row.get::<String, _>("updated_at"))?,
    })
}

impl Repository {
    /// Insert links in one transaction; an existing link for the same
    /// source/target/asset triple is left untouched.
    ///
    /// Returns the number of newly inserted links.
    pub async fn insert_links_batch(
        &self,
        links: &[TransactionLink],
    ) -> Result<usize, sqlx::Error> {
        if links.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut db_tx = self.pool().begin().await?;

        for link in links {
            let match_criteria =
                serde_json::to_string(&link.match_criteria).map_err(decode_err)?;
            let metadata = serde_json::to_string(&link.metadata).map_err(decode_err)?;

            let result = sqlx::query(
                r#"
                INSERT INTO transaction_links
                    (id, source_transaction_id, target_transaction_id, asset_id, asset_symbol,
                     source_amount, target_amount, link_type, confidence_score, match_criteria,
                     status, reviewed_by, reviewed_at, metadata, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_transaction_id, target_transaction_id, asset_id) DO NOTHING
                "#,
            )
            .bind(link.id.to_string())
            .bind(link.source_transaction_id.as_str())
            .bind(link.target_transaction_id.as_str())
            .bind(link.asset_id.as_str())
            .bind(link.asset_symbol.as_str())
            .bind(link.source_amount.to_canonical_string())
            .bind(link.target_amount.to_canonical_string())
            .bind(link_type_to_str(link.link_type))
            .bind(link.confidence_score.to_canonical_string())
            .bind(match_criteria)
            .bind(status_to_str(link.status))
            .bind(link.reviewed_by.as_deref())
            .bind(link.reviewed_at.map(|dt| dt.to_rfc3339()))
            .bind(metadata)
            .bind(link.created_at.to_rfc3339())
            .bind(link.updated_at.to_rfc3339())
            .execute(&mut *db_tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        db_tx.commit().await?;
        Ok(total_inserted)
    }

    /// Fetch links, optionally filtered by status, newest first.
    pub async fn fetch_links(
        &self,
        status: Option<LinkStatus>,
    ) -> Result<Vec<TransactionLink>, sqlx::Error> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM transaction_links WHERE status = ? ORDER BY created_at DESC",
                )
                .bind(status_to_str(status))
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM transaction_links ORDER BY created_at DESC")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.iter().map(row_to_link).collect()
    }

    /// Fetch a single link by id.
    pub async fn fetch_link(&self, id: Uuid) -> Result<Option<TransactionLink>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM transaction_links WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_link).transpose()
    }

    /// Record a manual review decision. Returns false when the link does
    /// not exist.
    pub async fn update_link_review(
        &self,
        id: Uuid,
        status: LinkStatus,
        reviewed_by: &str,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE transaction_links
            SET status = ?, reviewed_by = ?, reviewed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status_to_str(status))
        .bind(reviewed_by)
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
