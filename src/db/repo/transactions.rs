//! Transaction persistence: rows plus movement JSON with string decimals.

use super::{decode_err, decode_msg, parse_decimal, Repository};
use crate::domain::{
    AssetId, AssetMovement, AssetSymbol, PriceAtTxTime, PriceGranularity, PriceSource, SourceType,
    TimeMs, Transaction, TxId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

/// Movement shape persisted as JSON. Decimal fields are canonical strings
/// so storage stays lossless regardless of the API's number encoding.
#[derive(Debug, Serialize, Deserialize)]
struct MovementRecord {
    asset_id: String,
    asset_symbol: String,
    amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    net_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price_at_tx_time: Option<PriceRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PriceRecord {
    amount: String,
    currency: String,
    source: PriceSource,
    fetched_at: DateTime<Utc>,
    granularity: PriceGranularity,
}

fn movement_to_record(movement: &AssetMovement) -> MovementRecord {
    MovementRecord {
        asset_id: movement.asset_id.as_str().to_string(),
        asset_symbol: movement.asset_symbol.as_str().to_string(),
        amount: movement.amount.to_canonical_string(),
        net_amount: movement.net_amount.map(|d| d.to_canonical_string()),
        from_address: movement.from_address.clone(),
        to_address: movement.to_address.clone(),
        price_at_tx_time: movement.price_at_tx_time.as_ref().map(|price| PriceRecord {
            amount: price.amount.to_canonical_string(),
            currency: price.currency.as_str().to_string(),
            source: price.source,
            fetched_at: price.fetched_at,
            granularity: price.granularity,
        }),
    }
}

fn record_to_movement(record: MovementRecord) -> Result<AssetMovement, sqlx::Error> {
    let price_at_tx_time = match record.price_at_tx_time {
        Some(price) => Some(PriceAtTxTime {
            amount: parse_decimal(&price.amount)?,
            currency: AssetSymbol::new(price.currency),
            source: price.source,
            fetched_at: price.fetched_at,
            granularity: price.granularity,
        }),
        None => None,
    };

    Ok(AssetMovement {
        asset_id: AssetId::new(record.asset_id),
        asset_symbol: AssetSymbol::new(record.asset_symbol),
        amount: parse_decimal(&record.amount)?,
        net_amount: record
            .net_amount
            .as_deref()
            .map(parse_decimal)
            .transpose()?,
        from_address: record.from_address,
        to_address: record.to_address,
        price_at_tx_time,
    })
}

fn movements_to_json(movements: &[AssetMovement]) -> Result<String, sqlx::Error> {
    let records: Vec<MovementRecord> = movements.iter().map(movement_to_record).collect();
    serde_json::to_string(&records).map_err(decode_err)
}

fn movements_from_json(json: &str) -> Result<Vec<AssetMovement>, sqlx::Error> {
    let records: Vec<MovementRecord> = serde_json::from_str(json).map_err(decode_err)?;
    records.into_iter().map(record_to_movement).collect()
}

fn source_type_to_str(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Exchange => "exchange",
        SourceType::Blockchain => "blockchain",
    }
}

fn source_type_from_str(text: &str) -> Result<SourceType, sqlx::Error> {
    match text {
        "exchange" => Ok(SourceType::Exchange),
        "blockchain" => Ok(SourceType::Blockchain),
        other => Err(decode_msg(format!("unknown source type: {}", other))),
    }
}

fn row_to_transaction(row: &sqlx::sqlite::SqliteRow) -> Result<Transaction, sqlx::Error> {
    Ok(Transaction {
        id: TxId::new(row.get::<String, _>("id")),
        external_id: row.get::<Option<String>, _>("external_id"),
        source_name: row.get::<String, _>("source_name"),
        source_type: source_type_from_str(&row.get::<String, _>("source_type"))?,
        time_ms: TimeMs::new(row.get::<i64, _>("time_ms")),
        tx_hash: row.get::<Option<String>, _>("tx_hash"),
        inflows: movements_from_json(&row.get::<String, _>("inflows"))?,
        outflows: movements_from_json(&row.get::<String, _>("outflows"))?,
        fees: movements_from_json(&row.get::<String, _>("fees"))?,
    })
}

impl Repository {
    /// Insert transactions idempotently, keyed by their stable tx key.
    ///
    /// Returns the number of newly inserted transactions (excludes
    /// duplicates).
    pub async fn insert_transactions_batch(
        &self,
        txs: &[Transaction],
    ) -> Result<usize, sqlx::Error> {
        if txs.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut db_tx = self.pool().begin().await?;

        for tx in txs {
            let result = sqlx::query(
                r#"
                INSERT INTO transactions
                    (id, tx_key, external_id, source_name, source_type, time_ms, tx_hash,
                     inflows, outflows, fees)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(tx_key) DO NOTHING
                "#,
            )
            .bind(tx.id.as_str())
            .bind(tx.tx_key())
            .bind(tx.external_id.as_deref())
            .bind(&tx.source_name)
            .bind(source_type_to_str(tx.source_type))
            .bind(tx.time_ms.as_ms())
            .bind(tx.tx_hash.as_deref())
            .bind(movements_to_json(&tx.inflows)?)
            .bind(movements_to_json(&tx.outflows)?)
            .bind(movements_to_json(&tx.fees)?)
            .execute(&mut *db_tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        db_tx.commit().await?;
        Ok(total_inserted)
    }

    /// Fetch all transactions, optionally restricted to one source, in
    /// chronological order.
    pub async fn fetch_transactions(
        &self,
        source_name: Option<&str>,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let rows = match source_name {
            Some(source) => {
                sqlx::query(
                    "SELECT * FROM transactions WHERE source_name = ? ORDER BY time_ms, id",
                )
                .bind(source)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM transactions ORDER BY time_ms, id")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.iter().map(row_to_transaction).collect()
    }

    /// Fetch a single transaction by id.
    pub async fn fetch_transaction(
        &self,
        id: &TxId,
    ) -> Result<Option<Transaction>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    /// Persist a transaction's movement arrays (with any new prices) back
    /// onto its row.
    pub async fn update_transaction_movements(
        &self,
        tx: &Transaction,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE transactions SET inflows = ?, outflows = ?, fees = ? WHERE id = ?",
        )
        .bind(movements_to_json(&tx.inflows)?)
        .bind(movements_to_json(&tx.outflows)?)
        .bind(movements_to_json(&tx.fees)?)
        .bind(tx.id.as_str())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
