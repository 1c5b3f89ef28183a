use crate::api::AppState;
use crate::domain::Transaction;
use crate::error::AppError;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub received: usize,
    pub inserted: usize,
}

/// Ingest normalized transactions from external importers.
///
/// Idempotent: a transaction whose stable key already exists is skipped.
pub async fn ingest_transactions(
    State(state): State<AppState>,
    Json(txs): Json<Vec<Transaction>>,
) -> Result<Json<IngestResponse>, AppError> {
    if txs.iter().any(|tx| tx.id.as_str().is_empty()) {
        return Err(AppError::BadRequest(
            "transaction id must not be empty".to_string(),
        ));
    }

    let inserted = state.repo.insert_transactions_batch(&txs).await?;
    Ok(Json(IngestResponse {
        received: txs.len(),
        inserted,
    }))
}
