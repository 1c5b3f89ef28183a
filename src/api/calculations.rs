use crate::api::AppState;
use crate::domain::{AcquisitionLot, LotDisposal, LotTransfer};
use crate::error::AppError;
use crate::orchestration::{CalculationReport, EnrichmentResult, MatchingRunResult};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

pub async fn run_matching(
    State(state): State<AppState>,
) -> Result<Json<MatchingRunResult>, AppError> {
    let result = state.matcher.run().await?;
    Ok(Json(result))
}

pub async fn run_enrichment(
    State(state): State<AppState>,
) -> Result<Json<EnrichmentResult>, AppError> {
    let result = state.enricher.run().await?;
    Ok(Json(result))
}

pub async fn run_calculation(
    State(state): State<AppState>,
) -> Result<Json<CalculationReport>, AppError> {
    let report = state.calculator.run().await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct CalculationLotsResponse {
    pub calculation_id: Uuid,
    pub lots: Vec<AcquisitionLot>,
    pub disposals: Vec<LotDisposal>,
    pub transfers: Vec<LotTransfer>,
}

pub async fn get_calculation_lots(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CalculationLotsResponse>, AppError> {
    let lots = state.repo.fetch_lots_by_calculation(id).await?;
    if lots.is_empty() {
        return Err(AppError::NotFound(format!(
            "no lots recorded for calculation {}",
            id
        )));
    }
    let disposals = state.repo.fetch_disposals_by_calculation(id).await?;
    let transfers = state.repo.fetch_transfers_by_calculation(id).await?;

    Ok(Json(CalculationLotsResponse {
        calculation_id: id,
        lots,
        disposals,
        transfers,
    }))
}
