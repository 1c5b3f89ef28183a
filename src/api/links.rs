use crate::api::AppState;
use crate::domain::{LinkStatus, TransactionLink};
use crate::error::AppError;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LinksQuery {
    pub status: Option<LinkStatus>,
}

pub async fn get_links(
    State(state): State<AppState>,
    Query(query): Query<LinksQuery>,
) -> Result<Json<Vec<TransactionLink>>, AppError> {
    let links = state.repo.fetch_links(query.status).await?;
    Ok(Json(links))
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub status: LinkStatus,
    pub reviewed_by: String,
}

/// Record a manual review decision on a suggested link.
pub async fn review_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(review): Json<ReviewRequest>,
) -> Result<Json<TransactionLink>, AppError> {
    if review.status == LinkStatus::Suggested {
        return Err(AppError::BadRequest(
            "review must set status to confirmed or rejected".to_string(),
        ));
    }
    if review.reviewed_by.trim().is_empty() {
        return Err(AppError::BadRequest(
            "reviewed_by must not be empty".to_string(),
        ));
    }

    let updated = state
        .repo
        .update_link_review(id, review.status, &review.reviewed_by)
        .await?;
    if !updated {
        return Err(AppError::NotFound(format!("link {} does not exist", id)));
    }

    let link = state
        .repo
        .fetch_link(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("link {} does not exist", id)))?;
    Ok(Json(link))
}
