pub mod calculations;
pub mod health;
pub mod links;
pub mod transactions;

use crate::db::Repository;
use crate::orchestration::{CalculationRunner, LinkMatcher, PriceEnricher};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub matcher: Arc<LinkMatcher>,
    pub enricher: Arc<PriceEnricher>,
    pub calculator: Arc<CalculationRunner>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/transactions", post(transactions::ingest_transactions))
        .route("/v1/links", get(links::get_links))
        .route("/v1/links/:id/review", post(links::review_link))
        .route("/v1/matching/run", post(calculations::run_matching))
        .route("/v1/enrichment/run", post(calculations::run_enrichment))
        .route("/v1/calculations/run", post(calculations::run_calculation))
        .route(
            "/v1/calculations/:id/lots",
            get(calculations::get_calculation_lots),
        )
        .layer(cors)
        .with_state(state)
}
