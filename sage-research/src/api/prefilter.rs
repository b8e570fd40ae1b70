//! Pre-filter API handlers
//!
//! GET /prefilter/thresholds, PUT /prefilter/thresholds,
//! GET /prefilter/cache, DELETE /prefilter/cache

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::{error::ApiResult, models::FilterThresholds, services::prefilter::CacheStats, AppState};

/// GET /prefilter/cache response
#[derive(Debug, Serialize)]
pub struct CacheStatusResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub ttl_secs: u64,
    /// True while the engine bypasses the scoring service after repeated rate limiting
    pub degraded: bool,
}

/// PUT /prefilter/thresholds response
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateThresholdsResponse {
    pub status: String,
    pub thresholds: FilterThresholds,
}

/// GET /prefilter/thresholds
pub async fn get_thresholds(State(state): State<AppState>) -> Json<FilterThresholds> {
    Json(state.orchestrator.prefilter().thresholds().await)
}

/// PUT /prefilter/thresholds
///
/// Replaces the thresholds for subsequent scoring. Fields missing from the
/// body take their default value. Cached results keep the decision made when
/// they were scored.
pub async fn update_thresholds(
    State(state): State<AppState>,
    Json(thresholds): Json<FilterThresholds>,
) -> ApiResult<Json<UpdateThresholdsResponse>> {
    state.orchestrator.prefilter().set_thresholds(thresholds).await?;

    Ok(Json(UpdateThresholdsResponse {
        status: "updated".to_string(),
        thresholds,
    }))
}

/// GET /prefilter/cache
pub async fn get_cache_status(State(state): State<AppState>) -> Json<CacheStatusResponse> {
    let engine = state.orchestrator.prefilter();
    Json(CacheStatusResponse {
        stats: engine.cache().stats().await,
        ttl_secs: engine.cache().ttl().as_secs(),
        degraded: engine.is_degraded().await,
    })
}

/// DELETE /prefilter/cache response
#[derive(Debug, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub removed: usize,
}

/// DELETE /prefilter/cache
///
/// Forces the next sessions to re-score every document, e.g. after a
/// threshold change that cached decisions should not outlive.
pub async fn clear_cache(State(state): State<AppState>) -> Json<ClearCacheResponse> {
    let removed = state.orchestrator.prefilter().cache().clear().await;
    tracing::info!(removed, "Pre-filter cache cleared");
    Json(ClearCacheResponse { removed })
}

/// Build pre-filter routes
pub fn prefilter_routes() -> Router<AppState> {
    Router::new()
        .route("/prefilter/thresholds", get(get_thresholds).put(update_thresholds))
        .route("/prefilter/cache", get(get_cache_status).delete(clear_cache))
}
