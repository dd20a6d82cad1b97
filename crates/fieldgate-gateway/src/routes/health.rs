//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use fieldgate_core::Authenticator;

use crate::json::{CacheStatsJson, HealthResponse};
use crate::AppState;

/// Health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let policy_cache = state.policy_cache.as_ref().map(|cache| {
        let stats = cache.stats();
        CacheStatsJson {
            entries: cache.len(),
            hits: stats.hits(),
            misses: stats.misses(),
            evictions: stats.evictions(),
            hit_rate: stats.hit_rate(),
        }
    });

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        auth_mode: state.config.auth_mode.as_str().to_string(),
        refresh_supported: state.security.refresher().is_some(),
        policy_cache,
    })
}
