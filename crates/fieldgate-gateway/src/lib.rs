//! Fieldgate HTTP policy gateway.
//!
//! Thin HTTP boundary over `fieldgate-core`: it authenticates callers, issues
//! and revokes tokens, and answers row-filter and masking decisions for an
//! external query builder.

pub mod config;
pub mod error;
pub mod json;
pub mod middleware;
pub mod routes;
pub mod security;

pub use config::{Args, AuthMode, ConfigError, GatewayConfig};
pub use error::AppError;
pub use security::SecurityStack;

use std::sync::Arc;

use axum::{middleware as axum_mw, Router};
use fieldgate_core::{CachingProvider, PolicyStore, SecurityProvider};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Composite security provider.
    pub security: SecurityProvider,
    /// Policy cache, exposed for health reporting.
    pub policy_cache: Option<Arc<CachingProvider<PolicyStore>>>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(security: SecurityProvider, config: GatewayConfig) -> Self {
        Self {
            security,
            policy_cache: None,
            config,
        }
    }

    pub fn from_stack(stack: &SecurityStack, config: GatewayConfig) -> Self {
        Self {
            security: stack.provider.clone(),
            policy_cache: stack.policy_cache.clone(),
            config,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .merge(routes::auth::protected_routes())
        .merge(routes::policy::routes())
        .route_layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::authenticate,
        ));

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::auth::public_routes())
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
