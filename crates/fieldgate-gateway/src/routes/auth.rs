//! Login, logout, refresh and identity endpoints.

use std::net::SocketAddr;

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::HeaderMap,
    routing::{get, post},
    Extension, Json, Router,
};
use fieldgate_core::auth::SESSION_TOKEN_HEADER;
use fieldgate_core::{
    AuthRequest, Authenticator, LoginRequest, LoginResponse, LogoutRequest, SecurityContext,
    TokenRefresher,
};
use tracing::info;

use crate::error::AppError;
use crate::json::{LoginBody, LogoutBody, MeResponse, SuccessResponse};
use crate::middleware::auth_request;
use crate::AppState;

/// Routes reachable without a credential.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

/// Routes behind the authentication middleware.
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

/// Credential presented on the request, bearer first.
fn presented_token(request: &AuthRequest) -> Option<String> {
    request
        .bearer_token()
        .or_else(|| request.header(SESSION_TOKEN_HEADER))
        .map(str::to_string)
}

async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let Json(body) = body?;
    let mut request = LoginRequest::new(body.username, body.password);
    request.remote_addr = connect_info.map(|ConnectInfo(addr)| addr.to_string());

    let response = state.security.login(&request).await?;
    info!(user_id = response.identity.user_id(), "login succeeded");
    Ok(Json(response))
}

async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<SecurityContext>,
    headers: HeaderMap,
    body: Option<Json<LogoutBody>>,
) -> Result<Json<SuccessResponse>, AppError> {
    let explicit = body.and_then(|Json(body)| body.token);
    let token = explicit
        .or_else(|| presented_token(&auth_request(&headers, None)))
        .unwrap_or_default();

    let request = LogoutRequest {
        token,
        user_id: Some(ctx.user_id()),
    };
    state.security.logout(&request).await?;
    info!(user_id = ctx.user_id(), "logout");
    Ok(Json(SuccessResponse::ok()))
}

async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LoginResponse>, AppError> {
    let refresher = state.security.refresher().ok_or_else(|| {
        AppError::NotSupported(format!(
            "{} authentication does not support token refresh",
            state.config.auth_mode.as_str()
        ))
    })?;
    let token = presented_token(&auth_request(&headers, None))
        .ok_or_else(|| AppError::Unauthenticated("no token presented".into()))?;

    let response = refresher.refresh(&token).await?;
    Ok(Json(response))
}

async fn me(Extension(ctx): Extension<SecurityContext>) -> Json<MeResponse> {
    Json(MeResponse {
        identity: ctx.identity().clone(),
    })
}
