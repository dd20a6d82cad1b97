//! Authentication middleware.
//!
//! Establishes the [`SecurityContext`] once per request and stores it in the
//! request extensions. Handlers behind this layer take it as
//! `Extension<SecurityContext>`.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use fieldgate_core::{AuthRequest, SecurityContext};

use crate::error::AppError;
use crate::AppState;

/// Authenticate the request or reject it with 401.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    let auth_request = auth_request(request.headers(), remote);

    let ctx = SecurityContext::establish(state.security.clone(), &auth_request)
        .await?
        .with_lookup_timeout(state.config.request_timeout);

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

/// Transport-neutral view of the request headers.
pub fn auth_request(headers: &HeaderMap, remote: Option<String>) -> AuthRequest {
    let mut auth_request = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .fold(AuthRequest::new(), |req, (name, value)| {
            req.with_header(name, value)
        });
    if let Some(remote) = remote {
        auth_request = auth_request.with_remote_addr(remote);
    }
    auth_request
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_auth_request_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("x-user-id", HeaderValue::from_static("7"));
        headers.insert("x-binary", HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());

        let request = auth_request(&headers, Some("10.0.0.1:5000".into()));
        assert_eq!(request.bearer_token(), Some("abc"));
        assert_eq!(request.header("X-User-Id"), Some("7"));
        assert_eq!(request.header("x-binary"), None);
        assert_eq!(request.remote_addr(), Some("10.0.0.1:5000"));
    }
}
