//! Header based authentication.
//!
//! Trusts identity headers injected by an upstream proxy that has already
//! authenticated the caller. Only deploy behind a proxy that strips these
//! headers from client traffic.
//!
//! # Headers
//!
//! ```text
//! X-User-Id:    42              (required, integer)
//! X-User-Name:  alice
//! X-User-Level: 5
//! X-User-Roles: admin,reader
//! X-User-Email: alice@example.com
//! X-Session-Id: upstream-session
//! ```

use async_trait::async_trait;

use super::{AuthRequest, Authenticator, LoginRequest, LoginResponse, LogoutRequest};
use crate::error::{SecurityError, SecurityResult};
use crate::identity::IdentityContext;

/// Default header carrying the numeric user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticator that reads the identity straight from request headers.
pub struct HeaderAuthenticator {
    user_id_header: String,
}

impl HeaderAuthenticator {
    pub fn new() -> Self {
        Self {
            user_id_header: USER_ID_HEADER.to_string(),
        }
    }

    /// Read the user id from a different header.
    pub fn with_user_id_header(mut self, header: impl Into<String>) -> Self {
        self.user_id_header = header.into().to_ascii_lowercase();
        self
    }
}

impl Default for HeaderAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for HeaderAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> SecurityResult<IdentityContext> {
        let raw_id = request.header(&self.user_id_header).ok_or_else(|| {
            SecurityError::Unauthenticated(format!("missing {} header", self.user_id_header))
        })?;
        let user_id: i64 = raw_id.parse().map_err(|_| {
            SecurityError::Unauthenticated(format!("{} is not an integer", self.user_id_header))
        })?;

        let mut builder = IdentityContext::builder(user_id);
        if let Some(name) = request.header("x-user-name") {
            builder = builder.user_name(name);
        }
        if let Some(level) = request.header("x-user-level").and_then(|l| l.parse().ok()) {
            builder = builder.user_level(level);
        }
        if let Some(roles) = request.header("x-user-roles") {
            builder = builder.roles(
                roles
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty()),
            );
        }
        if let Some(email) = request.header("x-user-email") {
            builder = builder.email(email);
        }
        if let Some(session) = request.header("x-session-id") {
            builder = builder.session_id(session);
        }
        if let Some(addr) = request.remote_addr() {
            builder = builder.remote_id(addr);
        }

        Ok(builder.build())
    }

    async fn login(&self, _request: &LoginRequest) -> SecurityResult<LoginResponse> {
        Err(SecurityError::InvalidCredentials(
            "login is handled by the upstream proxy".to_string(),
        ))
    }

    async fn logout(&self, _request: &LogoutRequest) -> SecurityResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_identity_from_headers() {
        let request = AuthRequest::new()
            .with_header("X-User-Id", "42")
            .with_header("X-User-Name", "alice")
            .with_header("X-User-Level", "3")
            .with_header("X-User-Roles", "admin, reader,,")
            .with_header("X-User-Email", "alice@example.com")
            .with_header("X-Session-Id", "sess-9")
            .with_remote_addr("10.1.2.3:5000");

        let identity = HeaderAuthenticator::new()
            .authenticate(&request)
            .await
            .unwrap();

        assert_eq!(identity.user_id(), 42);
        assert_eq!(identity.user_name(), "alice");
        assert_eq!(identity.user_level(), 3);
        assert_eq!(identity.roles().len(), 2);
        assert!(identity.has_role("reader"));
        assert_eq!(identity.email(), Some("alice@example.com"));
        assert_eq!(identity.session_id(), Some("sess-9"));
        assert_eq!(identity.remote_id(), Some("10.1.2.3:5000"));
    }

    #[tokio::test]
    async fn test_missing_header_is_unauthenticated() {
        let err = HeaderAuthenticator::new()
            .authenticate(&AuthRequest::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_unauthenticated() {
        let request = AuthRequest::new().with_header("X-User-Id", "42 OR 1=1");
        let err = HeaderAuthenticator::new()
            .authenticate(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_custom_header() {
        let auth = HeaderAuthenticator::new().with_user_id_header("X-Remote-User");
        let request = AuthRequest::new().with_header("x-remote-user", "7");
        assert_eq!(auth.authenticate(&request).await.unwrap().user_id(), 7);
    }

    #[tokio::test]
    async fn test_login_unsupported_logout_noop() {
        let auth = HeaderAuthenticator::new();
        let err = auth.login(&LoginRequest::new("a", "b")).await.unwrap_err();
        assert!(matches!(err, SecurityError::InvalidCredentials(_)));
        assert!(auth.logout(&LogoutRequest::new("anything")).await.is_ok());
        assert!(auth.refresher().is_none());
    }
}
