//! Authentication.
//!
//! An [`Authenticator`] turns an inbound request into an
//! [`IdentityContext`] and owns the login/logout lifecycle. Variants are
//! selected when the [`SecurityProvider`](crate::SecurityProvider) is composed.
//!
//! # Provided Authenticators
//!
//! - **Header**: trusts identity headers set by an upstream proxy
//! - **Token**: opaque bearer tokens held in memory, with rotation
//! - **JWT**: signed JSON Web Tokens carrying the identity, with rotation
//! - **Session**: sled-backed sessions with activity bookkeeping

mod credentials;
mod header_authenticator;
mod jwt_authenticator;
mod session_authenticator;
mod token_authenticator;

pub use credentials::{hash_password, CredentialStore, StaticCredentialStore, UserRecord};
pub use header_authenticator::{HeaderAuthenticator, USER_ID_HEADER};
pub use jwt_authenticator::{JwtAuthenticator, JwtClaims, JwtConfig, JWT_SECRET_ENV};
pub use session_authenticator::{SessionAuthenticator, DEFAULT_SESSION_TTL, SESSION_TOKEN_HEADER};
pub use token_authenticator::{TokenAuthenticator, DEFAULT_TOKEN_TTL};

use std::collections::HashMap;

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::SecurityResult;
use crate::identity::IdentityContext;

/// Transport-neutral view of an inbound request's credential material.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    /// Header names are stored lowercased.
    headers: HashMap<String, String>,
    remote_addr: Option<String>,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Names are case-insensitive.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Header value, if present and non-empty after trimming.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Token from the `Authorization` header, with any `Bearer` scheme stripped.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header("authorization")?;
        let token = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            _ if value.eq_ignore_ascii_case("bearer") => "",
            _ => value,
        };
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

/// Login payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Remote peer the session is issued to, if known.
    #[serde(default)]
    pub remote_addr: Option<String>,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            remote_addr: None,
        }
    }
}

/// Successful login (or refresh) result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Opaque to this crate's callers.
    pub token: String,
    pub identity: IdentityContext,
    /// Seconds until the token expires. Always positive.
    pub expires_in: u64,
}

/// Logout payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub token: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl LogoutRequest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
        }
    }
}

/// Produces identities from requests and manages the login lifecycle.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve the caller of `request`.
    ///
    /// Fails with [`SecurityError::Unauthenticated`](crate::SecurityError::Unauthenticated)
    /// when no valid credential is present.
    async fn authenticate(&self, request: &AuthRequest) -> SecurityResult<IdentityContext>;

    /// Exchange credentials for a fresh token.
    ///
    /// Fails with [`SecurityError::InvalidCredentials`](crate::SecurityError::InvalidCredentials)
    /// on mismatch.
    async fn login(&self, request: &LoginRequest) -> SecurityResult<LoginResponse>;

    /// Invalidate a token. Invalidating an unknown or already invalid token
    /// succeeds; only storage failures are errors.
    async fn logout(&self, request: &LogoutRequest) -> SecurityResult<()>;

    /// Token rotation, for variants that support it.
    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        None
    }
}

/// Optional token rotation capability.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange a valid token for a new one bound to the same identity.
    /// The old token stops being accepted.
    async fn refresh(&self, token: &str) -> SecurityResult<LoginResponse>;
}

/// Generate a fresh random opaque token (32 bytes, hex encoded).
pub(crate) fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Stable digest of a token, used as a storage key so raw tokens are never
/// persisted.
pub(crate) fn token_digest(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

/// Short session identifier derived from a token.
pub(crate) fn session_id_for(token: &str) -> String {
    token_digest(token)[..16].to_string()
}
