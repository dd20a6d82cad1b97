//! Bearer token based authentication.
//!
//! Tokens are random opaque strings issued at login and held in memory with a
//! TTL. Suitable for a single gateway instance; use the session authenticator
//! when tokens must survive restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    generate_token, session_id_for, AuthRequest, Authenticator, CredentialStore, LoginRequest,
    LoginResponse, LogoutRequest, TokenRefresher,
};
use crate::error::{SecurityError, SecurityResult};
use crate::identity::IdentityContext;

/// Default lifetime of an issued token (one hour).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Token entry with optional expiration.
#[derive(Clone)]
struct TokenEntry {
    identity: IdentityContext,
    expires_at: Option<Instant>,
}

impl TokenEntry {
    fn new(identity: IdentityContext) -> Self {
        Self {
            identity,
            expires_at: None,
        }
    }

    fn with_expiry(identity: IdentityContext, ttl: Duration) -> Self {
        Self {
            identity,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Instant::now() > exp).unwrap_or(false)
    }
}

/// Token authenticator backed by an in-memory token table.
pub struct TokenAuthenticator {
    /// Map of token -> entry with identity and optional expiry
    tokens: RwLock<HashMap<String, TokenEntry>>,
    credentials: Arc<dyn CredentialStore>,
    ttl: Duration,
}

impl TokenAuthenticator {
    /// Create an authenticator issuing tokens for users in `credentials`.
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            credentials,
            ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Set the lifetime of tokens issued by login and refresh.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Register a long-lived token (no expiry), e.g. for service accounts.
    pub fn register_token(&self, token: impl Into<String>, identity: IdentityContext) {
        self.tokens
            .write()
            .insert(token.into(), TokenEntry::new(identity));
    }

    /// Register a token with expiration.
    pub fn register_token_with_ttl(
        &self,
        token: impl Into<String>,
        identity: IdentityContext,
        ttl: Duration,
    ) {
        self.tokens
            .write()
            .insert(token.into(), TokenEntry::with_expiry(identity, ttl));
    }

    /// Revoke a token. Returns whether it was known.
    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    /// Check if a token is valid (exists and not expired).
    pub fn is_valid(&self, token: &str) -> bool {
        self.tokens
            .read()
            .get(token)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Get the number of registered tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }

    /// Remove expired tokens.
    pub fn cleanup_expired(&self) -> usize {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, entry| !entry.is_expired());
        before - tokens.len()
    }

    fn lookup(&self, token: &str) -> SecurityResult<IdentityContext> {
        let tokens = self.tokens.read();
        match tokens.get(token) {
            Some(entry) if entry.is_expired() => {
                Err(SecurityError::Unauthenticated("token expired".to_string()))
            }
            Some(entry) => Ok(entry.identity.clone()),
            None => Err(SecurityError::Unauthenticated("invalid token".to_string())),
        }
    }

    fn issue(&self, identity: &IdentityContext) -> LoginResponse {
        let token = generate_token();
        let identity = identity.with_session(session_id_for(&token));
        self.register_token_with_ttl(token.clone(), identity.clone(), self.ttl);

        LoginResponse {
            token,
            identity,
            expires_in: self.ttl.as_secs().max(1),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> SecurityResult<IdentityContext> {
        let token = request
            .bearer_token()
            .ok_or_else(|| SecurityError::Unauthenticated("missing bearer token".to_string()))?;
        self.lookup(token)
    }

    async fn login(&self, request: &LoginRequest) -> SecurityResult<LoginResponse> {
        let mut identity = self
            .credentials
            .verify(&request.username, &request.password)
            .await?;
        if let Some(addr) = &request.remote_addr {
            identity = identity.with_remote_id(addr.clone());
        }

        let response = self.issue(&identity);
        tracing::debug!(user_id = response.identity.user_id(), "token issued");
        Ok(response)
    }

    async fn logout(&self, request: &LogoutRequest) -> SecurityResult<()> {
        if self.revoke_token(&request.token) {
            tracing::debug!(user_id = ?request.user_id, "token revoked");
        }
        Ok(())
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(self)
    }
}

#[async_trait]
impl TokenRefresher for TokenAuthenticator {
    async fn refresh(&self, token: &str) -> SecurityResult<LoginResponse> {
        let identity = self.lookup(token)?;
        self.revoke_token(token);
        Ok(self.issue(&identity))
    }
}
