//! JWT (JSON Web Token) based authentication.
//!
//! Tokens are HMAC-signed and carry the whole identity, so authentication
//! needs no storage lookup. Logout records the token id (`jti`) in a denylist
//! until the token would have expired anyway.
//!
//! # Configuration
//!
//! Set `FIELDGATE_JWT_SECRET` with the HMAC secret key.
//!
//! # Example JWT Payload
//!
//! ```json
//! {
//!   "sub": "42",
//!   "name": "alice",
//!   "level": 5,
//!   "roles": ["admin"],
//!   "sid": "3f2a9c0d1e4b5a67",
//!   "exp": 1735689600,
//!   "iat": 1735603200,
//!   "jti": "9b1d..."
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{
    generate_token, session_id_for, token_digest, AuthRequest, Authenticator, CredentialStore, LoginRequest,
    LoginResponse, LogoutRequest, TokenRefresher,
};
use crate::error::{SecurityError, SecurityResult};
use crate::identity::IdentityContext;

/// Environment variable holding the HMAC secret.
pub const JWT_SECRET_ENV: &str = "FIELDGATE_JWT_SECRET";

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (numeric user id, as a string).
    pub sub: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub level: i32,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Session identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Remote peer the token was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    /// Expiration time (Unix timestamp).
    pub exp: u64,

    /// Issued at time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Token id, used for revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Custom attributes, surfaced as identity claims.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl JwtClaims {
    fn from_identity(identity: &IdentityContext, exp: u64, iat: u64, jti: String) -> Self {
        Self {
            sub: identity.user_id().to_string(),
            name: identity.user_name().to_string(),
            level: identity.user_level(),
            roles: identity.roles().iter().cloned().collect(),
            email: identity.email().map(str::to_string),
            sid: identity.session_id().map(str::to_string),
            rid: identity.remote_id().map(str::to_string),
            exp,
            iat: Some(iat),
            jti: Some(jti),
            iss: None,
            attributes: identity.claims().clone(),
        }
    }

    /// Rebuild the identity carried by these claims.
    pub fn to_identity(&self) -> SecurityResult<IdentityContext> {
        let user_id: i64 = self.sub.parse().map_err(|_| {
            SecurityError::Unauthenticated("token subject is not a user id".to_string())
        })?;

        let mut builder = IdentityContext::builder(user_id)
            .user_name(self.name.clone())
            .user_level(self.level)
            .roles(self.roles.iter().cloned());
        if let Some(email) = &self.email {
            builder = builder.email(email.clone());
        }
        if let Some(sid) = &self.sid {
            builder = builder.session_id(sid.clone());
        }
        if let Some(rid) = &self.rid {
            builder = builder.remote_id(rid.clone());
        }
        for (name, value) in &self.attributes {
            builder = builder.claim(name.clone(), value.clone());
        }
        Ok(builder.build())
    }
}

/// JWT authenticator configuration.
#[derive(Clone)]
pub struct JwtConfig {
    /// Lifetime of issued tokens.
    pub ttl: Duration,

    /// Whether to validate expiration.
    pub validate_exp: bool,

    /// Issuer stamped on issued tokens and required on presented ones.
    pub issuer: Option<String>,

    /// Leeway in seconds for expiration check.
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            validate_exp: true,
            issuer: None,
            leeway_secs: 60,
        }
    }
}

/// JWT authenticator that issues and verifies HS256 tokens.
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    credentials: Arc<dyn CredentialStore>,
    config: JwtConfig,
    /// Revocation keys -> the token's expiry timestamp. The key is the
    /// `jti`, or the token digest for tokens issued without one.
    revoked: DashMap<String, u64>,
}

impl JwtAuthenticator {
    /// Create a new JWT authenticator with HMAC secret.
    pub fn with_secret(secret: &[u8], credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            credentials,
            config: JwtConfig::default(),
            revoked: DashMap::new(),
        }
    }

    /// Create a new JWT authenticator with HMAC secret string.
    pub fn with_secret_str(secret: &str, credentials: Arc<dyn CredentialStore>) -> Self {
        Self::with_secret(secret.as_bytes(), credentials)
    }

    /// Load the secret from `FIELDGATE_JWT_SECRET`.
    pub fn from_env(credentials: Arc<dyn CredentialStore>) -> SecurityResult<Self> {
        match std::env::var(JWT_SECRET_ENV) {
            Ok(secret) if !secret.is_empty() => Ok(Self::with_secret_str(&secret, credentials)),
            _ => Err(SecurityError::Configuration(format!(
                "no JWT secret configured (set {})",
                JWT_SECRET_ENV
            ))),
        }
    }

    /// Set the issuer for issued and accepted tokens.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.issuer = Some(issuer.into());
        self
    }

    /// Set the lifetime of issued tokens.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Set the leeway for expiration check.
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    /// Disable expiration validation (not recommended for production).
    pub fn without_exp_validation(mut self) -> Self {
        self.config.validate_exp = false;
        self
    }

    /// Verify a JWT token and extract claims.
    pub fn verify_token(&self, token: &str) -> SecurityResult<JwtClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_secs;
        validation.validate_exp = self.config.validate_exp;

        if let Some(ref iss) = self.config.issuer {
            validation.set_issuer(&[iss]);
        }

        let token_data = decode::<JwtClaims>(token, &self.decoding_key, &validation).map_err(
            |e| SecurityError::Unauthenticated(format!("JWT verification failed: {}", e)),
        )?;

        let claims = token_data.claims;
        if self.revoked.contains_key(&revocation_key(token, &claims)) {
            return Err(SecurityError::Unauthenticated("token revoked".to_string()));
        }
        Ok(claims)
    }

    /// Number of revoked tokens still tracked.
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    fn issue(&self, identity: &IdentityContext) -> SecurityResult<LoginResponse> {
        let now = unix_now();
        let ttl = self.config.ttl.as_secs().max(1);
        let jti = generate_token();
        let identity = identity.with_session(session_id_for(&jti));

        let mut claims = JwtClaims::from_identity(&identity, now + ttl, now, jti);
        claims.iss = self.config.issuer.clone();

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| SecurityError::Token(format!("cannot sign token: {}", e)))?;

        Ok(LoginResponse {
            token,
            identity,
            expires_in: ttl,
        })
    }

    fn revoke(&self, token: &str, claims: &JwtClaims) {
        let now = unix_now();
        self.revoked.retain(|_, exp| *exp + self.config.leeway_secs >= now);
        self.revoked.insert(revocation_key(token, claims), claims.exp);
    }
}

fn revocation_key(token: &str, claims: &JwtClaims) -> String {
    match &claims.jti {
        Some(jti) => format!("jti:{}", jti),
        None => format!("digest:{}", token_digest(token)),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> SecurityResult<IdentityContext> {
        let token = request
            .bearer_token()
            .ok_or_else(|| SecurityError::Unauthenticated("missing bearer token".to_string()))?;
        self.verify_token(token)?.to_identity()
    }

    async fn login(&self, request: &LoginRequest) -> SecurityResult<LoginResponse> {
        let mut identity = self
            .credentials
            .verify(&request.username, &request.password)
            .await?;
        if let Some(addr) = &request.remote_addr {
            identity = identity.with_remote_id(addr.clone());
        }
        self.issue(&identity)
    }

    async fn logout(&self, request: &LogoutRequest) -> SecurityResult<()> {
        // A token that no longer verifies is already unusable.
        if let Ok(claims) = self.verify_token(&request.token) {
            self.revoke(&request.token, &claims);
            tracing::debug!(sub = %claims.sub, "jwt revoked");
        }
        Ok(())
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        Some(self)
    }
}

#[async_trait]
impl TokenRefresher for JwtAuthenticator {
    async fn refresh(&self, token: &str) -> SecurityResult<LoginResponse> {
        let claims = self.verify_token(token)?;
        let identity = claims.to_identity()?;
        self.revoke(token, &claims);
        self.issue(&identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentialStore;

    const SECRET: &str = "test-secret-key-for-testing";

    fn credentials() -> Arc<dyn CredentialStore> {
        Arc::new(
            StaticCredentialStore::from_json(
                r#"[{"user_id": 42, "username": "alice", "password": "wonderland",
                     "user_level": 5, "roles": ["admin"], "email": "alice@example.com"}]"#,
            )
            .unwrap(),
        )
    }

    fn bearer(token: &str) -> AuthRequest {
        AuthRequest::new().with_header("Authorization", format!("Bearer {}", token))
    }

    fn create_test_token(secret: &str, claims: &JwtClaims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn test_claims() -> JwtClaims {
        JwtClaims {
            sub: "7".to_string(),
            name: "bob".to_string(),
            level: 1,
            roles: vec!["reader".to_string()],
            email: None,
            sid: None,
            rid: None,
            exp: unix_now() + 3600,
            iat: None,
            jti: None,
            iss: None,
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_login_then_authenticate() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let response = auth
            .login(&LoginRequest::new("alice", "wonderland"))
            .await
            .unwrap();
        assert_eq!(response.expires_in, 3600);

        let identity = auth.authenticate(&bearer(&response.token)).await.unwrap();
        assert_eq!(identity.user_id(), 42);
        assert_eq!(identity.user_name(), "alice");
        assert_eq!(identity.user_level(), 5);
        assert!(identity.has_role("admin"));
        assert_eq!(identity.email(), Some("alice@example.com"));
        assert_eq!(identity.session_id(), response.identity.session_id());
    }

    #[tokio::test]
    async fn test_externally_issued_token() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let mut claims = test_claims();
        claims
            .attributes
            .insert("tenant".to_string(), serde_json::json!("acme"));
        let token = create_test_token(SECRET, &claims);

        let identity = auth.authenticate(&bearer(&token)).await.unwrap();
        assert_eq!(identity.user_id(), 7);
        assert_eq!(identity.claim("tenant"), Some(&serde_json::json!("acme")));
    }

    #[tokio::test]
    async fn test_invalid_signature() {
        let auth = JwtAuthenticator::with_secret_str("correct-secret", credentials());
        let token = create_test_token("wrong-secret", &test_claims());

        let err = auth.authenticate(&bearer(&token)).await.unwrap_err();
        assert!(matches!(err, SecurityError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let mut claims = test_claims();
        claims.exp = 1;
        let token = create_test_token(SECRET, &claims);

        assert!(auth.authenticate(&bearer(&token)).await.is_err());
    }

    #[tokio::test]
    async fn test_non_numeric_subject() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let mut claims = test_claims();
        claims.sub = "user-7".to_string();
        let token = create_test_token(SECRET, &claims);

        let err = auth.authenticate(&bearer(&token)).await.unwrap_err();
        assert!(matches!(err, SecurityError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_issuer_validation() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials()).with_issuer("fieldgate");

        let mut claims = test_claims();
        claims.iss = Some("fieldgate".to_string());
        assert!(auth
            .authenticate(&bearer(&create_test_token(SECRET, &claims)))
            .await
            .is_ok());

        claims.iss = Some("someone-else".to_string());
        assert!(auth
            .authenticate(&bearer(&create_test_token(SECRET, &claims)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_logout_revokes_and_is_idempotent() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let response = auth.login(&LoginRequest::new("alice", "wonderland")).await.unwrap();

        auth.logout(&LogoutRequest::new(response.token.clone())).await.unwrap();
        assert_eq!(auth.revoked_count(), 1);
        assert!(auth.authenticate(&bearer(&response.token)).await.is_err());

        auth.logout(&LogoutRequest::new(response.token.clone())).await.unwrap();
        auth.logout(&LogoutRequest::new("garbage")).await.unwrap();
        assert_eq!(auth.revoked_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_rotates() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let response = auth.login(&LoginRequest::new("alice", "wonderland")).await.unwrap();

        let rotated = auth.refresher().unwrap().refresh(&response.token).await.unwrap();
        assert_ne!(rotated.token, response.token);
        assert_eq!(rotated.identity.user_id(), 42);
        assert!(auth.authenticate(&bearer(&response.token)).await.is_err());
        assert!(auth.authenticate(&bearer(&rotated.token)).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_revokes_token_without_jti() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let token = create_test_token(SECRET, &test_claims());
        let other = {
            let mut claims = test_claims();
            claims.name = "bobby".to_string();
            create_test_token(SECRET, &claims)
        };
        assert!(auth.authenticate(&bearer(&token)).await.is_ok());

        auth.logout(&LogoutRequest::new(token.clone())).await.unwrap();
        assert_eq!(auth.revoked_count(), 1);
        assert!(auth.authenticate(&bearer(&token)).await.is_err());
        assert!(auth.authenticate(&bearer(&other)).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_retires_token_without_jti() {
        let auth = JwtAuthenticator::with_secret_str(SECRET, credentials());
        let token = create_test_token(SECRET, &test_claims());

        let rotated = auth.refresher().unwrap().refresh(&token).await.unwrap();
        assert_eq!(rotated.identity.user_id(), 7);
        assert!(auth.authenticate(&bearer(&token)).await.is_err());
        assert!(auth.authenticate(&bearer(&rotated.token)).await.is_ok());
        assert!(auth.refresher().unwrap().refresh(&token).await.is_err());
    }

    #[test]
    fn test_from_env_without_secret() {
        std::env::remove_var(JWT_SECRET_ENV);
        assert!(matches!(
            JwtAuthenticator::from_env(credentials()),
            Err(SecurityError::Configuration(_))
        ));
    }
}
