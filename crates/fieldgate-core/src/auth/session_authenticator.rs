//! Session based authentication backed by sled.
//!
//! Sessions are keyed by the blake3 digest of the token, so raw tokens never
//! reach disk. Each successful authentication refreshes the session's
//! last-activity timestamp; that write is advisory and its failure never
//! rejects the caller.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    generate_token, session_id_for, token_digest, AuthRequest, Authenticator, CredentialStore,
    LoginRequest, LoginResponse, LogoutRequest,
};
use crate::error::{SecurityError, SecurityResult};
use crate::identity::IdentityContext;

const SESSION_TREE_NAME: &[u8] = b"security:sessions";

/// Alternate header carrying a session token.
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

/// Default session lifetime (eight hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    identity: IdentityContext,
    expires_at: u64,
    last_activity: u64,
}

/// Authenticator storing sessions in a sled tree.
pub struct SessionAuthenticator {
    tree: sled::Tree,
    credentials: Arc<dyn CredentialStore>,
    ttl: Duration,
}

impl SessionAuthenticator {
    /// Open the session tree in `db`.
    pub fn open(db: &sled::Db, credentials: Arc<dyn CredentialStore>) -> SecurityResult<Self> {
        let tree = db.open_tree(SESSION_TREE_NAME)?;
        Ok(Self {
            tree,
            credentials,
            ttl: DEFAULT_SESSION_TTL,
        })
    }

    /// Set the lifetime of new sessions.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Number of stored sessions, expired ones included.
    pub fn session_count(&self) -> usize {
        self.tree.len()
    }

    /// Delete every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> SecurityResult<usize> {
        let now = unix_now();
        let mut removed = 0;
        for result in self.tree.iter() {
            let (key, value) = result?;
            let expired = serde_json::from_slice::<SessionRecord>(&value)
                .map(|record| record.expires_at <= now)
                .unwrap_or(true);
            if expired {
                self.tree.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Stored bytes and decoded record for `key`.
    fn load(&self, key: &str) -> SecurityResult<Option<(sled::IVec, SessionRecord)>> {
        let value = match self.tree.get(key.as_bytes())? {
            Some(value) => value,
            None => return Ok(None),
        };
        match serde_json::from_slice(&value) {
            Ok(record) => Ok(Some((value, record))),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable session record");
                Ok(None)
            }
        }
    }

    /// Stamp activity on the session loaded as `current`.
    ///
    /// The write only lands if the stored bytes are still `current`, so a
    /// session removed in the meantime is never re-created. Returns `false`
    /// when the session is gone. Other write failures are logged and
    /// ignored.
    fn record_activity(&self, key: &str, current: &sled::IVec, record: &SessionRecord) -> bool {
        let mut updated = record.clone();
        updated.last_activity = unix_now();
        let bytes = match serde_json::to_vec(&updated) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode session activity");
                return true;
            }
        };

        match self
            .tree
            .compare_and_swap(key.as_bytes(), Some(current), Some(bytes))
        {
            Ok(Ok(())) => true,
            // Lost a race with another activity write; the session still exists.
            Ok(Err(conflict)) => conflict.current.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to record session activity");
                true
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> SecurityResult<IdentityContext> {
        let token = request
            .bearer_token()
            .or_else(|| request.header(SESSION_TOKEN_HEADER))
            .ok_or_else(|| SecurityError::Unauthenticated("missing session token".to_string()))?;
        let key = token_digest(token);

        let loaded = self.load(&key).map_err(|e| {
            tracing::warn!(error = %e, "session lookup failed");
            SecurityError::Unauthenticated("session store unavailable".to_string())
        })?;
        let (current, record) =
            loaded.ok_or_else(|| SecurityError::Unauthenticated("invalid session".to_string()))?;

        if record.expires_at <= unix_now() {
            if let Err(e) = self.tree.remove(key.as_bytes()) {
                tracing::warn!(error = %e, "failed to remove expired session");
            }
            return Err(SecurityError::Unauthenticated("session expired".to_string()));
        }

        if !self.record_activity(&key, &current, &record) {
            return Err(SecurityError::Unauthenticated("session ended".to_string()));
        }
        Ok(record.identity)
    }

    async fn login(&self, request: &LoginRequest) -> SecurityResult<LoginResponse> {
        let mut identity = self
            .credentials
            .verify(&request.username, &request.password)
            .await?;

        let token = generate_token();
        identity = identity.with_session(session_id_for(&token));
        if let Some(addr) = &request.remote_addr {
            identity = identity.with_remote_id(addr.clone());
        }

        let now = unix_now();
        let ttl = self.ttl.as_secs().max(1);
        let record = SessionRecord {
            identity: identity.clone(),
            expires_at: now + ttl,
            last_activity: now,
        };
        self.tree
            .insert(token_digest(&token).as_bytes(), serde_json::to_vec(&record)?)?;
        tracing::debug!(user_id = identity.user_id(), "session created");

        Ok(LoginResponse {
            token,
            identity,
            expires_in: ttl,
        })
    }

    async fn logout(&self, request: &LogoutRequest) -> SecurityResult<()> {
        let removed = self.tree.remove(token_digest(&request.token).as_bytes())?;
        if removed.is_some() {
            tracing::debug!(user_id = ?request.user_id, "session removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentialStore;

    fn setup() -> (SessionAuthenticator, sled::Db) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = StaticCredentialStore::from_json(
            r#"[{"user_id": 123, "username": "alice", "password": "wonderland"}]"#,
        )
        .unwrap();
        let auth = SessionAuthenticator::open(&db, Arc::new(store)).unwrap();
        (auth, db)
    }

    #[tokio::test]
    async fn test_login_then_authenticate() {
        let (auth, _db) = setup();
        let mut login = LoginRequest::new("alice", "wonderland");
        login.remote_addr = Some("192.168.1.10".to_string());
        let response = auth.login(&login).await.unwrap();

        assert_eq!(response.expires_in, DEFAULT_SESSION_TTL.as_secs());
        assert_eq!(auth.session_count(), 1);

        let request = AuthRequest::new().with_header(SESSION_TOKEN_HEADER, response.token.clone());
        let identity = auth.authenticate(&request).await.unwrap();
        assert_eq!(identity.user_id(), 123);
        assert_eq!(identity.remote_id(), Some("192.168.1.10"));
        assert_eq!(identity.session_id(), response.identity.session_id());

        let bearer = AuthRequest::new()
            .with_header("Authorization", format!("Bearer {}", response.token));
        assert!(auth.authenticate(&bearer).await.is_ok());
    }

    #[tokio::test]
    async fn test_raw_token_not_stored() {
        let (auth, _db) = setup();
        let response = auth.login(&LoginRequest::new("alice", "wonderland")).await.unwrap();
        assert!(auth.tree.get(response.token.as_bytes()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (auth, _db) = setup();
        let request = AuthRequest::new().with_header(SESSION_TOKEN_HEADER, "bogus");
        let err = auth.authenticate(&request).await.unwrap_err();
        assert!(matches!(err, SecurityError::Unauthenticated(_)));

        let err = auth.authenticate(&AuthRequest::new()).await.unwrap_err();
        assert!(matches!(err, SecurityError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected_and_removed() {
        let (auth, _db) = setup();
        let record = SessionRecord {
            identity: IdentityContext::builder(5).build(),
            expires_at: 1,
            last_activity: 1,
        };
        auth.tree
            .insert(token_digest("stale").as_bytes(), serde_json::to_vec(&record).unwrap())
            .unwrap();

        let request = AuthRequest::new().with_header(SESSION_TOKEN_HEADER, "stale");
        let err = auth.authenticate(&request).await.unwrap_err();
        assert!(matches!(err, SecurityError::Unauthenticated(ref m) if m == "session expired"));
        assert_eq!(auth.session_count(), 0);
    }

    #[tokio::test]
    async fn test_activity_is_recorded() {
        let (auth, _db) = setup();
        let record = SessionRecord {
            identity: IdentityContext::builder(5).build(),
            expires_at: unix_now() + 60,
            last_activity: 0,
        };
        let key = token_digest("active");
        auth.tree
            .insert(key.as_bytes(), serde_json::to_vec(&record).unwrap())
            .unwrap();

        let request = AuthRequest::new().with_header(SESSION_TOKEN_HEADER, "active");
        auth.authenticate(&request).await.unwrap();

        let (_, stored) = auth.load(&key).unwrap().unwrap();
        assert!(stored.last_activity > 0);
    }

    #[tokio::test]
    async fn test_activity_never_recreates_removed_session() {
        let (auth, _db) = setup();
        let response = auth.login(&LoginRequest::new("alice", "wonderland")).await.unwrap();
        let key = token_digest(&response.token);

        let (current, record) = auth.load(&key).unwrap().unwrap();
        auth.logout(&LogoutRequest::new(response.token.clone())).await.unwrap();

        assert!(!auth.record_activity(&key, &current, &record));
        assert!(auth.tree.get(key.as_bytes()).unwrap().is_none());
        assert_eq!(auth.session_count(), 0);

        let request = AuthRequest::new().with_header(SESSION_TOKEN_HEADER, response.token);
        assert!(auth.authenticate(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_activity_write_keeps_session() {
        let (auth, _db) = setup();
        let response = auth.login(&LoginRequest::new("alice", "wonderland")).await.unwrap();
        let key = token_digest(&response.token);

        let (stale, record) = auth.load(&key).unwrap().unwrap();
        let (fresh, _) = auth.load(&key).unwrap().unwrap();
        assert!(auth.record_activity(&key, &fresh, &record));
        assert!(auth.record_activity(&key, &stale, &record));
        assert_eq!(auth.session_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (auth, _db) = setup();
        let response = auth.login(&LoginRequest::new("alice", "wonderland")).await.unwrap();

        auth.logout(&LogoutRequest::new(response.token.clone())).await.unwrap();
        assert_eq!(auth.session_count(), 0);
        auth.logout(&LogoutRequest::new(response.token.clone())).await.unwrap();

        let request = AuthRequest::new().with_header(SESSION_TOKEN_HEADER, response.token);
        assert!(auth.authenticate(&request).await.is_err());
        assert!(auth.refresher().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (auth, _db) = setup();
        auth.login(&LoginRequest::new("alice", "wonderland")).await.unwrap();
        let stale = SessionRecord {
            identity: IdentityContext::builder(5).build(),
            expires_at: 1,
            last_activity: 1,
        };
        auth.tree
            .insert(b"stale", serde_json::to_vec(&stale).unwrap())
            .unwrap();
        auth.tree.insert(b"corrupt", b"{".to_vec()).unwrap();

        assert_eq!(auth.purge_expired().unwrap(), 2);
        assert_eq!(auth.session_count(), 1);
    }
}
