//! Composition of the security provider from gateway configuration.

use std::sync::Arc;

use fieldgate_core::{
    Authenticator, CachingProvider, ColumnSecurityProvider, HeaderAuthenticator,
    JwtAuthenticator, PolicyStore, RowSecurityProvider, SecurityError, SecurityProvider,
    SecurityResult, SessionAuthenticator, StaticCredentialStore, StaticPolicyProvider,
    TokenAuthenticator,
};
use tracing::{info, warn};

use crate::config::{AuthMode, GatewayConfig};

/// Authenticator holding expirable state.
enum Sweepable {
    Tokens(Arc<TokenAuthenticator>),
    Sessions(Arc<SessionAuthenticator>),
}

/// Everything the gateway composes at startup.
pub struct SecurityStack {
    pub provider: SecurityProvider,
    /// Cache in front of the sled policy store, when one is configured.
    pub policy_cache: Option<Arc<CachingProvider<PolicyStore>>>,
    sweepable: Option<Sweepable>,
}

impl SecurityStack {
    /// Compose the provider described by `config`.
    pub fn build(config: &GatewayConfig) -> SecurityResult<Self> {
        let db = match &config.data_dir {
            Some(path) => Some(sled::open(path)?),
            None => None,
        };

        let (authenticator, sweepable) = build_authenticator(config, db.as_ref())?;

        let mut policy_cache = None;
        let (columns, rows) = match (&db, &config.policy_file) {
            (Some(db), policy_file) => {
                let store = PolicyStore::open(db)?;
                if let Some(path) = policy_file {
                    let json = std::fs::read_to_string(path).map_err(|e| {
                        SecurityError::Configuration(format!(
                            "cannot read policy file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    store.import(&serde_json::from_str(&json)?)?;
                    info!(path = %path.display(), "imported policies into the policy store");
                }
                let cache = Arc::new(
                    CachingProvider::new(store)
                        .with_ttl(config.policy_cache_ttl)
                        .with_capacity(config.policy_cache_capacity),
                );
                policy_cache = Some(cache.clone());
                both(cache)
            }
            (None, Some(path)) => {
                let policies = Arc::new(StaticPolicyProvider::from_file(path)?);
                info!(
                    path = %path.display(),
                    tables = policies.table_count(),
                    "loaded static policies"
                );
                both(policies)
            }
            (None, None) => {
                warn!("no policy source configured, every table is unrestricted");
                both(Arc::new(StaticPolicyProvider::new()))
            }
        };

        let provider = SecurityProvider::builder()
            .authenticator(authenticator)
            .column_security(columns)
            .row_security(rows)
            .build()?;

        Ok(Self {
            provider,
            policy_cache,
            sweepable,
        })
    }

    /// Drop expired tokens or sessions. Returns how many were removed.
    pub fn sweep_expired(&self) -> SecurityResult<usize> {
        match &self.sweepable {
            Some(Sweepable::Tokens(tokens)) => Ok(tokens.cleanup_expired()),
            Some(Sweepable::Sessions(sessions)) => sessions.purge_expired(),
            None => Ok(0),
        }
    }
}

/// Use one policy source for both column and row lookups.
fn both<P>(policies: Arc<P>) -> (Arc<dyn ColumnSecurityProvider>, Arc<dyn RowSecurityProvider>)
where
    P: ColumnSecurityProvider + RowSecurityProvider + 'static,
{
    let columns: Arc<dyn ColumnSecurityProvider> = policies.clone();
    let rows: Arc<dyn RowSecurityProvider> = policies;
    (columns, rows)
}

fn build_authenticator(
    config: &GatewayConfig,
    db: Option<&sled::Db>,
) -> SecurityResult<(Arc<dyn Authenticator>, Option<Sweepable>)> {
    if config.auth_mode == AuthMode::Header {
        return Ok((header_authenticator(), None));
    }

    let users = config.users_file.as_ref().ok_or_else(|| {
        SecurityError::Configuration(format!(
            "{} mode requires a users file",
            config.auth_mode.as_str()
        ))
    })?;
    let credentials = Arc::new(StaticCredentialStore::from_file(users)?);
    info!(users = credentials.user_count(), "loaded credential store");

    match config.auth_mode {
        AuthMode::Token => {
            let tokens = Arc::new(TokenAuthenticator::new(credentials).with_ttl(config.token_ttl));
            let authenticator: Arc<dyn Authenticator> = tokens.clone();
            Ok((authenticator, Some(Sweepable::Tokens(tokens))))
        }
        AuthMode::Jwt => {
            let authenticator = match config.jwt_secret.as_deref() {
                Some(secret) if !secret.is_empty() => {
                    JwtAuthenticator::with_secret_str(secret, credentials)
                }
                _ => JwtAuthenticator::from_env(credentials)?,
            };
            let authenticator: Arc<dyn Authenticator> =
                Arc::new(authenticator.with_ttl(config.token_ttl));
            Ok((authenticator, None))
        }
        AuthMode::Session => {
            let db = db.ok_or_else(|| {
                SecurityError::Configuration("session mode requires a data directory".into())
            })?;
            let sessions =
                Arc::new(SessionAuthenticator::open(db, credentials)?.with_ttl(config.token_ttl));
            let authenticator: Arc<dyn Authenticator> = sessions.clone();
            Ok((authenticator, Some(Sweepable::Sessions(sessions))))
        }
        AuthMode::Header => Ok((header_authenticator(), None)),
    }
}

fn header_authenticator() -> Arc<dyn Authenticator> {
    Arc::new(HeaderAuthenticator::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldgate_core::{AuthRequest, LoginRequest};
    use std::io::Write;

    fn users_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[{"user_id": 1, "username": "alice", "password": "pw"}]"#)
            .unwrap();
        file
    }

    #[tokio::test]
    async fn test_token_mode_round_trip() {
        let users = users_file();
        let config = GatewayConfig {
            auth_mode: AuthMode::Token,
            users_file: Some(users.path().to_path_buf()),
            ..Default::default()
        };
        let stack = SecurityStack::build(&config).unwrap();

        let login = stack
            .provider
            .login(&LoginRequest::new("alice", "pw"))
            .await
            .unwrap();
        let request =
            AuthRequest::new().with_header("Authorization", format!("Bearer {}", login.token));
        let identity = stack.provider.authenticate(&request).await.unwrap();
        assert_eq!(identity.user_id(), 1);
        assert!(stack.provider.refresher().is_some());
        assert_eq!(stack.sweep_expired().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_data_dir_uses_cached_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut policies = tempfile::NamedTempFile::new().unwrap();
        policies
            .write_all(
                br#"{"rows": [{"schema": "public", "table": "orders", "template": "owner = {UserID}"}]}"#,
            )
            .unwrap();

        let config = GatewayConfig {
            auth_mode: AuthMode::Header,
            data_dir: Some(dir.path().join("db")),
            policy_file: Some(policies.path().to_path_buf()),
            ..Default::default()
        };
        let stack = SecurityStack::build(&config).unwrap();
        let cache = stack.policy_cache.clone().unwrap();

        let policy = stack.provider.row_security(4, "public", "orders").await.unwrap();
        assert_eq!(policy.template, "owner = {UserID}");
        stack.provider.row_security(4, "public", "orders").await.unwrap();
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_missing_users_file_is_configuration_error() {
        let config = GatewayConfig {
            auth_mode: AuthMode::Token,
            users_file: Some("/nonexistent/users.json".into()),
            ..Default::default()
        };
        assert!(matches!(
            SecurityStack::build(&config),
            Err(SecurityError::Configuration(_))
        ));
    }
}
