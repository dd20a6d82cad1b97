//! Gateway configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use fieldgate_core::auth::JWT_SECRET_ENV;
use thiserror::Error;

/// How callers authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    /// In-memory opaque bearer tokens.
    Token,
    /// Signed JWTs (HS256).
    Jwt,
    /// Sessions persisted in the sled data directory.
    Session,
    /// Identity headers set by a trusted upstream proxy.
    Header,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Token => "token",
            AuthMode::Jwt => "jwt",
            AuthMode::Session => "session",
            AuthMode::Header => "header",
        }
    }

    /// Whether this mode issues tokens through `/auth/login`.
    pub fn issues_tokens(&self) -> bool {
        !matches!(self, AuthMode::Header)
    }
}

/// Fieldgate policy gateway command line arguments.
#[derive(Debug, Parser)]
#[command(name = "fieldgate-gateway")]
#[command(about = "HTTP policy-decision gateway for fieldgate")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Authentication mode.
    #[arg(long, value_enum, default_value_t = AuthMode::Token)]
    pub auth: AuthMode,

    /// JSON policy document ({"columns": [...], "rows": [...]}).
    #[arg(short, long)]
    pub policies: Option<PathBuf>,

    /// sled data directory for the policy store and sessions.
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// JSON list of user accounts for login.
    #[arg(short, long)]
    pub users: Option<PathBuf>,

    /// HMAC secret for jwt mode.
    #[arg(long, env = JWT_SECRET_ENV, hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Lifetime (s) of issued tokens and sessions.
    #[arg(long, default_value_t = 3600)]
    pub token_ttl_secs: u64,

    /// Lifetime (s) of cached policy lookups.
    #[arg(long, default_value_t = 60)]
    pub policy_cache_ttl_secs: u64,

    /// Maximum cached policy lookups per kind. Zero disables the cache.
    #[arg(long, default_value_t = 10_000)]
    pub policy_cache_capacity: usize,

    /// Per-lookup deadline (ms) for policy reads.
    #[arg(long, default_value_t = 5_000)]
    pub request_timeout_ms: u64,

    /// Interval (s) between sweeps of expired tokens and sessions.
    #[arg(long, default_value_t = 300)]
    pub sweep_interval_secs: u64,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    pub auth_mode: AuthMode,
    /// JSON policy document, if any.
    pub policy_file: Option<PathBuf>,
    /// sled data directory, if any.
    pub data_dir: Option<PathBuf>,
    /// JSON users file, if any.
    pub users_file: Option<PathBuf>,
    pub jwt_secret: Option<String>,
    pub token_ttl: Duration,
    pub policy_cache_ttl: Duration,
    pub policy_cache_capacity: usize,
    /// Deadline for a single policy lookup.
    pub request_timeout: Duration,
    pub sweep_interval: Duration,
}

/// Inconsistent gateway settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} mode requires a users file (--users)")]
    MissingUsers(&'static str),

    #[error("jwt mode requires a secret (--jwt-secret or FIELDGATE_JWT_SECRET)")]
    MissingJwtSecret,

    #[error("session mode requires a data directory (--data-dir)")]
    MissingDataDir,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl GatewayConfig {
    /// Reject settings that cannot produce a working security provider.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_mode.issues_tokens() && self.users_file.is_none() {
            return Err(ConfigError::MissingUsers(self.auth_mode.as_str()));
        }
        if self.auth_mode == AuthMode::Jwt
            && self.jwt_secret.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingJwtSecret);
        }
        if self.auth_mode == AuthMode::Session && self.data_dir.is_none() {
            return Err(ConfigError::MissingDataDir);
        }
        if self.token_ttl.is_zero() {
            return Err(ConfigError::Zero("token TTL"));
        }
        if self.policy_cache_ttl.is_zero() {
            return Err(ConfigError::Zero("policy cache TTL"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero("request timeout"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Zero("sweep interval"));
        }
        Ok(())
    }
}

impl From<&Args> for GatewayConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            auth_mode: args.auth,
            policy_file: args.policies.clone(),
            data_dir: args.data_dir.clone(),
            users_file: args.users.clone(),
            jwt_secret: args.jwt_secret.clone(),
            token_ttl: Duration::from_secs(args.token_ttl_secs),
            policy_cache_ttl: Duration::from_secs(args.policy_cache_ttl_secs),
            policy_cache_capacity: args.policy_cache_capacity,
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth_mode: AuthMode::Token,
            policy_file: None,
            data_dir: None,
            users_file: None,
            jwt_secret: None,
            token_ttl: Duration::from_secs(3600),
            policy_cache_ttl: Duration::from_secs(60),
            policy_cache_capacity: 10_000,
            request_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(300),
        }
    }
}
