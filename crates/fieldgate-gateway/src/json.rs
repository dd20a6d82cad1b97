//! JSON request and response types for the HTTP gateway.

use fieldgate_core::{IdentityContext, RowFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Gateway version.
    pub version: String,
    /// Configured authentication mode.
    pub auth_mode: String,
    /// Whether `/auth/refresh` is available.
    pub refresh_supported: bool,
    /// Policy cache statistics, when a cache is in front of the policy store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_cache: Option<CacheStatsJson>,
}

/// Policy cache statistics.
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheStatsJson {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Login request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

/// Logout request body. The token defaults to the request's own credential.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LogoutBody {
    #[serde(default)]
    pub token: Option<String>,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Success flag.
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Identity of the caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub identity: IdentityContext,
}

/// Query parameters of the filter endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    /// Primary key column substituted for `{PrimaryKeyName}`.
    #[serde(default)]
    pub primary_key: Option<String>,
}

/// Row filter decision for the external query builder.
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterResponse {
    /// Predicate fragment to append to the query.
    pub predicate: String,
    pub blocked: bool,
    pub unrestricted: bool,
    /// Placeholders the policy left unresolved.
    pub unresolved: Vec<String>,
}

impl From<&RowFilter> for FilterResponse {
    fn from(filter: &RowFilter) -> Self {
        Self {
            predicate: filter.to_sql().to_string(),
            blocked: filter.is_blocked(),
            unrestricted: !filter.is_restrictive(),
            unresolved: filter.unresolved_placeholders(),
        }
    }
}

/// Rows to mask.
#[derive(Debug, Serialize, Deserialize)]
pub struct MaskBody {
    pub rows: Vec<Value>,
}

/// Masked rows.
#[derive(Debug, Serialize, Deserialize)]
pub struct MaskResponse {
    pub rows: Vec<Value>,
    /// Number of fields changed.
    pub changed: usize,
}
