//! Fieldgate Core - identity, column masking and row filtering.
//!
//! This crate decides what an authenticated caller may see of a result set:
//! - Pluggable authentication producing an immutable [`IdentityContext`]
//! - Column security: ordered hide/mask rules applied after retrieval
//! - Row security: filter templates rendered into predicate fragments
//! - A composite [`SecurityProvider`] and a per-request [`SecurityContext`]
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fieldgate_core::{HeaderAuthenticator, SecurityContext, SecurityProvider, StaticPolicyProvider};
//!
//! let policies = Arc::new(StaticPolicyProvider::from_file("policies.json")?);
//! let provider = SecurityProvider::builder()
//!     .authenticator(Arc::new(HeaderAuthenticator::new()))
//!     .column_security(policies.clone())
//!     .row_security(policies)
//!     .build()?;
//!
//! let ctx = SecurityContext::establish(provider, &request).await?;
//! let filter = ctx.row_filter("public", "orders", Some("id")).await;
//! let changed = ctx.mask_rows("public", "orders", &mut rows).await;
//! ```

pub mod auth;
pub mod cache;
pub mod column;
pub mod context;
pub mod error;
pub mod identity;
pub mod provider;
pub mod row;
pub mod store;

pub use auth::{
    AuthRequest, Authenticator, CredentialStore, HeaderAuthenticator, JwtAuthenticator,
    JwtClaims, LoginRequest, LoginResponse, LogoutRequest, SessionAuthenticator,
    StaticCredentialStore, TokenAuthenticator, TokenRefresher, UserRecord,
};
pub use cache::{CacheStats, CachingProvider};
pub use column::{AccessKind, ColumnSecurity, ColumnSecurityProvider, FieldMasker};
pub use context::SecurityContext;
pub use error::{SecurityError, SecurityResult};
pub use identity::{IdentityBuilder, IdentityContext};
pub use provider::{SecurityProvider, SecurityProviderBuilder};
pub use row::{RowFilter, RowSecurity, RowSecurityProvider, TemplateEngine, TemplateVars};
pub use store::{PolicyDocument, PolicyStore, StaticPolicyProvider};
