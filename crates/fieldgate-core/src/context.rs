//! Per-request security context.
//!
//! A [`SecurityContext`] is established once by the authentication stage and
//! passed explicitly to the stages after it: row filtering before the query,
//! masking after it. It is read-only once built.
//!
//! Policy lookups here are fail-open. When a provider errors (or exceeds the
//! lookup timeout) the failure is logged at `warn` and the data operation
//! proceeds without restriction. Operators who need fail-closed behavior must
//! make their providers infallible or deny at the provider level.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{AuthRequest, Authenticator};
use crate::column::{ColumnSecurity, ColumnSecurityProvider, FieldMasker};
use crate::error::{SecurityError, SecurityResult};
use crate::identity::IdentityContext;
use crate::provider::SecurityProvider;
use crate::row::{RowFilter, RowSecurity, RowSecurityProvider, TemplateEngine, TemplateVars};

/// Identity plus the active provider for one request.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    identity: Arc<IdentityContext>,
    provider: SecurityProvider,
    lookup_timeout: Option<Duration>,
}

impl SecurityContext {
    pub fn new(identity: IdentityContext, provider: SecurityProvider) -> Self {
        Self {
            identity: Arc::new(identity),
            provider,
            lookup_timeout: None,
        }
    }

    /// Authenticate `request` and build the context.
    pub async fn establish(
        provider: SecurityProvider,
        request: &AuthRequest,
    ) -> SecurityResult<Self> {
        let identity = provider.authenticate(request).await?;
        debug!(user_id = identity.user_id(), "security context established");
        Ok(Self::new(identity, provider))
    }

    /// Bound every policy lookup. A lookup that runs past it is abandoned
    /// and handled as a load failure.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = Some(timeout);
        self
    }

    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    pub fn user_id(&self) -> i64 {
        self.identity.user_id()
    }

    pub fn provider(&self) -> &SecurityProvider {
        &self.provider
    }

    /// Column rules for `schema.table`; empty on load failure.
    pub async fn column_rules(&self, schema: &str, table: &str) -> Vec<ColumnSecurity> {
        let user_id = self.user_id();
        let lookup = self.provider.column_security(user_id, schema, table);
        match self.bounded(lookup).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(user_id, schema, table, error = %e, "column policy load failed, serving unmasked");
                Vec::new()
            }
        }
    }

    /// Row policy for `schema.table`; unrestricted on load failure.
    pub async fn row_policy(&self, schema: &str, table: &str) -> RowSecurity {
        let user_id = self.user_id();
        let lookup = self.provider.row_security(user_id, schema, table);
        match self.bounded(lookup).await {
            Ok(policy) => policy,
            Err(e) => {
                warn!(user_id, schema, table, error = %e, "row policy load failed, serving unfiltered");
                RowSecurity::unrestricted(schema, table, user_id)
            }
        }
    }

    /// Pre-query stage: the rendered row filter for `schema.table`.
    pub async fn row_filter(
        &self,
        schema: &str,
        table: &str,
        primary_key: Option<&str>,
    ) -> RowFilter {
        let policy = self.row_policy(schema, table).await;

        let mut vars = TemplateVars::new(self.user_id(), schema, table);
        if let Some(primary_key) = primary_key {
            vars = vars.with_primary_key(primary_key);
        }

        let filter = TemplateEngine::render(&policy, &vars);
        let unresolved = filter.unresolved_placeholders();
        if !unresolved.is_empty() {
            warn!(
                user_id = self.user_id(),
                schema,
                table,
                unresolved = ?unresolved,
                "row filter has unresolved placeholders"
            );
        }
        filter
    }

    /// Post-query stage: mask `rows` in place. Returns the number of fields
    /// changed.
    pub async fn mask_rows(&self, schema: &str, table: &str, rows: &mut [Value]) -> usize {
        let rules = self.column_rules(schema, table).await;
        if rules.is_empty() {
            return 0;
        }
        let changed = FieldMasker::apply_all(rows, &rules);
        debug!(
            user_id = self.user_id(),
            schema,
            table,
            rules = rules.len(),
            changed,
            "masked result rows"
        );
        changed
    }

    async fn bounded<T, F>(&self, lookup: F) -> SecurityResult<T>
    where
        F: std::future::Future<Output = SecurityResult<T>>,
    {
        match self.lookup_timeout {
            Some(timeout) => tokio::time::timeout(timeout, lookup).await.map_err(|_| {
                SecurityError::PolicyLoad(format!("lookup exceeded {:?}", timeout))
            })?,
            None => lookup.await,
        }
    }
}
