//! Composite security provider.
//!
//! [`SecurityProvider`] bundles one authenticator, one column provider and one
//! row provider and satisfies all three contracts by delegation. It adds no
//! policy or caching of its own; wrap an individual delegate in a
//! [`CachingProvider`](crate::CachingProvider) for that.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{
    AuthRequest, Authenticator, LoginRequest, LoginResponse, LogoutRequest, TokenRefresher,
};
use crate::column::{ColumnSecurity, ColumnSecurityProvider};
use crate::error::{SecurityError, SecurityResult};
use crate::identity::IdentityContext;
use crate::row::{RowSecurity, RowSecurityProvider};

/// Aggregation of the three security capabilities.
///
/// Cloning is cheap; clones share the delegates.
#[derive(Clone)]
pub struct SecurityProvider {
    authenticator: Arc<dyn Authenticator>,
    column_security: Arc<dyn ColumnSecurityProvider>,
    row_security: Arc<dyn RowSecurityProvider>,
}

impl SecurityProvider {
    pub fn builder() -> SecurityProviderBuilder {
        SecurityProviderBuilder::default()
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    pub fn column_security_provider(&self) -> &Arc<dyn ColumnSecurityProvider> {
        &self.column_security
    }

    pub fn row_security_provider(&self) -> &Arc<dyn RowSecurityProvider> {
        &self.row_security
    }
}

impl std::fmt::Debug for SecurityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityProvider")
            .field("refresh", &self.authenticator.refresher().is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SecurityProvider`].
#[derive(Default)]
pub struct SecurityProviderBuilder {
    authenticator: Option<Arc<dyn Authenticator>>,
    column_security: Option<Arc<dyn ColumnSecurityProvider>>,
    row_security: Option<Arc<dyn RowSecurityProvider>>,
}

impl SecurityProviderBuilder {
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn column_security(mut self, provider: Arc<dyn ColumnSecurityProvider>) -> Self {
        self.column_security = Some(provider);
        self
    }

    pub fn row_security(mut self, provider: Arc<dyn RowSecurityProvider>) -> Self {
        self.row_security = Some(provider);
        self
    }

    /// Compose the provider.
    ///
    /// Any missing delegate is a [`SecurityError::Configuration`]; callers
    /// should treat it as fatal and refuse to start.
    pub fn build(self) -> SecurityResult<SecurityProvider> {
        let authenticator = self
            .authenticator
            .ok_or_else(|| missing("authenticator"))?;
        let column_security = self
            .column_security
            .ok_or_else(|| missing("column security provider"))?;
        let row_security = self
            .row_security
            .ok_or_else(|| missing("row security provider"))?;

        Ok(SecurityProvider {
            authenticator,
            column_security,
            row_security,
        })
    }
}

fn missing(what: &str) -> SecurityError {
    SecurityError::Configuration(format!("security provider requires a {}", what))
}

#[async_trait]
impl Authenticator for SecurityProvider {
    async fn authenticate(&self, request: &AuthRequest) -> SecurityResult<IdentityContext> {
        self.authenticator.authenticate(request).await
    }

    async fn login(&self, request: &LoginRequest) -> SecurityResult<LoginResponse> {
        self.authenticator.login(request).await
    }

    async fn logout(&self, request: &LogoutRequest) -> SecurityResult<()> {
        self.authenticator.logout(request).await
    }

    fn refresher(&self) -> Option<&dyn TokenRefresher> {
        self.authenticator.refresher()
    }
}

#[async_trait]
impl ColumnSecurityProvider for SecurityProvider {
    async fn column_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<Vec<ColumnSecurity>> {
        self.column_security
            .column_security(user_id, schema, table)
            .await
    }
}

#[async_trait]
impl RowSecurityProvider for SecurityProvider {
    async fn row_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<RowSecurity> {
        self.row_security.row_security(user_id, schema, table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::HeaderAuthenticator;
    use crate::store::StaticPolicyProvider;

    fn policies() -> Arc<StaticPolicyProvider> {
        Arc::new(
            StaticPolicyProvider::from_json(
                r#"{
                    "columns": [{"schema": "public", "table": "users",
                                 "rules": [{"path": ["ssn"], "access": "mask", "mask_start": 5}]}],
                    "rows": [{"schema": "public", "table": "orders",
                              "template": "user_id = {UserID}"}]
                }"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_build_requires_every_delegate() {
        let policies = policies();

        let err = SecurityProvider::builder()
            .column_security(policies.clone())
            .row_security(policies.clone())
            .build()
            .unwrap_err();
        assert!(matches!(err, SecurityError::Configuration(ref m) if m.contains("authenticator")));

        let err = SecurityProvider::builder()
            .authenticator(Arc::new(HeaderAuthenticator::new()))
            .row_security(policies.clone())
            .build()
            .unwrap_err();
        assert!(matches!(err, SecurityError::Configuration(ref m) if m.contains("column")));

        let err = SecurityProvider::builder()
            .authenticator(Arc::new(HeaderAuthenticator::new()))
            .column_security(policies)
            .build()
            .unwrap_err();
        assert!(matches!(err, SecurityError::Configuration(ref m) if m.contains("row")));

        assert!(SecurityProvider::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_delegates_pass_through() {
        let policies = policies();
        let provider = SecurityProvider::builder()
            .authenticator(Arc::new(HeaderAuthenticator::new()))
            .column_security(policies.clone())
            .row_security(policies)
            .build()
            .unwrap();

        let identity = provider
            .authenticate(&AuthRequest::new().with_header("X-User-Id", "9"))
            .await
            .unwrap();
        assert_eq!(identity.user_id(), 9);

        let rules = provider.column_security(9, "public", "users").await.unwrap();
        assert_eq!(rules.len(), 1);

        let row = provider.row_security(9, "public", "orders").await.unwrap();
        assert_eq!(row.template, "user_id = {UserID}");
        assert_eq!(row.user_id, 9);

        assert!(provider.refresher().is_none());
    }
}
