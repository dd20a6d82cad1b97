//! Row-level security.
//!
//! A [`RowSecurityProvider`] returns one [`RowSecurity`] policy per identity
//! and table. The [`TemplateEngine`] renders it into a [`RowFilter`] that the
//! query builder appends to its predicate.

mod template;

pub use template::{RowFilter, TemplateEngine, TemplateVars};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SecurityResult;

/// Row filter directive for one `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSecurity {
    pub schema: String,
    pub table: String,
    /// User the policy was resolved for.
    #[serde(default)]
    pub user_id: i64,
    /// Filter template; empty means no restriction.
    #[serde(default)]
    pub template: String,
    /// When set, no rows are visible and the template is ignored.
    #[serde(default, alias = "hasblock")]
    pub has_block: bool,
}

impl RowSecurity {
    /// Policy with a filter template.
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        user_id: i64,
        template: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            user_id,
            template: template.into(),
            has_block: false,
        }
    }

    /// Policy that places no restriction on rows.
    pub fn unrestricted(schema: impl Into<String>, table: impl Into<String>, user_id: i64) -> Self {
        Self::new(schema, table, user_id, "")
    }

    /// Policy hiding every row.
    pub fn blocked(schema: impl Into<String>, table: impl Into<String>, user_id: i64) -> Self {
        Self {
            has_block: true,
            ..Self::new(schema, table, user_id, "")
        }
    }
}

/// Source of row policies.
#[async_trait]
pub trait RowSecurityProvider: Send + Sync {
    /// Policy for `user_id` reading `schema.table`.
    async fn row_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<RowSecurity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let policy = RowSecurity::new("public", "orders", 1, "user_id = {UserID}");
        assert!(!policy.has_block);

        let open = RowSecurity::unrestricted("public", "orders", 1);
        assert!(open.template.is_empty());

        let blocked = RowSecurity::blocked("public", "orders", 1);
        assert!(blocked.has_block);
    }

    #[test]
    fn test_deserialize_defaults() {
        let policy: RowSecurity =
            serde_json::from_str(r#"{"schema": "public", "table": "orders", "hasblock": true}"#)
                .unwrap();
        assert!(policy.has_block);
        assert_eq!(policy.user_id, 0);
        assert!(policy.template.is_empty());
    }
}
