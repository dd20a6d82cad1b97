//! Policy sources.
//!
//! Both sources share the [`PolicyDocument`] format and the same lookup
//! rule: an entry scoped to the requesting user wins over the wildcard entry
//! for the same table.

mod policy_store;
mod static_policy;

pub use policy_store::PolicyStore;
pub use static_policy::StaticPolicyProvider;

use serde::{Deserialize, Serialize};

use crate::column::ColumnSecurity;
use crate::row::RowSecurity;

/// Column rules for one table, optionally scoped to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPolicyEntry {
    pub schema: String,
    pub table: String,
    /// `None` applies to every user without a scoped entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub rules: Vec<ColumnSecurity>,
}

/// Row policy for one table, optionally scoped to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowPolicyEntry {
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub template: String,
    #[serde(default, alias = "hasblock")]
    pub has_block: bool,
}

impl RowPolicyEntry {
    /// Resolve the entry into the policy handed to `user_id`.
    pub fn resolve(&self, user_id: i64) -> RowSecurity {
        RowSecurity {
            schema: self.schema.clone(),
            table: self.table.clone(),
            user_id,
            template: self.template.clone(),
            has_block: self.has_block,
        }
    }
}

/// Serialized policy set: `{"columns": [...], "rows": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub columns: Vec<ColumnPolicyEntry>,
    #[serde(default)]
    pub rows: Vec<RowPolicyEntry>,
}

impl PolicyDocument {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }
}
