//! Security policy storage.
//!
//! Persists column rule sets and row policies using sled. Keys are
//! `schema \0 table \0 scope`, where scope is `*` for the wildcard entry or
//! the decimal user id.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ColumnPolicyEntry, PolicyDocument, RowPolicyEntry};
use crate::column::{ColumnSecurity, ColumnSecurityProvider};
use crate::error::SecurityResult;
use crate::row::{RowSecurity, RowSecurityProvider};

const COLUMN_TREE_NAME: &[u8] = b"security:columns";
const ROW_TREE_NAME: &[u8] = b"security:rows";
const WILDCARD_SCOPE: &[u8] = b"*";

/// Policy store for persisting column and row security.
pub struct PolicyStore {
    columns: sled::Tree,
    rows: sled::Tree,
}

impl PolicyStore {
    /// Open the policy trees in `db`.
    pub fn open(db: &sled::Db) -> SecurityResult<Self> {
        Ok(Self {
            columns: db.open_tree(COLUMN_TREE_NAME)?,
            rows: db.open_tree(ROW_TREE_NAME)?,
        })
    }

    /// Replace the rule set for a table and scope.
    pub fn put_column_rules(
        &self,
        schema: &str,
        table: &str,
        user_id: Option<i64>,
        rules: &[ColumnSecurity],
    ) -> SecurityResult<()> {
        let value = serde_json::to_vec(rules)?;
        self.columns
            .insert(Self::key(schema, table, user_id), value)?;
        Ok(())
    }

    /// Rule set stored for exactly this scope, without wildcard fallback.
    pub fn get_column_rules(
        &self,
        schema: &str,
        table: &str,
        user_id: Option<i64>,
    ) -> SecurityResult<Option<Vec<ColumnSecurity>>> {
        match self.columns.get(Self::key(schema, table, user_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_column_rules(
        &self,
        schema: &str,
        table: &str,
        user_id: Option<i64>,
    ) -> SecurityResult<bool> {
        let removed = self.columns.remove(Self::key(schema, table, user_id))?;
        Ok(removed.is_some())
    }

    /// Store a row policy entry under its own scope.
    pub fn put_row_policy(&self, entry: &RowPolicyEntry) -> SecurityResult<()> {
        let value = serde_json::to_vec(entry)?;
        self.rows
            .insert(Self::key(&entry.schema, &entry.table, entry.user_id), value)?;
        Ok(())
    }

    /// Row policy stored for exactly this scope, without wildcard fallback.
    pub fn get_row_policy(
        &self,
        schema: &str,
        table: &str,
        user_id: Option<i64>,
    ) -> SecurityResult<Option<RowPolicyEntry>> {
        match self.rows.get(Self::key(schema, table, user_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove_row_policy(
        &self,
        schema: &str,
        table: &str,
        user_id: Option<i64>,
    ) -> SecurityResult<bool> {
        let removed = self.rows.remove(Self::key(schema, table, user_id))?;
        Ok(removed.is_some())
    }

    /// Write every entry of a document. Column entries for the same scope
    /// are concatenated in document order, matching the static provider.
    pub fn import(&self, document: &PolicyDocument) -> SecurityResult<()> {
        let mut merged: Vec<&ColumnPolicyEntry> = Vec::new();
        let mut rule_sets: Vec<Vec<ColumnSecurity>> = Vec::new();
        for entry in &document.columns {
            let existing = merged.iter().position(|seen| {
                seen.schema == entry.schema
                    && seen.table == entry.table
                    && seen.user_id == entry.user_id
            });
            match existing {
                Some(i) => rule_sets[i].extend(entry.rules.iter().cloned()),
                None => {
                    merged.push(entry);
                    rule_sets.push(entry.rules.clone());
                }
            }
        }
        for (entry, rules) in merged.iter().zip(&rule_sets) {
            self.put_column_rules(&entry.schema, &entry.table, entry.user_id, rules)?;
        }

        for entry in &document.rows {
            self.put_row_policy(entry)?;
        }

        debug!(
            columns = rule_sets.len(),
            rows = document.rows.len(),
            "imported policy document"
        );
        Ok(())
    }

    pub fn column_entry_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_entry_count(&self) -> usize {
        self.rows.len()
    }

    /// Clear all policies.
    pub fn clear(&self) -> SecurityResult<()> {
        self.columns.clear()?;
        self.rows.clear()?;
        Ok(())
    }

    fn key(schema: &str, table: &str, user_id: Option<i64>) -> Vec<u8> {
        let mut key = Vec::with_capacity(schema.len() + table.len() + 24);
        key.extend_from_slice(schema.as_bytes());
        key.push(0);
        key.extend_from_slice(table.as_bytes());
        key.push(0);
        match user_id {
            Some(id) => key.extend_from_slice(id.to_string().as_bytes()),
            None => key.extend_from_slice(WILDCARD_SCOPE),
        }
        key
    }

    /// Raw payload for the user's entry, falling back to the wildcard.
    fn lookup(
        tree: &sled::Tree,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<Option<sled::IVec>> {
        if let Some(bytes) = tree.get(Self::key(schema, table, Some(user_id)))? {
            return Ok(Some(bytes));
        }
        Ok(tree.get(Self::key(schema, table, None))?)
    }
}

#[async_trait]
impl ColumnSecurityProvider for PolicyStore {
    async fn column_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<Vec<ColumnSecurity>> {
        let Some(bytes) = Self::lookup(&self.columns, user_id, schema, table)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(rules) => Ok(rules),
            Err(e) => {
                warn!(user_id, schema, table, error = %e, "malformed column policy, applying no rules");
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl RowSecurityProvider for PolicyStore {
    async fn row_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<RowSecurity> {
        let Some(bytes) = Self::lookup(&self.rows, user_id, schema, table)? else {
            return Ok(RowSecurity::unrestricted(schema, table, user_id));
        };
        match serde_json::from_slice::<RowPolicyEntry>(&bytes) {
            Ok(entry) => Ok(entry.resolve(user_id)),
            Err(e) => {
                warn!(user_id, schema, table, error = %e, "malformed row policy, treating as unrestricted");
                Ok(RowSecurity::unrestricted(schema, table, user_id))
            }
        }
    }
}
