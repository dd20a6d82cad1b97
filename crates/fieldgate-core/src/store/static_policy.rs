//! In-memory policy provider loaded from a JSON document.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use super::{ColumnPolicyEntry, PolicyDocument, RowPolicyEntry};
use crate::column::{ColumnSecurity, ColumnSecurityProvider};
use crate::error::{SecurityError, SecurityResult};
use crate::row::{RowSecurity, RowSecurityProvider};

type TableKey = (String, String);

/// Entries for one table: the wildcard plus per-user overrides.
#[derive(Debug)]
struct Scoped<T> {
    wildcard: Option<T>,
    users: HashMap<i64, T>,
}

impl<T> Default for Scoped<T> {
    fn default() -> Self {
        Self {
            wildcard: None,
            users: HashMap::new(),
        }
    }
}

impl<T> Scoped<T> {
    fn lookup(&self, user_id: i64) -> Option<&T> {
        self.users.get(&user_id).or(self.wildcard.as_ref())
    }
}

/// Immutable column and row policies held in memory.
///
/// Several column entries for the same table and scope are concatenated in
/// document order. For row entries the last one wins.
#[derive(Debug, Default)]
pub struct StaticPolicyProvider {
    columns: HashMap<TableKey, Scoped<Vec<ColumnSecurity>>>,
    rows: HashMap<TableKey, Scoped<RowPolicyEntry>>,
}

impl StaticPolicyProvider {
    /// Provider with no policies; every lookup is unrestricted.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: PolicyDocument) -> Self {
        let mut provider = Self::new();
        for entry in document.columns {
            provider.add_columns(entry);
        }
        for entry in document.rows {
            provider.add_row(entry);
        }
        provider
    }

    /// Parse a `{"columns": [...], "rows": [...]}` document.
    pub fn from_json(json: &str) -> SecurityResult<Self> {
        let document: PolicyDocument = serde_json::from_str(json)?;
        Ok(Self::from_document(document))
    }

    pub fn from_file(path: impl AsRef<Path>) -> SecurityResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SecurityError::Configuration(format!(
                "cannot read policy file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn add_columns(&mut self, entry: ColumnPolicyEntry) {
        let scoped = self
            .columns
            .entry((entry.schema, entry.table))
            .or_default();
        let rules = match entry.user_id {
            None => scoped.wildcard.get_or_insert_with(Vec::new),
            Some(id) => scoped.users.entry(id).or_default(),
        };
        rules.extend(entry.rules);
    }

    pub fn add_row(&mut self, entry: RowPolicyEntry) {
        let scoped = self
            .rows
            .entry((entry.schema.clone(), entry.table.clone()))
            .or_default();
        match entry.user_id {
            None => scoped.wildcard = Some(entry),
            Some(id) => {
                scoped.users.insert(id, entry);
            }
        }
    }

    /// Number of tables with at least one column or row entry.
    pub fn table_count(&self) -> usize {
        let mut tables: Vec<&TableKey> = self.columns.keys().chain(self.rows.keys()).collect();
        tables.sort();
        tables.dedup();
        tables.len()
    }

    fn key(schema: &str, table: &str) -> TableKey {
        (schema.to_string(), table.to_string())
    }
}

#[async_trait]
impl ColumnSecurityProvider for StaticPolicyProvider {
    async fn column_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<Vec<ColumnSecurity>> {
        Ok(self
            .columns
            .get(&Self::key(schema, table))
            .and_then(|scoped| scoped.lookup(user_id))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl RowSecurityProvider for StaticPolicyProvider {
    async fn row_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<RowSecurity> {
        Ok(self
            .rows
            .get(&Self::key(schema, table))
            .and_then(|scoped| scoped.lookup(user_id))
            .map(|entry| entry.resolve(user_id))
            .unwrap_or_else(|| RowSecurity::unrestricted(schema, table, user_id)))
    }
}
