//! Row filter template rendering.
//!
//! Recognized placeholders:
//!
//! | Placeholder        | Value                                  |
//! |--------------------|----------------------------------------|
//! | `{UserID}`         | identity id, as a bare integer         |
//! | `{PrimaryKeyName}` | primary key column supplied by caller  |
//! | `{TableName}`      | table name supplied by caller          |
//! | `{SchemaName}`     | schema name supplied by caller         |
//!
//! Anything else in braces is copied through untouched so that policy
//! authoring mistakes stay visible via [`RowFilter::unresolved_placeholders`].
//! The output is an opaque predicate fragment; it is never parsed here.

use super::RowSecurity;

/// Predicate matching every row.
pub const ALWAYS_TRUE: &str = "1=1";

/// Predicate matching no row.
pub const ALWAYS_FALSE: &str = "1=0";

/// Values substituted into a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    pub user_id: i64,
    pub schema: String,
    pub table: String,
    /// Without it `{PrimaryKeyName}` stays unresolved.
    pub primary_key: Option<String>,
}

impl TemplateVars {
    pub fn new(user_id: i64, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            user_id,
            schema: schema.into(),
            table: table.into(),
            primary_key: None,
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = Some(primary_key.into());
        self
    }

    fn resolve(&self, name: &str) -> Option<String> {
        match name {
            "UserID" => Some(self.user_id.to_string()),
            "PrimaryKeyName" => self.primary_key.clone(),
            "TableName" => Some(self.table.clone()),
            "SchemaName" => Some(self.schema.clone()),
            _ => None,
        }
    }
}

/// Rendered row restriction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// No restriction.
    Unrestricted,
    /// No row is visible.
    Blocked,
    /// Rows matching this predicate fragment are visible.
    Predicate(String),
}

impl RowFilter {
    /// Fragment to append to the query's predicate.
    pub fn to_sql(&self) -> &str {
        match self {
            RowFilter::Unrestricted => ALWAYS_TRUE,
            RowFilter::Blocked => ALWAYS_FALSE,
            RowFilter::Predicate(predicate) => predicate,
        }
    }

    pub fn is_restrictive(&self) -> bool {
        !matches!(self, RowFilter::Unrestricted)
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RowFilter::Blocked)
    }

    /// `{Name}` tokens left in the predicate after rendering.
    pub fn unresolved_placeholders(&self) -> Vec<String> {
        let RowFilter::Predicate(predicate) = self else {
            return Vec::new();
        };

        let mut found = Vec::new();
        let mut rest = predicate.as_str();
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    let is_name = !name.is_empty()
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                    if is_name {
                        found.push(format!("{{{}}}", name));
                        rest = &after[close + 1..];
                    } else {
                        rest = after;
                    }
                }
                None => break,
            }
        }
        found
    }
}

/// Renders [`RowSecurity`] templates.
pub struct TemplateEngine;

impl TemplateEngine {
    /// Render a policy.
    ///
    /// A block wins over any template. An empty (or blank) template renders as
    /// unrestricted.
    pub fn render(policy: &RowSecurity, vars: &TemplateVars) -> RowFilter {
        if policy.has_block {
            return RowFilter::Blocked;
        }
        if policy.template.trim().is_empty() {
            return RowFilter::Unrestricted;
        }
        RowFilter::Predicate(Self::substitute(&policy.template, vars))
    }

    /// Replace recognized placeholders in one left-to-right pass. Substituted
    /// values are never rescanned.
    pub fn substitute(template: &str, vars: &TemplateVars) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let candidate = &rest[open..];

            let Some(close) = candidate.find('}') else {
                out.push_str(candidate);
                return out;
            };
            let name = &candidate[1..close];
            if name.contains('{') {
                // An inner brace starts the real token; emit this one literally.
                out.push('{');
                rest = &candidate[1..];
                continue;
            }

            match vars.resolve(name) {
                Some(value) => out.push_str(&value),
                None => out.push_str(&candidate[..=close]),
            }
            rest = &candidate[close + 1..];
        }

        out.push_str(rest);
        out
    }
}
