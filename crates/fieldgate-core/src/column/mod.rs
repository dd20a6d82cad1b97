//! Column (field) level security.
//!
//! A [`ColumnSecurityProvider`] returns the ordered [`ColumnSecurity`] rules
//! for an identity and table; the [`FieldMasker`] applies them to result rows
//! after retrieval. Persisted data is never touched.

mod masking;

pub use masking::FieldMasker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SecurityResult;

/// What to do with a matched field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// Replace part of the value with a mask character.
    Mask,
    /// Remove the field from the output entirely.
    Hide,
}

fn default_mask_char() -> char {
    '*'
}

/// One masking or hiding directive for a field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSecurity {
    /// Path segments, outermost first (e.g. `["address", "street"]`).
    pub path: Vec<String>,
    #[serde(alias = "accesstype")]
    pub access: AccessKind,
    /// Characters kept (or, inverted, masked) at the start.
    #[serde(default)]
    pub mask_start: usize,
    /// Characters kept (or, inverted, masked) at the end.
    #[serde(default)]
    pub mask_end: usize,
    #[serde(default = "default_mask_char")]
    pub mask_char: char,
    /// Swap the masked and revealed ranges.
    #[serde(default)]
    pub invert: bool,
}

impl ColumnSecurity {
    /// Mask rule revealing `start` leading and `end` trailing characters.
    pub fn mask<I, S>(path: I, start: usize, end: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            access: AccessKind::Mask,
            mask_start: start,
            mask_end: end,
            mask_char: default_mask_char(),
            invert: false,
        }
    }

    /// Rule removing the field at `path`.
    pub fn hide<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            access: AccessKind::Hide,
            mask_start: 0,
            mask_end: 0,
            mask_char: default_mask_char(),
            invert: false,
        }
    }

    /// Split a dotted path such as `"address.street"` into segments.
    pub fn split_path(dotted: &str) -> Vec<String> {
        dotted
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn with_mask_char(mut self, mask_char: char) -> Self {
        self.mask_char = mask_char;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Dotted form of the path, for diagnostics.
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// Source of column rules.
#[async_trait]
pub trait ColumnSecurityProvider: Send + Sync {
    /// Rules for `user_id` reading `schema.table`, in application order.
    /// An empty list means no restriction.
    async fn column_security(
        &self,
        user_id: i64,
        schema: &str,
        table: &str,
    ) -> SecurityResult<Vec<ColumnSecurity>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_defaults() {
        let rule: ColumnSecurity =
            serde_json::from_str(r#"{"path": ["ssn"], "access": "mask", "mask_start": 5}"#)
                .unwrap();
        assert_eq!(rule, ColumnSecurity::mask(["ssn"], 5, 0));
    }

    #[test]
    fn test_deserialize_accesstype_alias() {
        let rule: ColumnSecurity =
            serde_json::from_str(r#"{"path": ["a", "b"], "accesstype": "hide"}"#).unwrap();
        assert_eq!(rule.access, AccessKind::Hide);
        assert_eq!(rule.dotted_path(), "a.b");
    }

    #[test]
    fn test_split_path() {
        assert_eq!(ColumnSecurity::split_path("address.street"), vec!["address", "street"]);
        assert!(ColumnSecurity::split_path("").is_empty());
        assert_eq!(ColumnSecurity::split_path(".a..b."), vec!["a", "b"]);
    }

    #[test]
    fn test_builders() {
        let rule = ColumnSecurity::mask(["card"], 0, 4)
            .with_mask_char('#')
            .inverted();
        assert_eq!(rule.mask_char, '#');
        assert!(rule.invert);
        assert_eq!(ColumnSecurity::hide(["password"]).access, AccessKind::Hide);
    }
}
