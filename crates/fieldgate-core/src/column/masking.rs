//! Masking engine applying [`ColumnSecurity`] rules to result rows.

use serde_json::Value;

use super::{AccessKind, ColumnSecurity};

/// Field masker that applies column rules during response assembly.
pub struct FieldMasker;

impl FieldMasker {
    /// Mask a text value.
    ///
    /// Without `invert`, the first `start` and last `end` characters are kept
    /// and everything between becomes `mask_char`; when `start + end` covers the
    /// whole value it is returned unchanged. With `invert` the ranges swap: the
    /// leading and trailing characters are masked and the middle is kept.
    ///
    /// Lengths count Unicode scalar values, so multi-byte characters are never
    /// split.
    pub fn mask_text(value: &str, start: usize, end: usize, mask_char: char, invert: bool) -> String {
        let len = value.chars().count();
        if !invert && start.saturating_add(end) >= len {
            return value.to_string();
        }

        let tail_from = len.saturating_sub(end);
        value
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let at_edge = i < start || i >= tail_from;
                if at_edge == invert {
                    mask_char
                } else {
                    c
                }
            })
            .collect()
    }

    /// Apply one rule to a row (or an array of rows).
    ///
    /// Returns the number of fields changed. A path that does not resolve is a
    /// no-op, as is an empty path.
    pub fn apply(row: &mut Value, rule: &ColumnSecurity) -> usize {
        if rule.path.is_empty() {
            return 0;
        }
        Self::apply_at(row, &rule.path, rule)
    }

    /// Apply rules in order to every row. Later rules see the output of
    /// earlier ones; once a field is hidden, later rules on it do nothing.
    pub fn apply_all(rows: &mut [Value], rules: &[ColumnSecurity]) -> usize {
        if rules.is_empty() {
            return 0;
        }
        rows.iter_mut()
            .map(|row| rules.iter().map(|rule| Self::apply(row, rule)).sum::<usize>())
            .sum()
    }

    fn apply_at(value: &mut Value, path: &[String], rule: &ColumnSecurity) -> usize {
        match value {
            // Arrays met along the path fan out to each element.
            Value::Array(items) => items
                .iter_mut()
                .map(|item| Self::apply_at(item, path, rule))
                .sum(),
            Value::Object(map) => {
                let Some((head, rest)) = path.split_first() else {
                    return 0;
                };
                if !rest.is_empty() {
                    return match map.get_mut(head) {
                        Some(child) => Self::apply_at(child, rest, rule),
                        None => 0,
                    };
                }
                match rule.access {
                    AccessKind::Hide => usize::from(map.remove(head).is_some()),
                    AccessKind::Mask => match map.get_mut(head) {
                        Some(field) => usize::from(Self::mask_field(field, rule)),
                        None => 0,
                    },
                }
            }
            _ => 0,
        }
    }

    /// Mask a leaf. Numbers and booleans are coerced to text; null and
    /// containers carry nothing to mask. A value the rule fully reveals keeps
    /// its original type.
    fn mask_field(field: &mut Value, rule: &ColumnSecurity) -> bool {
        let text = match field {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null | Value::Array(_) | Value::Object(_) => return false,
        };

        let masked = Self::mask_text(
            &text,
            rule.mask_start,
            rule.mask_end,
            rule.mask_char,
            rule.invert,
        );
        if masked == text {
            return false;
        }
        *field = Value::String(masked);
        true
    }
}
