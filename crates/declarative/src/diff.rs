//! Attribute-level diff between desired and recorded inputs

use crate::types::AttributeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Desired value of an attribute after reference resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlannedValue {
    /// Fully resolved
    Known(Value),
    /// Depends on a resource that is not applied yet
    Unknown,
    /// Attribute no longer declared
    Removed,
}

impl fmt::Display for PlannedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "{}", display_value(v)),
            Self::Unknown => write!(f, "(known after apply)"),
            Self::Removed => write!(f, "(removed)"),
        }
    }
}

/// One changed attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<Value>,
    pub after: PlannedValue,
}

/// Compare resolved desired attributes with the inputs recorded last time.
///
/// `None` in `desired` marks an attribute whose value is not known yet; it
/// always counts as a change.
pub fn diff_fields(
    desired: &BTreeMap<String, Option<Value>>,
    recorded: &AttributeMap,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (field, value) in desired {
        let before = recorded.get(field).cloned();
        match value {
            Some(v) if before.as_ref() == Some(v) => {}
            Some(v) => changes.push(FieldChange {
                field: field.clone(),
                before,
                after: PlannedValue::Known(v.clone()),
            }),
            None => changes.push(FieldChange {
                field: field.clone(),
                before,
                after: PlannedValue::Unknown,
            }),
        }
    }

    for (field, before) in recorded {
        if !desired.contains_key(field) {
            changes.push(FieldChange {
                field: field.clone(),
                before: Some(before.clone()),
                after: PlannedValue::Removed,
            });
        }
    }

    changes
}

/// Render a JSON value compactly for display; strings unquoted
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorded(pairs: &[(&str, Value)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identical_attributes_have_no_changes() {
        let desired = BTreeMap::from([("port".to_string(), Some(json!(8000)))]);
        let changes = diff_fields(&desired, &recorded(&[("port", json!(8000))]));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_changed_unknown_and_removed() {
        let desired = BTreeMap::from([
            ("port".to_string(), Some(json!(9000))),
            ("user_data".to_string(), None),
        ]);
        let changes = diff_fields(
            &desired,
            &recorded(&[
                ("port", json!(8000)),
                ("user_data", json!("#!/bin/sh")),
                ("legacy", json!(true)),
            ]),
        );

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].field, "port");
        assert_eq!(changes[0].after, PlannedValue::Known(json!(9000)));
        assert_eq!(changes[1].after, PlannedValue::Unknown);
        assert_eq!(changes[2].field, "legacy");
        assert_eq!(changes[2].after, PlannedValue::Removed);
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("10.0.0.0/16")), "10.0.0.0/16");
        assert_eq!(display_value(&json!(22)), "22");
        assert_eq!(PlannedValue::Unknown.to_string(), "(known after apply)");
    }
}
