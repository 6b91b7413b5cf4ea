//! Key-wise comparison of two resolved documents.

use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

use crate::tree;

/// A key whose value differs between the two sides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub key: String,
    pub old: Value,
    pub new: Value,
}

/// Differences between two flattened trees, each list in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigDiff {
    pub added: Vec<(String, Value)>,
    pub removed: Vec<(String, Value)>,
    pub changed: Vec<Change>,
}

impl ConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Unified-style listing: `+ key: value`, `- key: value`, `~ key: old -> new`.
    pub fn render(&self) -> String {
        let mut lines: Vec<(String, String)> = Vec::new();
        for (key, value) in &self.removed {
            lines.push((key.clone(), format!("- {}: {}", key, show(value))));
        }
        for (key, value) in &self.added {
            lines.push((key.clone(), format!("+ {}: {}", key, show(value))));
        }
        for change in &self.changed {
            lines.push((
                change.key.clone(),
                format!("~ {}: {} -> {}", change.key, show(&change.old), show(&change.new)),
            ));
        }
        lines.sort_by(|a, b| a.0.cmp(&b.0));
        lines
            .into_iter()
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn show(value: &Value) -> String {
    tree::render_scalar(value).unwrap_or_else(|| {
        serde_json::to_string(value).unwrap_or_else(|_| tree::type_name(value).to_string())
    })
}

/// Compare two trees leaf by leaf.
pub fn diff(left: &Value, right: &Value) -> ConfigDiff {
    let left: BTreeMap<String, Value> = tree::flatten(left);
    let mut right: BTreeMap<String, Value> = tree::flatten(right);
    let mut out = ConfigDiff::default();

    for (key, old) in left {
        match right.remove(&key) {
            None => out.removed.push((key, old)),
            Some(new) if new != old => out.changed.push(Change { key, old, new }),
            Some(_) => {}
        }
    }
    out.added = right.into_iter().collect();
    out
}
