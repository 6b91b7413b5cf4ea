//! Configuration tree helpers.
//!
//! A recipe document is held as a `serde_yaml::Value`. This module adds
//! dotted key paths (`optimizer.lr`, `dataset.0.source`, `dataset[0].source`)
//! and the select / set / remove / flatten / merge operations the loader,
//! overrides and interpolation build on. Mapping order is preserved.

use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PathError;

/// A dotted key path into a configuration tree.
///
/// Segments are interpreted against the container they address: a segment
/// is a key for mappings and an index for sequences.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// The empty path, addressing the document root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parse `a.b[0].c` style paths. Empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let malformed = |reason: &str| PathError::Malformed {
            path: raw.to_string(),
            reason: reason.to_string(),
        };
        if raw.trim().is_empty() {
            return Err(malformed("path is empty"));
        }

        let mut segments = Vec::new();
        for piece in raw.split('.') {
            let (head, mut rest) = match piece.find('[') {
                Some(pos) => (&piece[..pos], &piece[pos..]),
                None => (piece, ""),
            };
            if head.is_empty() && rest.is_empty() {
                return Err(malformed("empty segment"));
            }
            if !head.is_empty() {
                segments.push(head.to_string());
            }
            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| malformed("unclosed '['"))?;
                let index = &rest[1..close];
                if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                    return Err(malformed("bracket index must be a non-negative integer"));
                }
                segments.push(index.to_string());
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(malformed("unexpected text after ']'"));
                }
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path of the containing node, or `None` at the root.
    pub fn parent(&self) -> Option<KeyPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, segment: impl Into<String>) -> KeyPath {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn join(&self, other: &KeyPath) -> KeyPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "<root>");
        }
        write!(f, "{}", self.segments.join("."))
    }
}

impl FromStr for KeyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Short human-readable name for a value's type.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Render a scalar the way it reads in YAML. Containers yield `None`.
pub fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

/// Render any mapping key as a path segment.
pub(crate) fn key_segment(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => render_scalar(other).unwrap_or_else(|| format!("{:?}", other)),
    }
}

fn parse_index(segment: &str, at: &KeyPath) -> Result<usize, PathError> {
    segment.parse::<usize>().map_err(|_| PathError::Malformed {
        path: at.to_string(),
        reason: format!("'{}' is not a sequence index", segment),
    })
}

/// Look up the node at `path`.
pub fn select<'a>(root: &'a Value, path: &KeyPath) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.segments() {
        current = match current {
            Value::Mapping(map) => map.get(segment.as_str())?,
            Value::Sequence(seq) => seq.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Convenience wrapper around [`select`] taking a raw dotted path.
pub fn select_str<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = KeyPath::parse(path).ok()?;
    select(root, &path)
}

fn child_mut<'a>(
    node: &'a mut Value,
    segment: &str,
    create: bool,
    at: &KeyPath,
) -> Result<&'a mut Value, PathError> {
    if create && node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    match node {
        Value::Mapping(map) => {
            if !map.contains_key(segment) {
                if !create {
                    return Err(PathError::NotFound {
                        path: at.to_string(),
                    });
                }
                map.insert(
                    Value::String(segment.to_string()),
                    Value::Mapping(Mapping::new()),
                );
            }
            map.get_mut(segment).ok_or_else(|| PathError::NotFound {
                path: at.to_string(),
            })
        }
        Value::Sequence(seq) => {
            let index = parse_index(segment, at)?;
            let len = seq.len();
            seq.get_mut(index).ok_or(PathError::IndexOutOfBounds {
                path: at.to_string(),
                index,
                len,
            })
        }
        other => Err(PathError::NotAContainer {
            path: at.to_string(),
            found: type_name(other).to_string(),
        }),
    }
}

/// Set the node at `path`, creating intermediate mappings as needed.
///
/// Existing keys keep their position in the mapping.
pub fn set(root: &mut Value, path: &KeyPath, value: Value) -> Result<(), PathError> {
    let Some((last, parents)) = path.segments().split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    let mut walked = KeyPath::root();
    for segment in parents {
        walked = walked.child(segment.clone());
        current = child_mut(current, segment, true, &walked)?;
    }

    if current.is_null() {
        *current = Value::Mapping(Mapping::new());
    }
    match current {
        Value::Mapping(map) => {
            map.insert(Value::String(last.clone()), value);
            Ok(())
        }
        Value::Sequence(seq) => {
            let index = parse_index(last, path)?;
            let len = seq.len();
            let slot = seq.get_mut(index).ok_or(PathError::IndexOutOfBounds {
                path: path.to_string(),
                index,
                len,
            })?;
            *slot = value;
            Ok(())
        }
        other => Err(PathError::NotAContainer {
            path: walked.to_string(),
            found: type_name(other).to_string(),
        }),
    }
}

/// Remove and return the node at `path`. Missing keys are an error.
pub fn remove(root: &mut Value, path: &KeyPath) -> Result<Value, PathError> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(PathError::Malformed {
            path: path.to_string(),
            reason: "cannot remove the document root".to_string(),
        });
    };

    let mut current = root;
    let mut walked = KeyPath::root();
    for segment in parents {
        walked = walked.child(segment.clone());
        current = child_mut(current, segment, false, &walked)?;
    }

    match current {
        Value::Mapping(map) => {
            let removed = map
                .get(last.as_str())
                .cloned()
                .ok_or_else(|| PathError::NotFound {
                    path: path.to_string(),
                })?;
            let kept: Mapping = map
                .iter()
                .filter(|(k, _)| k.as_str() != Some(last.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            *map = kept;
            Ok(removed)
        }
        Value::Sequence(seq) => {
            let index = parse_index(last, path)?;
            if index >= seq.len() {
                return Err(PathError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len: seq.len(),
                });
            }
            Ok(seq.remove(index))
        }
        other => Err(PathError::NotAContainer {
            path: walked.to_string(),
            found: type_name(other).to_string(),
        }),
    }
}

/// Map every leaf to its dotted path. Empty containers count as leaves.
pub fn flatten(root: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(root, &KeyPath::root(), &mut out);
    out
}

fn flatten_into(node: &Value, at: &KeyPath, out: &mut BTreeMap<String, Value>) {
    match node {
        Value::Mapping(map) if !map.is_empty() => {
            for (k, v) in map {
                flatten_into(v, &at.child(key_segment(k)), out);
            }
        }
        Value::Sequence(seq) if !seq.is_empty() => {
            for (i, v) in seq.iter().enumerate() {
                flatten_into(v, &at.child(i.to_string()), out);
            }
        }
        leaf => {
            out.insert(at.to_string(), leaf.clone());
        }
    }
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key; anything
/// else in the overlay replaces the base value.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, replacement) => *slot = replacement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_parse_dotted_and_bracketed() {
        let path = KeyPath::parse("dataset[0].source").unwrap();
        assert_eq!(path.segments(), ["dataset", "0", "source"]);
        let path = KeyPath::parse("dataset.0.source").unwrap();
        assert_eq!(path.segments(), ["dataset", "0", "source"]);
        assert_eq!(path.to_string(), "dataset.0.source");
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(KeyPath::parse("").is_err());
        assert!(KeyPath::parse("a..b").is_err());
        assert!(KeyPath::parse("a[x]").is_err());
        assert!(KeyPath::parse("a[0").is_err());
        assert!(KeyPath::parse("a[0]b").is_err());
    }

    #[test]
    fn test_select_nested() {
        let root = doc("optimizer:\n  lr: 0.5\ndataset:\n  - source: a\n  - source: b\n");
        assert_eq!(
            select_str(&root, "optimizer.lr"),
            Some(&Value::from(0.5))
        );
        assert_eq!(
            select_str(&root, "dataset.1.source"),
            Some(&Value::from("b"))
        );
        assert_eq!(select_str(&root, "dataset.2.source"), None);
        assert_eq!(select_str(&root, "optimizer.lr.deeper"), None);
    }

    #[test]
    fn test_set_creates_intermediate_mappings() {
        let mut root = doc("a: 1\n");
        set(&mut root, &KeyPath::parse("b.c.d").unwrap(), Value::from(2)).unwrap();
        assert_eq!(select_str(&root, "b.c.d"), Some(&Value::from(2)));
    }

    #[test]
    fn test_set_fills_null_group() {
        let mut root = doc("lr_scheduler:\n");
        set(
            &mut root,
            &KeyPath::parse("lr_scheduler.num_warmup_steps").unwrap(),
            Value::from(100),
        )
        .unwrap();
        assert_eq!(
            select_str(&root, "lr_scheduler.num_warmup_steps"),
            Some(&Value::from(100))
        );
    }

    #[test]
    fn test_set_keeps_key_position() {
        let mut root = doc("a: 1\nb: 2\nc: 3\n");
        set(&mut root, &KeyPath::parse("b").unwrap(), Value::from(20)).unwrap();
        let keys: Vec<_> = root
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_set_into_scalar_fails() {
        let mut root = doc("a: 1\n");
        let err = set(&mut root, &KeyPath::parse("a.b").unwrap(), Value::from(2)).unwrap_err();
        assert!(matches!(err, PathError::NotAContainer { .. }));
    }

    #[test]
    fn test_set_sequence_index_out_of_bounds() {
        let mut root = doc("items: [1, 2]\n");
        let err = set(&mut root, &KeyPath::parse("items.5").unwrap(), Value::from(3)).unwrap_err();
        assert!(matches!(err, PathError::IndexOutOfBounds { index: 5, len: 2, .. }));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut root = doc("a: 1\nb: 2\nc: 3\n");
        let removed = remove(&mut root, &KeyPath::parse("b").unwrap()).unwrap();
        assert_eq!(removed, Value::from(2));
        assert_eq!(serde_yaml::to_string(&root).unwrap(), "a: 1\nc: 3\n");
    }

    #[test]
    fn test_remove_missing_key() {
        let mut root = doc("a: 1\n");
        let err = remove(&mut root, &KeyPath::parse("z").unwrap()).unwrap_err();
        assert!(matches!(err, PathError::NotFound { .. }));
    }

    #[test]
    fn test_flatten() {
        let root = doc("a:\n  b: 1\n  c: [x, y]\nd: {}\n");
        let flat = flatten(&root);
        let keys: Vec<_> = flat.keys().cloned().collect();
        assert_eq!(keys, vec!["a.b", "a.c.0", "a.c.1", "d"]);
        assert_eq!(flat["a.c.1"], Value::from("y"));
    }

    #[test]
    fn test_merge_deep() {
        let mut base = doc("model:\n  rank: 8\n  alpha: 16\nlist: [1, 2]\n");
        merge(&mut base, doc("model:\n  rank: 4\nlist: [3]\n"));
        assert_eq!(select_str(&base, "model.rank"), Some(&Value::from(4)));
        assert_eq!(select_str(&base, "model.alpha"), Some(&Value::from(16)));
        assert_eq!(select_str(&base, "list"), Some(&doc("[3]")));
    }

    #[test]
    fn test_render_scalar() {
        assert_eq!(render_scalar(&Value::Null).as_deref(), Some("null"));
        assert_eq!(render_scalar(&Value::from(true)).as_deref(), Some("true"));
        assert_eq!(render_scalar(&Value::from(42)).as_deref(), Some("42"));
        assert_eq!(render_scalar(&doc("[1]")), None);
    }
}
