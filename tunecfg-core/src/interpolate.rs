//! `${...}` interpolation.
//!
//! Supported forms:
//! - `${a.b.c}`: absolute reference from the document root
//! - `${.x}`, `${..x}`: relative reference (sibling, parent's sibling, ...)
//! - `${oc.env:VAR}` / `${oc.env:VAR,default}`: environment lookup
//! - `${oc.select:path,default}`: reference with a fallback
//!
//! A string that is exactly one interpolation takes the referenced value with
//! its type. Interpolations embedded in longer strings are rendered as text.
//! `\${` escapes a literal `${`.

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

use crate::error::InterpolationError;
use crate::tree::{self, KeyPath};

/// Marker for a mandatory value the user has not filled in.
pub const MISSING: &str = "???";

/// Knobs controlling how references resolve.
#[derive(Debug, Clone)]
pub struct InterpolationOptions {
    /// Whether `${oc.env:...}` may read the process environment.
    pub allow_env: bool,
    /// Values consulted before the process environment.
    pub env_overrides: BTreeMap<String, String>,
}

impl Default for InterpolationOptions {
    fn default() -> Self {
        Self {
            allow_env: true,
            env_overrides: BTreeMap::new(),
        }
    }
}

impl InterpolationOptions {
    fn env_var(&self, name: &str) -> Option<String> {
        if let Some(value) = self.env_overrides.get(name) {
            return Some(value.clone());
        }
        std::env::var(name).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Literal(String),
    Interp(String),
}

/// Whether `text` contains anything that needs resolving.
pub fn has_interpolation(text: &str) -> bool {
    text.contains("${")
}

fn tokenize(text: &str, at: &KeyPath) -> Result<Vec<Piece>, InterpolationError> {
    let syntax = |reason: &str| InterpolationError::Syntax {
        text: text.to_string(),
        at: at.to_string(),
        reason: reason.to_string(),
    };

    let bytes = text.as_bytes();
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && text[i + 1..].starts_with("${") {
            literal.push_str("${");
            i += 3;
            continue;
        }
        if text[i..].starts_with("${") {
            let mut depth = 0usize;
            let mut j = i;
            let mut end = None;
            while j < bytes.len() {
                if bytes[j..].starts_with(b"${") {
                    depth += 1;
                    j += 2;
                    continue;
                }
                if bytes[j] == b'}' {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(j);
                        break;
                    }
                }
                j += 1;
            }
            let end = end.ok_or_else(|| syntax("unterminated '${'"))?;
            let inner = text[i + 2..end].trim();
            if inner.is_empty() {
                return Err(syntax("empty interpolation"));
            }
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Interp(inner.to_string()));
            i = end + 1;
            continue;
        }
        match text[i..].chars().next() {
            Some(ch) => {
                literal.push(ch);
                i += ch.len_utf8();
            }
            None => break,
        }
    }

    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

/// Split `args` on the first comma that is not inside a nested `${...}`.
fn split_args(args: &str) -> (&str, Option<&str>) {
    let bytes = args.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"${") {
            depth += 1;
            i += 2;
            continue;
        }
        match bytes[i] {
            b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => return (args[..i].trim(), Some(args[i + 1..].trim())),
            _ => {}
        }
        i += 1;
    }
    (args.trim(), None)
}

fn is_resolver_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn strip_quotes(text: &str) -> &str {
    for quote in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

/// Compute the absolute target of a (possibly relative) reference made
/// from the node at `at`.
pub fn target_path(reference: &str, at: &KeyPath) -> Result<KeyPath, InterpolationError> {
    let dots = reference.chars().take_while(|c| *c == '.').count();
    let rest = &reference[dots..];

    let base = if dots == 0 {
        KeyPath::root()
    } else {
        let above_root = || InterpolationError::AboveRoot {
            reference: reference.to_string(),
            at: at.to_string(),
        };
        let mut base = at.parent().ok_or_else(above_root)?;
        for _ in 1..dots {
            base = base.parent().ok_or_else(above_root)?;
        }
        base
    };

    if rest.is_empty() {
        if dots == 0 {
            return Err(InterpolationError::Syntax {
                text: reference.to_string(),
                at: at.to_string(),
                reason: "empty reference".to_string(),
            });
        }
        return Ok(base);
    }

    let relative = KeyPath::parse(rest).map_err(|e| InterpolationError::Syntax {
        text: reference.to_string(),
        at: at.to_string(),
        reason: e.to_string(),
    })?;
    Ok(base.join(&relative))
}

struct Resolver<'a> {
    root: &'a Value,
    options: &'a InterpolationOptions,
    stack: Vec<KeyPath>,
}

impl<'a> Resolver<'a> {
    fn new(root: &'a Value, options: &'a InterpolationOptions) -> Self {
        Self {
            root,
            options,
            stack: Vec::new(),
        }
    }

    fn resolve_node(&mut self, node: &Value, at: &KeyPath) -> Result<Value, InterpolationError> {
        match node {
            Value::String(text) => self.resolve_string(text, at),
            Value::Mapping(map) => {
                let mut out = Mapping::new();
                for (k, v) in map {
                    let child = at.child(tree::key_segment(k));
                    out.insert(k.clone(), self.resolve_node(v, &child)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(seq) => {
                let mut out = Vec::with_capacity(seq.len());
                for (i, v) in seq.iter().enumerate() {
                    out.push(self.resolve_node(v, &at.child(i.to_string()))?);
                }
                Ok(Value::Sequence(out))
            }
            Value::Tagged(tagged) => Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag.clone(),
                value: self.resolve_node(&tagged.value, at)?,
            }))),
            scalar => Ok(scalar.clone()),
        }
    }

    fn resolve_string(&mut self, text: &str, at: &KeyPath) -> Result<Value, InterpolationError> {
        if !has_interpolation(text) {
            return Ok(Value::String(text.to_string()));
        }

        let pieces = tokenize(text, at)?;
        if let [Piece::Interp(inner)] = pieces.as_slice() {
            return self.evaluate(inner, at);
        }

        let mut out = String::new();
        for piece in pieces {
            match piece {
                Piece::Literal(s) => out.push_str(&s),
                Piece::Interp(inner) => {
                    let value = self.evaluate(&inner, at)?;
                    let rendered =
                        tree::render_scalar(&value).ok_or_else(|| InterpolationError::NonScalarEmbed {
                            target: inner.clone(),
                            at: at.to_string(),
                            found: tree::type_name(&value).to_string(),
                        })?;
                    out.push_str(&rendered);
                }
            }
        }
        Ok(Value::String(out))
    }

    fn evaluate(&mut self, inner: &str, at: &KeyPath) -> Result<Value, InterpolationError> {
        if let Some((name, args)) = inner.split_once(':') {
            let name = name.trim();
            if !is_resolver_name(name) {
                return Err(InterpolationError::Syntax {
                    text: inner.to_string(),
                    at: at.to_string(),
                    reason: format!("'{}' is not a resolver name", name),
                });
            }
            return match name {
                "oc.env" => self.env(args, at),
                "oc.select" => self.select_or_default(args, at),
                other => Err(InterpolationError::UnknownResolver {
                    name: other.to_string(),
                    at: at.to_string(),
                }),
            };
        }
        self.reference(inner, at)
    }

    fn reference(&mut self, reference: &str, at: &KeyPath) -> Result<Value, InterpolationError> {
        let target = target_path(reference, at)?;
        let node = tree::select(self.root, &target).ok_or_else(|| InterpolationError::MissingKey {
            reference: reference.to_string(),
            at: at.to_string(),
            target: target.to_string(),
        })?;
        self.follow(node, target)
    }

    fn follow(&mut self, node: &Value, target: KeyPath) -> Result<Value, InterpolationError> {
        if let Some(start) = self.stack.iter().position(|p| *p == target) {
            let mut chain: Vec<String> = self.stack[start..].iter().map(|p| p.to_string()).collect();
            chain.push(target.to_string());
            return Err(InterpolationError::Cycle {
                chain: chain.join(" -> "),
            });
        }
        self.stack.push(target.clone());
        let resolved = self.resolve_node(node, &target);
        self.stack.pop();
        resolved
    }

    fn env(&mut self, args: &str, at: &KeyPath) -> Result<Value, InterpolationError> {
        if !self.options.allow_env {
            return Err(InterpolationError::EnvDisabled { at: at.to_string() });
        }
        let (var, default) = split_args(args);
        if var.is_empty() {
            return Err(InterpolationError::Syntax {
                text: args.to_string(),
                at: at.to_string(),
                reason: "oc.env needs a variable name".to_string(),
            });
        }
        if let Some(value) = self.options.env_var(var) {
            return Ok(Value::String(value));
        }
        match default {
            Some(default) => self.resolve_string(strip_quotes(default), at),
            None => Err(InterpolationError::EnvVarMissing {
                var: var.to_string(),
                at: at.to_string(),
            }),
        }
    }

    fn select_or_default(&mut self, args: &str, at: &KeyPath) -> Result<Value, InterpolationError> {
        let (path, default) = split_args(args);
        let target = target_path(path, at)?;
        if let Some(node) = tree::select(self.root, &target) {
            return self.follow(node, target);
        }
        match default {
            None => Ok(Value::Null),
            Some(default) if has_interpolation(default) => self.resolve_string(default, at),
            Some(default) => Ok(serde_yaml::from_str(default)
                .unwrap_or_else(|_| Value::String(strip_quotes(default).to_string()))),
        }
    }
}

/// Resolve every interpolation in `root`, returning a new tree.
pub fn resolve(root: &Value, options: &InterpolationOptions) -> Result<Value, InterpolationError> {
    Resolver::new(root, options).resolve_node(root, &KeyPath::root())
}

/// Try each interpolated string leaf on its own and collect every failure.
///
/// Unlike [`resolve`], this does not stop at the first broken reference.
pub fn unresolved(root: &Value, options: &InterpolationOptions) -> Vec<(KeyPath, InterpolationError)> {
    let mut failures = Vec::new();
    collect_failures(root, root, &KeyPath::root(), options, &mut failures);
    failures
}

fn collect_failures(
    root: &Value,
    node: &Value,
    at: &KeyPath,
    options: &InterpolationOptions,
    out: &mut Vec<(KeyPath, InterpolationError)>,
) {
    match node {
        Value::String(text) if has_interpolation(text) => {
            if let Err(err) = Resolver::new(root, options).resolve_string(text, at) {
                out.push((at.clone(), err));
            }
        }
        Value::Mapping(map) => {
            for (k, v) in map {
                collect_failures(root, v, &at.child(tree::key_segment(k)), options, out);
            }
        }
        Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                collect_failures(root, v, &at.child(i.to_string()), options, out);
            }
        }
        _ => {}
    }
}

/// Paths of every `???` value still present.
pub fn missing_values(root: &Value) -> Vec<String> {
    tree::flatten(root)
        .into_iter()
        .filter(|(_, v)| v.as_str() == Some(MISSING))
        .map(|(k, _)| k)
        .collect()
}

/// Re-escape every literal `${` in a resolved tree so the document can be
/// loaded again without the text turning back into references.
pub fn escape_literals(value: &Value) -> Value {
    match value {
        Value::String(s) if has_interpolation(s) => Value::String(s.replace("${", "\\${")),
        Value::Sequence(items) => Value::Sequence(items.iter().map(escape_literals).collect()),
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), escape_literals(v)))
                .collect::<Mapping>(),
        ),
        Value::Tagged(tagged) => Value::Tagged(Box::new(TaggedValue {
            tag: tagged.tag.clone(),
            value: escape_literals(&tagged.value),
        })),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn resolved(text: &str) -> Value {
        resolve(&doc(text), &InterpolationOptions::default()).unwrap()
    }

    fn get<'a>(root: &'a Value, path: &str) -> &'a Value {
        tree::select_str(root, path).unwrap()
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let root = resolved("batch_size: 64\nforward: ${batch_size}\nmodel:\n  rank: 8\ncopy: ${model}\n");
        assert_eq!(get(&root, "forward"), &Value::from(64));
        assert_eq!(get(&root, "copy.rank"), &Value::from(8));
    }

    #[test]
    fn test_embedded_reference_renders_text() {
        let root = resolved(
            "output_dir: /tmp/run\ncheckpointer:\n  output_dir: ${output_dir}/ckpt\nname: step-${steps}-${flag}\nsteps: 10\nflag: true\n",
        );
        assert_eq!(get(&root, "checkpointer.output_dir"), &Value::from("/tmp/run/ckpt"));
        assert_eq!(get(&root, "name"), &Value::from("step-10-true"));
    }

    #[test]
    fn test_chained_references() {
        let root = resolved("a: ${b}\nb: ${c}/x\nc: root\n");
        assert_eq!(get(&root, "a"), &Value::from("root/x"));
    }

    #[test]
    fn test_relative_references() {
        let root = resolved(
            "base: top\nmetric_logger:\n  log_dir: /logs\n  path: ${.log_dir}/run\n  nested:\n    up: ${..log_dir}\n",
        );
        assert_eq!(get(&root, "metric_logger.path"), &Value::from("/logs/run"));
        assert_eq!(get(&root, "metric_logger.nested.up"), &Value::from("/logs"));
    }

    #[test]
    fn test_relative_reference_above_root() {
        let err = resolve(&doc("a: ${..b}\n"), &InterpolationOptions::default()).unwrap_err();
        assert!(matches!(err, InterpolationError::AboveRoot { .. }));
    }

    #[test]
    fn test_sequence_index_reference() {
        let root = resolved("stop: [1, 2]\nfirst: ${stop.1}\n");
        assert_eq!(get(&root, "first"), &Value::from(2));
    }

    #[test]
    fn test_missing_key() {
        let err = resolve(&doc("a: ${nope}\n"), &InterpolationOptions::default()).unwrap_err();
        match err {
            InterpolationError::MissingKey { target, at, .. } => {
                assert_eq!(target, "nope");
                assert_eq!(at, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_detected() {
        let err = resolve(&doc("a: ${b}\nb: ${a}\n"), &InterpolationOptions::default()).unwrap_err();
        match err {
            InterpolationError::Cycle { chain } => assert_eq!(chain, "b -> a -> b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_cycle_detected() {
        let err = resolve(&doc("a: x${a}\n"), &InterpolationOptions::default()).unwrap_err();
        assert!(matches!(err, InterpolationError::Cycle { .. }));
    }

    #[test]
    fn test_escape() {
        let root = resolved("a: \"\\\\${literal}\"\n");
        assert_eq!(get(&root, "a"), &Value::from("${literal}"));
    }

    #[test]
    fn test_escaped_literals_survive_a_second_resolve() {
        let root = resolved("a: \"\\\\${literal}\"\nb: plain\n");
        let reloaded = resolved(&serde_yaml::to_string(&escape_literals(&root)).unwrap());
        assert_eq!(reloaded, root);
        assert_eq!(get(&escape_literals(&root), "b"), &Value::from("plain"));
    }

    #[test]
    fn test_unterminated() {
        let err = resolve(&doc("a: ${b\nb: 1\n"), &InterpolationOptions::default()).unwrap_err();
        assert!(matches!(err, InterpolationError::Syntax { .. }));
    }

    #[test]
    fn test_non_scalar_embed() {
        let err = resolve(
            &doc("model:\n  rank: 8\nname: m-${model}\n"),
            &InterpolationOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, InterpolationError::NonScalarEmbed { .. }));
    }

    #[test]
    fn test_env_resolver() {
        let mut options = InterpolationOptions::default();
        options
            .env_overrides
            .insert("TUNECFG_TEST_HOME".into(), "/data".into());
        let root = resolve(
            &doc("dir: ${oc.env:TUNECFG_TEST_HOME}/models\nfallback: ${oc.env:TUNECFG_SURELY_UNSET_VAR_42,/tmp}\n"),
            &options,
        )
        .unwrap();
        assert_eq!(get(&root, "dir"), &Value::from("/data/models"));
        assert_eq!(get(&root, "fallback"), &Value::from("/tmp"));
    }

    #[test]
    fn test_env_default_with_nested_reference() {
        let root = resolved("out: /o\ndir: ${oc.env:TUNECFG_SURELY_UNSET_VAR_42,${out}/x}\n");
        assert_eq!(get(&root, "dir"), &Value::from("/o/x"));
    }

    #[test]
    fn test_env_missing_and_disabled() {
        let err = resolve(
            &doc("dir: ${oc.env:TUNECFG_SURELY_UNSET_VAR_42}\n"),
            &InterpolationOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, InterpolationError::EnvVarMissing { .. }));

        let options = InterpolationOptions {
            allow_env: false,
            ..Default::default()
        };
        let err = resolve(&doc("dir: ${oc.env:HOME}\n"), &options).unwrap_err();
        assert!(matches!(err, InterpolationError::EnvDisabled { .. }));
    }

    #[test]
    fn test_select_with_default() {
        let root = resolved("a: 3\nb: ${oc.select:a,7}\nc: ${oc.select:missing,7}\nd: ${oc.select:missing}\n");
        assert_eq!(get(&root, "b"), &Value::from(3));
        assert_eq!(get(&root, "c"), &Value::from(7));
        assert_eq!(get(&root, "d"), &Value::Null);
    }

    #[test]
    fn test_unknown_resolver() {
        let err = resolve(&doc("a: ${oc.decode:1}\n"), &InterpolationOptions::default()).unwrap_err();
        assert!(matches!(err, InterpolationError::UnknownResolver { .. }));
    }

    #[test]
    fn test_unresolved_collects_all() {
        let root = doc("a: ${x}\nb: ok\nc:\n  - ${y}\n  - ${b}\n");
        let failures = unresolved(&root, &InterpolationOptions::default());
        let paths: Vec<_> = failures.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["a", "c.0"]);
    }

    #[test]
    fn test_missing_values() {
        let root = doc("a: ???\nb:\n  c: ???\nd: 1\n");
        assert_eq!(missing_values(&root), vec!["a", "b.c"]);
    }
}
