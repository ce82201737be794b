//! Template resolution for step configuration.
//!
//! A typed visitor over `serde_json::Value`: only string leaves that
//! contain the `{{` marker are interpreted; everything else passes
//! through untouched. Expressions support dotted-path variable lookup
//! and a `join` filter for flattening lists:
//!
//! ```text
//! {{ document_type }}
//! {{ steps.fetch.response }}
//! {{ parties | join(", ") }}
//! ```
//!
//! Resolution is pure and synchronous — it never touches external
//! systems. A string whose expressions cannot all be resolved degrades
//! to the empty string (the run continues; the failure is visible in the
//! resolved config, not fatal).

use serde_json::{Map, Value};
use tracing::warn;

/// Resolve every templated string leaf in `value` against `context`.
pub fn resolve_config(value: &Value, context: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) if s.contains("{{") => match render(s, context) {
            Some(rendered) => Value::String(rendered),
            None => {
                warn!(template = %s, "template has unresolved expressions, using empty string");
                Value::String(String::new())
            }
        },
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_config(v, context)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_config(v, context)).collect())
        }
        other => other.clone(),
    }
}

/// Render a single template string.
///
/// Returns `None` if any `{{ ... }}` expression fails to resolve; callers
/// decide how to degrade (the config resolver uses the empty string, the
/// transform handler uses `null`). Text with no closing `}}` after an
/// opening marker is kept verbatim.
pub fn render(template: &str, context: &Map<String, Value>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            // Unterminated marker: not an expression, keep the remainder.
            out.push_str(&rest[start..]);
            return Some(out);
        };

        out.push_str(&eval_expr(after[..end].trim(), context)?);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Some(out)
}

// ---------------------------------------------------------------------------
// Expression evaluation
// ---------------------------------------------------------------------------

fn eval_expr(expr: &str, context: &Map<String, Value>) -> Option<String> {
    let (path, filter) = match expr.split_once('|') {
        Some((p, f)) => (p.trim(), Some(f.trim())),
        None => (expr, None),
    };

    let value = lookup_path(path, context)?;
    match filter {
        None => Some(stringify(value)),
        Some(spec) => apply_filter(value, spec),
    }
}

/// Walk a dotted path through the context. Objects are traversed by key,
/// arrays by numeric index.
fn lookup_path<'a>(path: &str, context: &'a Map<String, Value>) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?.trim();
    if first.is_empty() {
        return None;
    }

    let mut current = context.get(first)?;
    for segment in segments {
        let segment = segment.trim();
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a scalar into the substituted text. Lists and maps fall back to
/// compact JSON — useful when a whole structure is interpolated into a
/// prompt.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Apply a filter spec such as `join(", ")`. Only `join` is supported;
/// anything else (or a non-list input) fails the expression.
fn apply_filter(value: &Value, spec: &str) -> Option<String> {
    let args = spec.strip_prefix("join")?.trim();
    let args = args.strip_prefix('(')?.strip_suffix(')')?.trim();
    let separator = strip_quotes(args)?;

    let items = value.as_array()?;
    Some(
        items
            .iter()
            .map(stringify)
            .collect::<Vec<_>>()
            .join(separator),
    )
}

fn strip_quotes(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if s.len() >= 2
        && ((bytes[0] == b'"' && bytes[s.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[s.len() - 1] == b'\''))
    {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
