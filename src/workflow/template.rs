//! Placeholder substitution for node parameters and edge expressions.
//!
//! A placeholder is `{{expr}}`, where `expr` is a dot/bracket path whose first
//! segment is `trigger`, `input`, or a node name (case-insensitive, whitespace
//! stripped). Resolution is a pure function of a [`TemplateScope`].

use std::{collections::HashMap, sync::LazyLock};

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::warn;

use crate::common::Vars;

/// Flat placeholder pattern: `{{ path }}`.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("valid placeholder pattern"));

/// Rendering of a path that does not resolve.
pub const UNDEFINED: &str = "undefined";

/// Parameter name resolved with code-literal rendering.
const CODE_PARAM: &str = "code";

/// Read-only view of the run state that templates resolve against.
#[derive(Debug, Clone, Copy)]
pub struct TemplateScope<'a> {
    /// normalized trigger payload, exposed as `trigger` and `input`
    pub trigger: &'a Value,
    /// node id -> last output
    pub outputs: &'a HashMap<String, Value>,
    /// normalized node name -> node id
    pub names: &'a HashMap<String, String>,
    /// resolve placeholders nested inside other placeholders
    pub nested: bool,
}

/// Normalize a node name for lookup: lowercase, all whitespace removed.
pub fn normalize_name(name: &str) -> String {
    name.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

#[derive(Debug, PartialEq)]
enum Accessor {
    Key(String),
    Index(usize),
}

/// Split `a.b[0].c` into segments, ignoring dots inside brackets.
fn split_path(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            '.' if depth == 0 => {
                parts.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expr[start..]);
    parts
}

/// Break one segment such as `items[2][0]` into accessors.
fn parse_segment(segment: &str) -> Vec<Accessor> {
    let segment = segment.trim();
    let (head, mut rest) = match segment.find('[') {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => (segment, ""),
    };

    let mut accessors = Vec::new();
    if !head.is_empty() {
        accessors.push(Accessor::Key(head.to_string()));
    }

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        let inner = rest[open + 1..open + close].trim().trim_matches(|c| c == '"' || c == '\'');
        match inner.parse::<usize>() {
            Ok(index) => accessors.push(Accessor::Index(index)),
            Err(_) => accessors.push(Accessor::Key(inner.to_string())),
        }
        rest = &rest[open + close + 1..];
    }
    accessors
}

/// Apply one accessor; strings are parsed as JSON before indexing.
fn step(
    current: &Value,
    accessor: &Accessor,
    expr: &str,
) -> Option<Value> {
    let parsed;
    let current = match current {
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) => {
                parsed = v;
                &parsed
            }
            Err(_) => {
                warn!(template = expr, "failed to parse string value as structured data");
                return None;
            }
        },
        other => other,
    };

    match (current, accessor) {
        (Value::Object(map), Accessor::Key(key)) => map.get(key).cloned(),
        (Value::Object(map), Accessor::Index(index)) => map.get(&index.to_string()).cloned(),
        (Value::Array(arr), Accessor::Index(index)) => arr.get(*index).cloned(),
        (Value::Array(arr), Accessor::Key(key)) => key.parse::<usize>().ok().and_then(|i| arr.get(i).cloned()),
        _ => {
            warn!(template = expr, "unable to resolve template path");
            None
        }
    }
}

/// Resolve a path expression to a value; `None` means undefined.
pub fn lookup(
    scope: &TemplateScope<'_>,
    expr: &str,
) -> Option<Value> {
    let expr = expr.trim();
    let mut segments = split_path(expr).into_iter();
    let mut head = parse_segment(segments.next()?).into_iter();

    let root = match head.next()? {
        Accessor::Key(name) => {
            let lowered = name.to_lowercase();
            if lowered == "trigger" || lowered == "input" {
                scope.trigger.clone()
            } else {
                let nid = scope.names.get(&normalize_name(&name))?;
                scope.outputs.get(nid)?.clone()
            }
        }
        Accessor::Index(_) => return None,
    };

    let mut current = root;
    for accessor in head {
        current = step(&current, &accessor, expr)?;
    }
    for segment in segments {
        for accessor in parse_segment(segment) {
            current = step(&current, &accessor, expr)?;
        }
    }
    Some(current)
}

/// Interpolation rendering: scalars inline, structures as JSON.
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None => UNDEFINED.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => "null".to_string(),
        Some(v @ (Value::Array(_) | Value::Object(_))) => serde_json::to_string(v).unwrap_or_default(),
        Some(v) => v.to_string(),
    }
}

/// Code-literal rendering: strings quoted, structures as JSON, missing as `null`.
pub fn render_code_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "null".to_string()),
    }
}

fn substitute(
    scope: &TemplateScope<'_>,
    template: &str,
    render: fn(Option<&Value>) -> String,
) -> String {
    if scope.nested {
        return substitute_nested(scope, template, render);
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let value = lookup(scope, &caps[1]);
            render(value.as_ref())
        })
        .into_owned()
}

/// Byte offset of the `}}` that closes a placeholder opened just before `s`.
fn matching_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

/// Innermost-first substitution; inner placeholders are rendered into the
/// enclosing path before it is looked up. Resolved values are not rescanned.
fn substitute_nested(
    scope: &TemplateScope<'_>,
    template: &str,
    render: fn(Option<&Value>) -> String,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let body = &rest[start + 2..];
        let Some(len) = matching_close(body) else {
            break;
        };
        out.push_str(&rest[..start]);
        let path = substitute_nested(scope, &body[..len], render_value);
        out.push_str(&render(lookup(scope, &path).as_ref()));
        rest = &body[len + 2..];
    }

    out.push_str(rest);
    out
}

/// Replace every `{{expr}}` in `template` with its rendered value.
pub fn resolve_template(
    scope: &TemplateScope<'_>,
    template: &str,
) -> String {
    substitute(scope, template, render_value)
}

/// Like [`resolve_template`] but keeps the result a valid code literal.
pub fn resolve_code(
    scope: &TemplateScope<'_>,
    code: &str,
) -> String {
    substitute(scope, code, render_code_value)
}

/// Resolve a template-bearing JSON value; non-string scalars pass through.
pub fn resolve_value(
    scope: &TemplateScope<'_>,
    value: &Value,
) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_template(scope, s)),
        Value::Array(arr) => Value::Array(arr.iter().map(|v| resolve_value(scope, v)).collect()),
        Value::Object(obj) => Value::Object(obj.iter().map(|(k, v)| (k.clone(), resolve_value(scope, v))).collect()),
        other => other.clone(),
    }
}

/// Resolve a node's parameter map. The `code` parameter uses literal rendering.
pub fn resolve_parameters(
    scope: &TemplateScope<'_>,
    params: &Map<String, Value>,
) -> Vars {
    let mut resolved = Map::new();
    for (key, value) in params {
        let value = match value {
            Value::String(s) if key == CODE_PARAM => Value::String(resolve_code(scope, s)),
            other => resolve_value(scope, other),
        };
        resolved.insert(key.clone(), value);
    }
    Vars::from(resolved)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixture {
        trigger: Value,
        outputs: HashMap<String, Value>,
        names: HashMap<String, String>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut outputs = HashMap::new();
            outputs.insert("n1".to_string(), json!({"message": "hello", "count": 42, "items": [{"name": "a"}, {"name": "b"}], "ok": true, "none": null}));
            outputs.insert("n2".to_string(), json!({"raw": "{\"user\": {\"name\": \"Alice\"}}", "plain": "not json"}));
            outputs.insert("n3".to_string(), json!({"key": "message"}));

            let mut names = HashMap::new();
            names.insert(normalize_name("Fetch Data"), "n1".to_string());
            names.insert(normalize_name("Parser"), "n2".to_string());
            names.insert(normalize_name("Selector"), "n3".to_string());

            Self {
                trigger: json!({"email": "a@b.c", "tags": ["x", "y"], "n": 5}),
                outputs,
                names,
            }
        }

        fn scope(&self) -> TemplateScope<'_> {
            TemplateScope {
                trigger: &self.trigger,
                outputs: &self.outputs,
                names: &self.names,
                nested: false,
            }
        }
    }

    #[test]
    fn test_no_placeholders() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "hello world"), "hello world");
    }

    #[test]
    fn test_trigger_and_input_namespaces() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "{{trigger.email}}"), "a@b.c");
        assert_eq!(resolve_template(&f.scope(), "{{ input.n }}"), "5");
        assert_eq!(resolve_template(&f.scope(), "{{Trigger.tags[1]}}"), "y");
    }

    #[test]
    fn test_node_name_is_case_and_space_insensitive() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "{{fetchdata.message}}"), "hello");
        assert_eq!(resolve_template(&f.scope(), "{{FetchData.count}} items"), "42 items");
    }

    #[test]
    fn test_array_indexing() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "{{fetchdata.items[1].name}}"), "b");
        assert_eq!(resolve_template(&f.scope(), "{{fetchdata.items[9].name}}"), UNDEFINED);
    }

    #[test]
    fn test_structured_values_are_serialized() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "{{trigger.tags}}"), r#"["x","y"]"#);
        assert_eq!(resolve_template(&f.scope(), "{{fetchdata.items[0]}}"), r#"{"name":"a"}"#);
    }

    #[test]
    fn test_string_output_is_parsed_before_walking() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "{{parser.raw.user.name}}"), "Alice");
    }

    #[test]
    fn test_unparseable_string_yields_undefined() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "x={{parser.plain.field}}"), "x=undefined");
    }

    #[test]
    fn test_unknown_node_and_null() {
        let f = Fixture::new();
        assert_eq!(resolve_template(&f.scope(), "{{ghost.value}}"), UNDEFINED);
        assert_eq!(resolve_template(&f.scope(), "{{fetchdata.none}}"), "null");
    }

    #[test]
    fn test_code_rendering() {
        let f = Fixture::new();
        let code = "const m = {{fetchdata.message}}; const n = {{fetchdata.count}}; const t = {{trigger.tags}}; const g = {{ghost.x}};";
        assert_eq!(resolve_code(&f.scope(), code), r#"const m = "hello"; const n = 42; const t = ["x","y"]; const g = null;"#);
    }

    #[test]
    fn test_resolve_parameters() {
        let f = Fixture::new();
        let params = json!({
            "to": "{{trigger.email}}",
            "code": "return {{fetchdata.message}};",
            "retries": 3,
            "nested": {"list": ["{{fetchdata.count}}"]}
        });
        let resolved: Value = resolve_parameters(&f.scope(), params.as_object().unwrap()).into();
        assert_eq!(
            resolved,
            json!({
                "to": "a@b.c",
                "code": "return \"hello\";",
                "retries": 3,
                "nested": {"list": ["42"]}
            })
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let f = Fixture::new();
        let template = "{{fetchdata.items}} / {{trigger.email}} / {{ghost}}";
        let first = resolve_template(&f.scope(), template);
        let second = resolve_template(&f.scope(), template);
        assert_eq!(first, second);
    }

    #[test]
    fn test_nested_placeholders() {
        let f = Fixture::new();
        let mut scope = f.scope();
        scope.nested = true;
        assert_eq!(resolve_template(&scope, "{{fetchdata.{{selector.key}}}}!"), "hello!");
        assert_eq!(resolve_template(&scope, "plain {{trigger.email}}"), "plain a@b.c");
        assert_eq!(resolve_template(&scope, "open {{ only"), "open {{ only");
    }

    #[test]
    fn test_split_path_keeps_brackets() {
        assert_eq!(split_path("a.b[0].c"), vec!["a", "b[0]", "c"]);
        assert_eq!(parse_segment("items[2][0]"), vec![Accessor::Key("items".to_string()), Accessor::Index(2), Accessor::Index(0)]);
    }
}
