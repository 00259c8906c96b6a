use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use rquickjs::{Context as JsContext, Ctx, Runtime as JsRuntime};
use serde_json::{Value, json};
use tracing::debug;

use crate::{Result, TrigflowError, common::MemCache, common::Vars, runtime::RunContext};

static FUNCTION_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"function\s+([a-zA-Z_$][a-zA-Z0-9_$]*)\s*\(").expect("valid function pattern"));

/// Executes user-authored code behind `custom` nodes.
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    async fn run(
        &self,
        node_type: &str,
        params: Vars,
        input: Value,
        ctx: &RunContext,
    ) -> Result<Value>;
}

/// JavaScript backend on an embedded QuickJS runtime.
///
/// Code is looked up by node type among registered scripts, falling back to
/// the node's own `code` parameter. A script either defines a function, which
/// is called as `fn(params, input)`, or is a bare function body with `params`
/// and `input` in scope. Non-object results are returned as `{ result }`.
pub struct QuickJsBackend {
    scripts: MemCache<String, String>,
}

impl Default for QuickJsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QuickJsBackend {
    pub fn new() -> Self {
        Self {
            scripts: MemCache::new(4096),
        }
    }

    /// Register the code of a custom tool type.
    pub fn with_script(
        self,
        node_type: &str,
        code: &str,
    ) -> Self {
        self.register(node_type, code);
        self
    }

    pub fn register(
        &self,
        node_type: &str,
        code: &str,
    ) {
        self.scripts.set(node_type.to_string(), code.to_string());
    }
}

#[async_trait]
impl ScriptBackend for QuickJsBackend {
    async fn run(
        &self,
        node_type: &str,
        params: Vars,
        input: Value,
        ctx: &RunContext,
    ) -> Result<Value> {
        let code = self
            .scripts
            .get(&node_type.to_string())
            .or_else(|| params.get_str("code"))
            .ok_or(TrigflowError::Script(format!("No code found for custom tool: {node_type}")))?;

        debug!(node_type, node_id = ctx.node_id(), "run custom script");
        let params: Value = params.into();
        ctx.services()
            .runtime
            .spawn_blocking(move || execute(&code, &params, &input))
            .await
            .map_err(|e| TrigflowError::Script(e.to_string()))?
    }
}

/// Run `code` to completion and return its JSON result.
pub fn execute(
    code: &str,
    params: &Value,
    input: &Value,
) -> Result<Value> {
    let runtime = JsRuntime::new().map_err(|e| TrigflowError::Script(e.to_string()))?;
    let ctx = JsContext::full(&runtime).map_err(|e| TrigflowError::Script(e.to_string()))?;

    let args = format!("{}, {}", serde_json::to_string(params)?, serde_json::to_string(input)?);
    let call = match function_name(code) {
        Some(name) => format!("JSON.stringify({name}({args}) ?? null)"),
        None => format!("JSON.stringify((function(params, input) {{\n{code}\n}})({args}) ?? null)"),
    };

    let json = ctx.with(|ctx| {
        if function_name(code).is_some() {
            if let Err(e) = ctx.eval::<(), _>(code) {
                return Err(script_error(&ctx, "JS_EVAL_ERROR", e));
            }
        }
        ctx.eval::<String, _>(call).map_err(|e| script_error(&ctx, "JS_EXEC_ERROR", e))
    })?;

    let value: Value = serde_json::from_str(&json)?;
    Ok(match value {
        Value::Object(_) => value,
        other => json!({ "result": other }),
    })
}

fn function_name(code: &str) -> Option<String> {
    FUNCTION_NAME.captures(code).map(|caps| caps[1].to_string())
}

fn script_error(
    ctx: &Ctx<'_>,
    stage: &str,
    error: rquickjs::Error,
) -> TrigflowError {
    let message = match error {
        rquickjs::Error::Exception => {
            let caught = ctx.catch();
            caught.as_exception().and_then(|e| e.message()).unwrap_or_else(|| "uncaught exception".to_string())
        }
        other => other.to_string(),
    };
    TrigflowError::Script(format!("{stage}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_name() {
        assert_eq!(function_name("function main() {}"), Some("main".to_string()));
        assert_eq!(function_name("  function  _helper123 (a) {}"), Some("_helper123".to_string()));
        assert_eq!(function_name("return 1;"), None);
    }

    #[test]
    fn test_named_function() {
        let code = r#"
        function main(params, input) {
            return { sum: params.a + input.b };
        }
        "#;
        let out = execute(code, &json!({"a": 1}), &json!({"b": 2})).unwrap();
        assert_eq!(out, json!({"sum": 3}));
    }

    #[test]
    fn test_function_body_and_scalar_result() {
        let out = execute("return params.name.toUpperCase();", &json!({"name": "ok"}), &Value::Null).unwrap();
        assert_eq!(out, json!({"result": "OK"}));

        let out = execute("const x = 1;", &json!({}), &Value::Null).unwrap();
        assert_eq!(out, json!({"result": null}));
    }

    #[test]
    fn test_thrown_error() {
        let err = execute("throw new Error('boom');", &json!({}), &Value::Null).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
