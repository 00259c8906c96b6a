use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{Result, common::Vars, runtime::RunContext, tools::Tool};

/// `counter`: increments the incoming `count`, or starts from `initialValue`.
pub struct CounterTool;

#[async_trait]
impl Tool for CounterTool {
    fn name(&self) -> &str {
        "counter"
    }

    async fn execute(
        &self,
        params: Vars,
        input: Value,
        ctx: &RunContext,
    ) -> Result<Value> {
        let current = input.get("count").and_then(as_i64).or_else(|| params.get_value("initialValue").and_then(as_i64)).unwrap_or(0);
        let count = current + 1;
        ctx.emit_log(format!("counter at {count}"));
        Ok(json!({ "count": count }))
    }
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
