//! The tool executor (component C1): resolves a tool call by name, validates
//! its arguments against the tool's declared JSON Schema, and invokes the
//! handler under a bounded deadline. Never panics and never propagates an
//! error — every outcome, success or failure, comes back as a string so it
//! can be dropped straight into a `tool` transcript message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use vg_domain::cancel::CancelToken;
use vg_domain::tool::ToolDefinition;

/// Per-call context handed to a handler: a read-only copy of the session's
/// secrets (handlers cannot mutate the session-wide map) and a signal that
/// fires once the deadline elapses or the caller cancels explicitly.
pub struct ToolContext {
    pub secrets: HashMap<String, String>,
    pub cancel: CancelToken,
}

/// Implemented once per user-defined or built-in tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// `Ok(Value::Null)` becomes the literal string `"null"`. `Ok` of any
    /// other value is stringified (unchanged if already a string, JSON
    /// encoded otherwise). `Err` becomes `Error: <message>`.
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, String>;
}

const HANDLER_DEADLINE: Duration = Duration::from_secs(30);

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Holds every tool available to a session: its schema (exposed to the LLM)
/// and its handler (invoked on a matching call).
#[derive(Default)]
pub struct ToolExecutor {
    tools: HashMap<String, RegisteredTool>,
    secrets: HashMap<String, String>,
}

impl ToolExecutor {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self {
            tools: HashMap::new(),
            secrets,
        }
    }

    pub fn register(&mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        self.tools
            .insert(definition.name.clone(), RegisteredTool { definition, handler });
    }

    /// Tool schemas for every registered tool, in registration order is not
    /// guaranteed (backed by a map); callers needing a stable LLM-facing
    /// order should sort by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Resolve and invoke `name` with `args`. Always returns a well-formed
    /// string; never returns `Err` and never panics.
    pub async fn execute(&self, name: &str, args: Value) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: Unknown tool \"{name}\"");
        };

        if let Err(issues) = validate_args(&tool.definition, &args) {
            return format!("Error: Invalid arguments for tool \"{name}\": {issues}");
        }

        let ctx = ToolContext {
            secrets: self.secrets.clone(),
            cancel: CancelToken::new(),
        };

        tokio::select! {
            result = tool.handler.call(args, &ctx) => match result {
                Ok(Value::Null) => "null".to_string(),
                Ok(Value::String(s)) => s,
                Ok(other) => serde_json::to_string(&other).unwrap_or_else(|_| "null".into()),
                Err(message) => format!("Error: {message}"),
            },
            _ = tokio::time::sleep(HANDLER_DEADLINE) => {
                ctx.cancel.cancel();
                tracing::warn!(tool = %name, deadline_secs = HANDLER_DEADLINE.as_secs(), "tool handler timed out");
                format!("Error: tool \"{name}\" timed out after {}s", HANDLER_DEADLINE.as_secs())
            }
        }
    }
}

fn validate_args(definition: &ToolDefinition, args: &Value) -> Result<(), String> {
    let validator = match jsonschema::validator_for(&definition.parameters) {
        Ok(v) => v,
        Err(e) => return Err(format!("tool schema is invalid: {e}")),
    };

    let issues: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::tool::ToolDefinition;

    struct Echo;

    #[async_trait::async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            Err("boom".into())
        }
    }

    fn echo_def() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "echoes text".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_fixed_error_string() {
        let exec = ToolExecutor::new(HashMap::new());
        let out = exec.execute("nope", serde_json::json!({})).await;
        assert_eq!(out, "Error: Unknown tool \"nope\"");
    }

    #[tokio::test]
    async fn missing_required_argument_is_rejected() {
        let mut exec = ToolExecutor::new(HashMap::new());
        exec.register(echo_def(), Arc::new(Echo));
        let out = exec.execute("echo", serde_json::json!({})).await;
        assert!(out.starts_with("Error: Invalid arguments for tool \"echo\":"));
    }

    #[tokio::test]
    async fn successful_string_result_is_returned_unchanged() {
        let mut exec = ToolExecutor::new(HashMap::new());
        exec.register(echo_def(), Arc::new(Echo));
        let out = exec.execute("echo", serde_json::json!({"text": "hi"})).await;
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn null_result_becomes_literal_null_string() {
        struct NullHandler;
        #[async_trait::async_trait]
        impl ToolHandler for NullHandler {
            async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
                Ok(Value::Null)
            }
        }
        let mut exec = ToolExecutor::new(HashMap::new());
        exec.register(
            ToolDefinition {
                name: "noop".into(),
                description: "does nothing".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            Arc::new(NullHandler),
        );
        let out = exec.execute("noop", serde_json::json!({})).await;
        assert_eq!(out, "null");
    }

    #[tokio::test]
    async fn handler_error_is_wrapped() {
        let mut exec = ToolExecutor::new(HashMap::new());
        exec.register(
            ToolDefinition {
                name: "fail".into(),
                description: "always fails".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            Arc::new(Failing),
        );
        let out = exec.execute("fail", serde_json::json!({})).await;
        assert_eq!(out, "Error: boom");
    }
}
