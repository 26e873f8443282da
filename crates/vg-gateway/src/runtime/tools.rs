//! Registration/dispatch interface for built-in tools (web search, page
//! fetch, a JS sandbox, and similar). Bodies are out of scope here — this
//! registry ships empty, so every call falls through to the session's
//! user-defined tool executor. A deployment that wants real built-ins
//! implements [`BuiltinTool`] and calls [`BuiltinToolExecutor::register`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use vg_domain::cancel::CancelToken;

/// Per-call context, mirroring [`vg_tools::ToolContext`] so a built-in and a
/// user-defined handler see the same shape of secrets and cancellation.
pub struct BuiltinToolContext {
    pub secrets: HashMap<String, String>,
    pub cancel: CancelToken,
}

/// Same deadline as the C1 tool executor (`vg_tools::HANDLER_DEADLINE`);
/// built-ins are held to the same bound.
const HANDLER_DEADLINE: Duration = Duration::from_secs(30);

#[async_trait::async_trait]
pub trait BuiltinTool: Send + Sync {
    async fn call(&self, args: Value, ctx: &BuiltinToolContext) -> Result<Value, String>;
}

/// Dispatches by name to a registered built-in. A name with no registered
/// handler is the null sentinel: the turn executor treats it as "not a
/// built-in" and falls back to the session's C1 tool executor.
#[derive(Default)]
pub struct BuiltinToolExecutor {
    tools: HashMap<String, Arc<dyn BuiltinTool>>,
}

impl BuiltinToolExecutor {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn BuiltinTool>) {
        self.tools.insert(name.into(), handler);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// `None` is the null sentinel (no such built-in); `Some(_)` carries the
    /// handler's own `Ok`/`Err` outcome.
    pub async fn dispatch(
        &self,
        name: &str,
        args: Value,
        secrets: &HashMap<String, String>,
    ) -> Option<Result<Value, String>> {
        let tool = self.tools.get(name)?;
        let ctx = BuiltinToolContext {
            secrets: secrets.clone(),
            cancel: CancelToken::new(),
        };
        let result = tokio::select! {
            result = tool.call(args, &ctx) => result,
            _ = tokio::time::sleep(HANDLER_DEADLINE) => {
                ctx.cancel.cancel();
                tracing::warn!(tool = %name, deadline_secs = HANDLER_DEADLINE.as_secs(), "built-in tool timed out");
                Err(format!("tool \"{name}\" timed out after {}s", HANDLER_DEADLINE.as_secs()))
            }
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_registry_always_returns_the_null_sentinel() {
        let registry = BuiltinToolExecutor::new();
        let out = registry
            .dispatch("web_search", serde_json::json!({}), &HashMap::new())
            .await;
        assert!(out.is_none());
    }

    struct Echo;

    #[async_trait::async_trait]
    impl BuiltinTool for Echo {
        async fn call(&self, args: Value, _ctx: &BuiltinToolContext) -> Result<Value, String> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn registered_builtin_is_dispatched() {
        let mut registry = BuiltinToolExecutor::new();
        registry.register("echo", Arc::new(Echo));
        assert!(registry.has_tool("echo"));
        let out = registry
            .dispatch("echo", serde_json::json!({"x": 1}), &HashMap::new())
            .await;
        assert_eq!(out.unwrap().unwrap(), serde_json::json!({"x": 1}));
    }
}
