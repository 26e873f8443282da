//! The turn executor (component C5): a bounded tool-calling loop that drives
//! one user utterance to a spoken answer. Runs at most four LLM passes (one
//! initial call plus up to three re-calls after tool execution) and always
//! terminates with either a `final_answer` or a fixed fallback string.

use std::collections::HashMap;

use vg_domain::cancel::CancelToken;
use vg_domain::tool::{ToolCall, ToolDefinition, FINAL_ANSWER_TOOL};
use vg_domain::transcript::{Message, Transcript};
use vg_domain::{Error, Result};
use vg_providers::{ChatRequest, ChatResponse, LlmProvider, ToolChoice};
use vg_tools::ToolExecutor;

use super::tools::BuiltinToolExecutor;

const FALLBACK_TEXT: &str = "Sorry, I couldn't generate a response.";

/// What a completed turn produced: the text to speak, and the ordered
/// `"Using <name>"` step labels collected along the way.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub steps: Vec<String>,
}

/// Everything the loop needs that doesn't change across its passes.
pub struct TurnContext<'a> {
    pub llm: &'a dyn LlmProvider,
    pub model: &'a str,
    pub max_tokens: u32,
    pub max_tool_iterations: u32,
    pub tool_definitions: Vec<ToolDefinition>,
    pub builtins: &'a BuiltinToolExecutor,
    pub tools: &'a ToolExecutor,
    pub secrets: &'a HashMap<String, String>,
}

/// Run one user turn to completion. Appends the user message, then loops the
/// LLM/tool exchange against `transcript`, finally appending the assistant's
/// spoken answer. A cancelled signal surfaces as `Err` so the caller can
/// distinguish "turn aborted" from "turn failed".
pub async fn run_turn(
    transcript: &mut Transcript,
    text: &str,
    ctx: &TurnContext<'_>,
    cancel: CancelToken,
) -> Result<TurnOutcome> {
    transcript.push(Message::user(text));

    let has_tools = !ctx.tool_definitions.is_empty();
    let mut steps = Vec::new();
    let mut response = call_llm(transcript, ctx, has_tools, cancel.clone()).await?;

    let max_passes = ctx.max_tool_iterations + 1;

    for pass in 0..max_passes {
        let is_last_pass = pass + 1 == max_passes;

        if let Some(answer) = extract_final_answer(&response) {
            transcript.push(Message::assistant_text(&answer));
            return Ok(TurnOutcome { text: answer, steps });
        }

        if is_last_pass {
            let text = finalize_content(response.content.as_deref());
            transcript.push(Message::assistant_text(&text));
            return Ok(TurnOutcome { text, steps });
        }

        if !response.tool_calls.is_empty() {
            transcript.push(Message::assistant_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                steps.push(format!("Using {}", call.name));
            }

            let results = dispatch_tool_calls(&response.tool_calls, ctx).await;
            for (call, result) in response.tool_calls.iter().zip(results.into_iter()) {
                transcript.push(Message::tool_result(call.id.clone(), result));
            }

            if cancel.is_cancelled() {
                return Err(Error::Other("turn cancelled".into()));
            }

            let next_pass_is_last = pass + 2 == max_passes;
            response = if next_pass_is_last {
                call_llm_forced_final(transcript, ctx, cancel.clone()).await?
            } else {
                call_llm(transcript, ctx, has_tools, cancel.clone()).await?
            };
            continue;
        }

        if looks_like_tool_use(&response.finish_reason) {
            tracing::warn!(
                finish_reason = %response.finish_reason,
                "assistant message carried no tool calls despite a tool-use finish reason; retrying once"
            );
            match response.content.as_deref().filter(|c| !c.is_empty()) {
                Some(content) => {
                    transcript.push(Message::assistant_text(content));
                    response = call_llm(transcript, ctx, has_tools, cancel.clone()).await?;
                    continue;
                }
                None => {
                    let text = FALLBACK_TEXT.to_string();
                    transcript.push(Message::assistant_text(&text));
                    return Ok(TurnOutcome { text, steps });
                }
            }
        }

        let text = finalize_content(response.content.as_deref());
        transcript.push(Message::assistant_text(&text));
        return Ok(TurnOutcome { text, steps });
    }

    let text = FALLBACK_TEXT.to_string();
    transcript.push(Message::assistant_text(&text));
    Ok(TurnOutcome { text, steps })
}

fn finalize_content(content: Option<&str>) -> String {
    match content {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => FALLBACK_TEXT.to_string(),
    }
}

fn looks_like_tool_use(finish_reason: &str) -> bool {
    matches!(finish_reason, "tool_calls" | "tool_use")
}

fn extract_final_answer(response: &ChatResponse) -> Option<String> {
    let call = response
        .tool_calls
        .iter()
        .find(|c| c.name == FINAL_ANSWER_TOOL)?;
    let answer = call
        .parsed_arguments()
        .ok()
        .and_then(|v| v.get("answer").and_then(|a| a.as_str()).map(str::to_string))
        .unwrap_or_default();
    Some(if answer.trim().is_empty() {
        FALLBACK_TEXT.to_string()
    } else {
        answer
    })
}

async fn call_llm(
    transcript: &Transcript,
    ctx: &TurnContext<'_>,
    has_tools: bool,
    cancel: CancelToken,
) -> Result<ChatResponse> {
    let req = ChatRequest {
        model: ctx.model.to_string(),
        messages: transcript.messages().to_vec(),
        max_tokens: ctx.max_tokens,
        tools: ctx.tool_definitions.clone(),
        tool_choice: if has_tools { Some(ToolChoice::Required) } else { None },
    };
    ctx.llm.chat(req, cancel).await
}

/// The last allowed call: restrict the model to `final_answer` only, forcing
/// the loop to terminate on the next examined response.
async fn call_llm_forced_final(
    transcript: &Transcript,
    ctx: &TurnContext<'_>,
    cancel: CancelToken,
) -> Result<ChatResponse> {
    let final_def = ctx
        .tool_definitions
        .iter()
        .find(|d| d.name == FINAL_ANSWER_TOOL)
        .cloned()
        .into_iter()
        .collect::<Vec<_>>();

    let req = ChatRequest {
        model: ctx.model.to_string(),
        messages: transcript.messages().to_vec(),
        max_tokens: ctx.max_tokens,
        tools: final_def,
        tool_choice: Some(ToolChoice::Function { name: FINAL_ANSWER_TOOL.to_string() }),
    };
    ctx.llm.chat(req, cancel).await
}

/// Fan out every tool call concurrently; results land in call order, not
/// completion order.
async fn dispatch_tool_calls(calls: &[ToolCall], ctx: &TurnContext<'_>) -> Vec<String> {
    let futures = calls.iter().map(|call| dispatch_one(call, ctx));
    futures_util::future::join_all(futures).await
}

async fn dispatch_one(call: &ToolCall, ctx: &TurnContext<'_>) -> String {
    let args = match call.parsed_arguments() {
        Ok(v) => v,
        Err(_) => return format!("Error: Invalid JSON arguments for tool \"{}\"", call.name),
    };

    if let Some(result) = ctx.builtins.dispatch(&call.name, args.clone(), ctx.secrets).await {
        return format_builtin_result(result);
    }

    ctx.tools.execute(&call.name, args).await
}

fn format_builtin_result(result: std::result::Result<serde_json::Value, String>) -> String {
    match result {
        Ok(serde_json::Value::Null) => "null".to_string(),
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => serde_json::to_string(&other).unwrap_or_else(|_| "null".into()),
        Err(message) => format!("Error: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// A scripted provider: returns its queued responses in order, one per call.
    struct ScriptedLlm {
        responses: Mutex<Vec<ChatResponse>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn chat(&self, _req: ChatRequest, _cancel: CancelToken) -> Result<ChatResponse> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                panic!("ScriptedLlm ran out of responses");
            }
            Ok(responses.remove(0))
        }
    }

    fn final_answer_response(answer: &str) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_final".into(),
                name: FINAL_ANSWER_TOOL.into(),
                arguments: serde_json::json!({ "answer": answer }).to_string(),
            }],
            finish_reason: "tool_calls".into(),
        }
    }

    fn plain_text_response(text: &str) -> ChatResponse {
        ChatResponse {
            content: Some(text.into()),
            tool_calls: vec![],
            finish_reason: "stop".into(),
        }
    }

    fn base_ctx<'a>(
        llm: &'a dyn LlmProvider,
        builtins: &'a BuiltinToolExecutor,
        tools: &'a ToolExecutor,
        secrets: &'a HashMap<String, String>,
    ) -> TurnContext<'a> {
        TurnContext {
            llm,
            model: "gpt-4o-mini",
            max_tokens: 300,
            max_tool_iterations: 3,
            tool_definitions: vec![ToolDefinition::final_answer()],
            builtins,
            tools,
            secrets,
        }
    }

    #[tokio::test]
    async fn no_tools_returns_plain_text_immediately() {
        let llm = ScriptedLlm { responses: Mutex::new(vec![plain_text_response("hi there")]) };
        let builtins = BuiltinToolExecutor::new();
        let tools = ToolExecutor::new(HashMap::new());
        let secrets = HashMap::new();
        let mut ctx = base_ctx(&llm, &builtins, &tools, &secrets);
        ctx.tool_definitions.clear();

        let mut transcript = Transcript::new("sys");
        let outcome = run_turn(&mut transcript, "hello", &ctx, CancelToken::new()).await.unwrap();
        assert_eq!(outcome.text, "hi there");
        assert!(outcome.steps.is_empty());
    }

    #[tokio::test]
    async fn final_answer_short_circuits() {
        let llm = ScriptedLlm { responses: Mutex::new(vec![final_answer_response("it's sunny")]) };
        let builtins = BuiltinToolExecutor::new();
        let tools = ToolExecutor::new(HashMap::new());
        let secrets = HashMap::new();
        let ctx = base_ctx(&llm, &builtins, &tools, &secrets);

        let mut transcript = Transcript::new("sys");
        let outcome = run_turn(&mut transcript, "how's the weather", &ctx, CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.text, "it's sunny");
    }

    struct Echo;
    #[async_trait]
    impl vg_tools::ToolHandler for Echo {
        async fn call(
            &self,
            args: serde_json::Value,
            _ctx: &vg_tools::ToolContext,
        ) -> std::result::Result<serde_json::Value, String> {
            Ok(args.get("city").cloned().unwrap_or(serde_json::Value::Null))
        }
    }

    #[tokio::test]
    async fn tool_call_then_final_answer_round_trips() {
        let tool_call_response = ChatResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "get_weather".into(),
                arguments: serde_json::json!({"city": "NYC"}).to_string(),
            }],
            finish_reason: "tool_calls".into(),
        };
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![tool_call_response, final_answer_response("sunny in NYC")]),
        };
        let builtins = BuiltinToolExecutor::new();
        let mut tools = ToolExecutor::new(HashMap::new());
        let weather_def = ToolDefinition {
            name: "get_weather".into(),
            description: "gets weather".into(),
            parameters: serde_json::json!({"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]}),
        };
        tools.register(weather_def.clone(), Arc::new(Echo));
        let secrets = HashMap::new();
        let mut ctx = base_ctx(&llm, &builtins, &tools, &secrets);
        ctx.tool_definitions.push(weather_def);

        let mut transcript = Transcript::new("sys");
        let outcome = run_turn(&mut transcript, "weather in NYC?", &ctx, CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.text, "sunny in NYC");
        assert_eq!(outcome.steps, vec!["Using get_weather".to_string()]);

        let messages = transcript.messages();
        let tool_msg = messages.iter().find(|m| m.tool_call_id.as_deref() == Some("call_1")).unwrap();
        assert_eq!(tool_msg.content.as_deref(), Some("NYC"));
    }

    #[tokio::test]
    async fn exhausting_the_loop_returns_fallback() {
        let tool_call_response = || ChatResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_x".into(),
                name: "noop".into(),
                arguments: "{}".into(),
            }],
            finish_reason: "tool_calls".into(),
        };
        // 4 passes total: three tool-call responses drive an iteration each,
        // then the final (forced) response is still a non-final tool call.
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                tool_call_response(),
                tool_call_response(),
                tool_call_response(),
                tool_call_response(),
            ]),
        };
        let builtins = BuiltinToolExecutor::new();
        let mut tools = ToolExecutor::new(HashMap::new());
        let noop_def = ToolDefinition {
            name: "noop".into(),
            description: "d".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        tools.register(noop_def.clone(), Arc::new(Echo));
        let secrets = HashMap::new();
        let mut ctx = base_ctx(&llm, &builtins, &tools, &secrets);
        ctx.tool_definitions.push(noop_def);

        let mut transcript = Transcript::new("sys");
        let outcome = run_turn(&mut transcript, "do stuff", &ctx, CancelToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.text, FALLBACK_TEXT);
    }

    #[tokio::test]
    async fn cancellation_after_tool_execution_is_reported_as_error() {
        let tool_call_response = ChatResponse {
            content: None,
            tool_calls: vec![ToolCall { id: "c1".into(), name: "noop".into(), arguments: "{}".into() }],
            finish_reason: "tool_calls".into(),
        };
        let llm = ScriptedLlm { responses: Mutex::new(vec![tool_call_response]) };
        let builtins = BuiltinToolExecutor::new();
        let mut tools = ToolExecutor::new(HashMap::new());
        let noop_def = ToolDefinition {
            name: "noop".into(),
            description: "d".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        tools.register(noop_def.clone(), Arc::new(Echo));
        let secrets = HashMap::new();
        let mut ctx = base_ctx(&llm, &builtins, &tools, &secrets);
        ctx.tool_definitions.push(noop_def);

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut transcript = Transcript::new("sys");
        let result = run_turn(&mut transcript, "do stuff", &ctx, cancel).await;
        assert!(result.is_err());
    }
}
