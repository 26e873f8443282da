//! Adapter for the OpenAI-compatible chat-completion gateway configured in
//! `platform.llm`. One logical call per `chat()`; no streaming, no
//! multi-vendor routing — the gateway in front of this speaks one wire
//! format. Transport-level failures (connection reset, DNS, timeout) are
//! retried with backoff; a completed HTTP response, success or error status,
//! is never retried.

use std::time::Duration;

use crate::traits::{ChatRequest, ChatResponse, LlmProvider, ToolChoice};
use serde_json::Value;
use vg_domain::cancel::CancelToken;
use vg_domain::tool::{ToolCall, ToolDefinition};
use vg_domain::transcript::{Message, Role};
use vg_domain::{Error, Result};

/// Attempts at the transport level, not counting the backoff sleep. A
/// 4xx/5xx response from the gateway is not a transport failure and is
/// returned immediately instead of consuming a retry.
const MAX_ATTEMPTS: u32 = 3;

pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_choice"] = tool_choice_to_openai(choice);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest, cancel: CancelToken) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&req);

        let mut last_err = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_secs(2u64.pow(attempt));
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(Error::Other("chat request cancelled".into())),
                }
            }

            let request = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send();

            let response = tokio::select! {
                result = request => result,
                _ = cancel.cancelled() => return Err(Error::Other("chat request cancelled".into())),
            };

            match response {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.map_err(|e| Error::Http(e.to_string()))?;

                    if !status.is_success() {
                        return Err(Error::Llm(format!("gateway returned {status}: {text}")));
                    }

                    let parsed: Value = serde_json::from_str(&text)?;
                    return parse_chat_response(&parsed);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = MAX_ATTEMPTS,
                        error = %e,
                        "LLM gateway transport error"
                    );
                    last_err = Some(Error::Http(e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Http("max retries exceeded".into())))
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Empty assistant/user content is replaced with a placeholder; some
/// gateways reject messages with an empty string body.
fn non_empty(text: &str) -> &str {
    if text.is_empty() {
        "..."
    } else {
        text
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content.as_deref().unwrap_or(""),
        }),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": non_empty(msg.content.as_deref().unwrap_or("")),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});

    obj["content"] = match &msg.content {
        Some(text) => Value::String(text.clone()),
        None => Value::Null,
    };

    if let Some(calls) = &msg.tool_calls {
        let tool_calls: Vec<Value> = calls
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.name,
                        "arguments": c.arguments,
                    }
                })
            })
            .collect();
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn tool_choice_to_openai(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".into()),
        ToolChoice::None => Value::String("none".into()),
        ToolChoice::Required => Value::String("required".into()),
        ToolChoice::Function { name } => serde_json::json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Llm("no choices in response".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::Llm("no message in choice".into()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(String::from);

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Llm("no finish_reason in choice".into()))?
        .to_string();

    let tool_calls = parse_tool_calls(message);

    Ok(ChatResponse {
        content,
        tool_calls,
        finish_reason,
    })
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };

    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let function = tc.get("function")?;
            let name = function.get("name")?.as_str()?.to_string();
            let arguments = function
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}")
                .to_string();
            Some(ToolCall { id, name, arguments })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_final_answer_tool_call() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "final_answer", "arguments": "{\"answer\":\"hi\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let parsed = parse_chat_response(&body).unwrap();
        assert_eq!(parsed.finish_reason, "tool_calls");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "final_answer");
    }

    #[test]
    fn missing_choices_is_an_error() {
        let body = serde_json::json!({});
        assert!(parse_chat_response(&body).is_err());
    }

    #[test]
    fn plain_text_response_has_no_tool_calls() {
        let body = serde_json::json!({
            "choices": [{
                "message": { "role": "assistant", "content": "hello" },
                "finish_reason": "stop"
            }]
        });
        let parsed = parse_chat_response(&body).unwrap();
        assert_eq!(parsed.content.as_deref(), Some("hello"));
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn empty_user_text_is_replaced_with_placeholder() {
        let msg = Message::user("");
        let value = msg_to_openai(&msg);
        assert_eq!(value["content"], "...");
    }
}
