use vg_domain::cancel::CancelToken;
use vg_domain::tool::{ToolCall, ToolDefinition};
use vg_domain::transcript::Message;
use vg_domain::Result;

/// Selects how the model is constrained to use tools, mirroring the
/// upstream `tool_choice` field.
#[derive(Debug, Clone)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Function { name: String },
}

/// A chat-completion request. `max_tokens` has no `Option` because the
/// turn executor always supplies one (the platform default, 300).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
}

/// The parsed first choice of a chat-completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
}

/// A single non-streaming request/response call to the chat-completion
/// gateway. There is no streaming variant: every response carries exactly
/// one `choices[0].message` with a `finish_reason`, never a token stream.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, req: ChatRequest, cancel: CancelToken) -> Result<ChatResponse>;
}
