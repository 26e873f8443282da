//! A single adapter to the OpenAI-compatible chat-completion gateway: one
//! request, one response, tool schemas passed through verbatim.

pub mod openai_compat;
pub mod traits;

pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatRequest, ChatResponse, LlmProvider, ToolChoice};
