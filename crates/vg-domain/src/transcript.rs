//! The conversation transcript: an ordered sequence of messages shared between
//! the turn executor and the LLM caller. See the `Message` invariants below —
//! index 0 is always the system prompt, and only the turn executor and the
//! session's reset/stop paths are permitted to mutate it.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single transcript entry.
///
/// `tool_calls` is only ever populated for `Assistant` messages; `tool_call_id`
/// only for `Tool` messages (the id of the call this message answers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// The mutable per-session conversation history.
///
/// Invariant: `messages[0]` is always `Role::System` and is never removed,
/// including across `reset()`.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Truncate back to just the system message. Used by `reset`.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_transcript_has_system_message_at_index_zero() {
        let t = Transcript::new("you are a voice agent");
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].role, Role::System);
    }

    #[test]
    fn reset_truncates_to_system_message_only() {
        let mut t = Transcript::new("system prompt");
        t.push(Message::user("hello"));
        t.push(Message::assistant_text("hi there"));
        assert_eq!(t.len(), 3);
        t.reset();
        assert_eq!(t.len(), 1);
        assert_eq!(t.messages()[0].role, Role::System);
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let msg = Message::tool_result("call-1", "Sunny, 22C");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(msg.content.as_deref(), Some("Sunny, 22C"));
    }
}
