//! Client protocol: WebSocket message types exchanged between the browser
//! client and the session orchestrator, and the session state machine's
//! transition table.

use serde::{Deserialize, Serialize};

/// Messages the client sends over the `/session` WebSocket.
///
/// Legacy `authenticate`/`configure` messages are out of scope; the agent is
/// pre-configured server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "audio_ready")]
    AudioReady,
    #[serde(rename = "cancel")]
    Cancel,
    #[serde(rename = "reset")]
    Reset,
    #[serde(rename = "ping")]
    Ping,
}

/// Messages the server sends over the `/session` WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "ready")]
    Ready {
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        #[serde(rename = "ttsSampleRate")]
        tts_sample_rate: u32,
    },
    #[serde(rename = "greeting")]
    Greeting { text: String },
    #[serde(rename = "transcript")]
    Transcript { text: String, r#final: bool },
    #[serde(rename = "turn")]
    Turn { text: String },
    #[serde(rename = "thinking")]
    Thinking,
    #[serde(rename = "chat")]
    Chat { text: String, steps: Vec<String> },
    #[serde(rename = "tts_done")]
    TtsDone,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "reset")]
    Reset,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Vec<String>>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            details: None,
        }
    }
}

/// Error messages with fixed, client-visible wording (see error handling table).
pub const STT_CONNECT_FAILED: &str = "Failed to connect to speech recognition";
pub const STT_DISCONNECTED: &str = "Speech recognition disconnected";
pub const CHAT_FAILED: &str = "Chat failed";
pub const TTS_FAILED: &str = "TTS synthesis failed";

/// The session's coarse lifecycle state. Transitions not present in
/// [`is_valid_transition`] are invariant violations: logged outside of
/// production builds, silently ignored in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Ready,
    Listening,
    Thinking,
    Speaking,
    Error,
}

/// The canonical transition table from the session orchestrator design.
pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Connecting, Ready)
            | (Connecting, Error)
            | (Ready, Listening)
            | (Ready, Error)
            | (Ready, Connecting)
            | (Listening, Thinking)
            | (Listening, Speaking)
            | (Listening, Error)
            | (Listening, Connecting)
            | (Thinking, Speaking)
            | (Thinking, Listening)
            | (Thinking, Error)
            | (Thinking, Connecting)
            | (Speaking, Listening)
            | (Speaking, Thinking)
            | (Speaking, Error)
            | (Speaking, Connecting)
            | (Error, Connecting)
            | (Error, Ready)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connecting_to_ready_is_valid() {
        assert!(is_valid_transition(SessionState::Connecting, SessionState::Ready));
    }

    #[test]
    fn ready_to_thinking_is_invalid() {
        assert!(!is_valid_transition(SessionState::Ready, SessionState::Thinking));
    }

    #[test]
    fn error_can_return_to_ready_or_connecting() {
        assert!(is_valid_transition(SessionState::Error, SessionState::Ready));
        assert!(is_valid_transition(SessionState::Error, SessionState::Connecting));
    }

    #[test]
    fn any_state_can_transition_to_error() {
        for state in [
            SessionState::Connecting,
            SessionState::Ready,
            SessionState::Listening,
            SessionState::Thinking,
            SessionState::Speaking,
        ] {
            assert!(is_valid_transition(state, SessionState::Error), "{state:?} -> Error");
        }
    }

    #[test]
    fn client_message_tags_round_trip() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"audio_ready"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::AudioReady));
    }

    #[test]
    fn server_ready_message_uses_camel_case_fields() {
        let msg = ServerMessage::Ready {
            sample_rate: 16_000,
            tts_sample_rate: 24_000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sampleRate"], 16_000);
        assert_eq!(json["ttsSampleRate"], 24_000);
    }
}
