use serde::Serialize;

/// Structured one-shot domain events, emitted alongside ordinary `tracing`
/// spans so session/turn lifecycle can be grepped out of JSON log output
/// without re-deriving it from free-text messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionStarted {
        session_id: String,
    },
    SessionStateChanged {
        session_id: String,
        from: String,
        to: String,
        valid: bool,
    },
    SttConnected {
        session_id: String,
    },
    SttReconnected {
        session_id: String,
        attempt: u32,
    },
    SttDisconnected {
        session_id: String,
        code: Option<u16>,
    },
    TurnStarted {
        session_id: String,
        text_chars: usize,
    },
    TurnCompleted {
        session_id: String,
        steps: usize,
        tool_iterations: u32,
        duration_ms: u64,
    },
    ToolInvoked {
        session_id: String,
        tool_name: String,
        ok: bool,
        duration_ms: u64,
    },
    TtsStarted {
        session_id: String,
        words: usize,
    },
    TtsCompleted {
        session_id: String,
        chunks: usize,
        cancelled: bool,
    },
    Cancelled {
        session_id: String,
        reason: &'static str,
    },
    TranscriptReset {
        session_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "vg_event");
    }
}
