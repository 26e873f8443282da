//! The session orchestrator (component C6): one instance per client
//! connection, owning the STT stream, the TTS pool, the transcript, and the
//! cancel/reset/stop state machine described in the protocol's session
//! lifecycle.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use vg_domain::cancel::CancelToken;
use vg_domain::config::PlatformConfig;
use vg_domain::config::SttConfig;
use vg_domain::trace::TraceEvent;
use vg_domain::transcript::Transcript;
use vg_protocol::{
    is_valid_transition, ServerMessage, SessionState, CHAT_FAILED, STT_CONNECT_FAILED,
    STT_DISCONNECTED, TTS_FAILED,
};
use vg_providers::LlmProvider;
use vg_stt::{SttEvent, SttStream};
use vg_tools::ToolExecutor;
use vg_tts::TtsPool;

use crate::agent::AgentConfig;
use crate::runtime::{run_turn, BuiltinToolExecutor, TurnContext};

/// A frame destined for the client socket: either a JSON control message or
/// a raw PCM16 chunk. The WS handler (C7) owns turning these into actual
/// `axum` websocket frames.
pub enum Outbound {
    Json(ServerMessage),
    Binary(Vec<u8>),
}

/// Everything needed to build a session, collected by `main.rs` at startup
/// and handed to the client WS handler once per incoming connection.
pub struct SessionDeps {
    pub llm: Arc<dyn LlmProvider>,
    pub builtins: Arc<BuiltinToolExecutor>,
    pub agent: AgentConfig,
    pub platform: PlatformConfig,
    pub stt_api_key: String,
    pub tts_api_key: String,
}

pub struct Session {
    pub id: String,
    state: Mutex<SessionState>,
    transcript: AsyncMutex<Transcript>,
    stt: Mutex<Option<SttStream>>,
    stt_config: SttConfig,
    stt_api_key: String,
    tts: Arc<TtsPool>,
    agent: AgentConfig,
    llm: Arc<dyn LlmProvider>,
    builtins: Arc<BuiltinToolExecutor>,
    tools: Arc<ToolExecutor>,
    secrets: HashMap<String, String>,
    model: String,
    max_tokens: u32,
    max_tool_iterations: u32,
    stt_sample_rate: u32,
    tts_sample_rate: u32,
    outbound: mpsc::UnboundedSender<Outbound>,
    chat_cancel: Mutex<CancelToken>,
    tts_cancel: Mutex<CancelToken>,
    tts_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    greeting_sent: AtomicBool,
    stopped: AtomicBool,
}

impl Session {
    pub async fn create(
        id: String,
        deps: SessionDeps,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<Self> {
        let system_prompt = deps.agent.system_prompt(&deps.builtins);
        let tools = build_tool_executor(&deps.agent);
        let tts = Arc::new(TtsPool::connect(deps.platform.tts.clone(), deps.tts_api_key).await);

        Arc::new(Self {
            id,
            state: Mutex::new(SessionState::Connecting),
            transcript: AsyncMutex::new(Transcript::new(system_prompt)),
            stt: Mutex::new(None),
            stt_config: deps.platform.stt.clone(),
            stt_api_key: deps.stt_api_key,
            tts,
            agent: deps.agent,
            llm: deps.llm,
            builtins: deps.builtins,
            tools: Arc::new(tools),
            secrets: HashMap::new(),
            model: deps.platform.llm.default_model.clone(),
            max_tokens: deps.platform.llm.max_tokens,
            max_tool_iterations: deps.platform.llm.max_tool_iterations,
            stt_sample_rate: deps.platform.stt.sample_rate,
            tts_sample_rate: deps.platform.tts.sample_rate,
            outbound,
            chat_cancel: Mutex::new(CancelToken::new()),
            tts_cancel: Mutex::new(CancelToken::new()),
            tts_task: Mutex::new(None),
            greeting_sent: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Send `ready`, then connect STT in the background. Never blocks the
    /// caller (the WebSocket open callback).
    pub fn start(self: &Arc<Self>) {
        TraceEvent::SessionStarted { session_id: self.id.clone() }.emit();
        let _ = self.outbound.send(Outbound::Json(ServerMessage::Ready {
            sample_rate: self.stt_sample_rate,
            tts_sample_rate: self.tts_sample_rate,
        }));
        self.set_state(SessionState::Ready);

        let session = Arc::clone(self);
        tokio::spawn(async move { session.connect_stt().await });
    }

    /// Emits the greeting exactly once per session (or per reset). Safe to
    /// call more than once.
    pub fn on_audio_ready(self: &Arc<Self>) {
        self.emit_greeting();
    }

    /// Best-effort forward of a PCM16 microphone chunk to STT.
    pub fn on_audio(&self, bytes: &[u8]) {
        if bytes.len() % 2 != 0 {
            return;
        }
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        if let Some(stt) = self.stt.lock().as_ref() {
            stt.send(&samples);
        }
    }

    pub async fn on_cancel(self: &Arc<Self>) {
        self.cancel_chat_and_tts();
        self.clear_stt();
        self.await_tts_task().await;
        TraceEvent::Cancelled { session_id: self.id.clone(), reason: "client_cancel" }.emit();
        let _ = self.outbound.send(Outbound::Json(ServerMessage::Cancelled));
        self.set_state(SessionState::Listening);
    }

    pub async fn on_reset(self: &Arc<Self>) {
        self.cancel_chat_and_tts();
        self.clear_stt();
        self.await_tts_task().await;
        {
            let mut transcript = self.transcript.lock().await;
            transcript.reset();
        }
        TraceEvent::TranscriptReset { session_id: self.id.clone() }.emit();
        let _ = self.outbound.send(Outbound::Json(ServerMessage::Reset));
        self.greeting_sent.store(false, Ordering::Release);
        self.set_state(SessionState::Ready);
        self.emit_greeting();
    }

    /// Idempotent: abort inflight work, close upstreams, mark stopped. No
    /// frames are sent to the client after this returns.
    pub async fn stop(self: &Arc<Self>) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_chat_and_tts();
        self.await_tts_task().await;
        if let Some(stt) = self.stt.lock().take() {
            stt.close();
        }
        self.tts.close();
    }

    fn clear_stt(&self) {
        if let Some(stt) = self.stt.lock().as_ref() {
            stt.clear();
        }
    }

    fn cancel_chat_and_tts(&self) {
        self.chat_cancel.lock().cancel();
        self.tts_cancel.lock().cancel();
    }

    async fn await_tts_task(&self) {
        let handle = self.tts_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn emit_greeting(self: &Arc<Self>) {
        if self.greeting_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.outbound.send(Outbound::Json(ServerMessage::Greeting {
            text: self.agent.greeting.clone(),
        }));
        self.set_state(SessionState::Listening);
        self.relay_tts(self.agent.greeting.clone());
    }

    // Boxed because this function and `handle_stt_event` call each other
    // indirectly through `tokio::spawn` on STT disconnect; left as a plain
    // `async fn` the two would form a self-referential opaque type that the
    // compiler cannot prove `Send` for.
    fn connect_stt(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            match SttStream::connect(self.stt_config.clone(), self.stt_api_key.clone(), tx).await {
                Ok(handle) => {
                    *self.stt.lock() = Some(handle);
                    TraceEvent::SttConnected { session_id: self.id.clone() }.emit();
                    while let Some(event) = rx.recv().await {
                        self.handle_stt_event(event).await;
                    }
                }
                Err(e) => {
                    tracing::error!("STT connect failed: {e}");
                    let _ = self
                        .outbound
                        .send(Outbound::Json(ServerMessage::error(STT_CONNECT_FAILED)));
                }
            }
        })
    }

    async fn handle_stt_event(self: &Arc<Self>, event: SttEvent) {
        match event {
            SttEvent::Transcript { text, is_final } => {
                let _ = self
                    .outbound
                    .send(Outbound::Json(ServerMessage::Transcript { text, r#final: is_final }));
            }
            SttEvent::Turn { text } => {
                self.start_turn(text);
            }
            SttEvent::Error(message) => {
                tracing::warn!("STT error: {message}");
                let _ = self
                    .outbound
                    .send(Outbound::Json(ServerMessage::error(STT_DISCONNECTED)));
            }
            SttEvent::Closed => {
                *self.stt.lock() = None;
                TraceEvent::SttDisconnected { session_id: self.id.clone(), code: None }.emit();
                if !self.stopped.load(Ordering::Acquire) {
                    let session = Arc::clone(self);
                    tokio::spawn(async move {
                        TraceEvent::SttReconnected { session_id: session.id.clone(), attempt: 1 }
                            .emit();
                        session.connect_stt().await;
                    });
                }
            }
        }
    }

    fn start_turn(self: &Arc<Self>, text: String) {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run_turn_lifecycle(text).await });
    }

    async fn run_turn_lifecycle(self: &Arc<Self>, text: String) {
        self.cancel_chat_and_tts();
        self.await_tts_task().await;

        self.set_state(SessionState::Thinking);
        let _ = self
            .outbound
            .send(Outbound::Json(ServerMessage::Turn { text: text.clone() }));
        let _ = self.outbound.send(Outbound::Json(ServerMessage::Thinking));
        TraceEvent::TurnStarted { session_id: self.id.clone(), text_chars: text.chars().count() }
            .emit();

        let chat_cancel = CancelToken::new();
        *self.chat_cancel.lock() = chat_cancel.clone();

        let tool_definitions = self.agent.tool_definitions(&self.builtins);
        let turn_ctx = TurnContext {
            llm: self.llm.as_ref(),
            model: &self.model,
            max_tokens: self.max_tokens,
            max_tool_iterations: self.max_tool_iterations,
            tool_definitions,
            builtins: self.builtins.as_ref(),
            tools: self.tools.as_ref(),
            secrets: &self.secrets,
        };

        let started = std::time::Instant::now();
        let result = {
            let mut transcript = self.transcript.lock().await;
            run_turn(&mut transcript, &text, &turn_ctx, chat_cancel.clone()).await
        };

        match result {
            Ok(outcome) => {
                if chat_cancel.is_cancelled() {
                    return;
                }
                TraceEvent::TurnCompleted {
                    session_id: self.id.clone(),
                    steps: outcome.steps.len(),
                    tool_iterations: outcome.steps.len() as u32,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
                .emit();
                let _ = self.outbound.send(Outbound::Json(ServerMessage::Chat {
                    text: outcome.text.clone(),
                    steps: outcome.steps,
                }));
                if outcome.text.is_empty() {
                    let _ = self.outbound.send(Outbound::Json(ServerMessage::TtsDone));
                    self.set_state(SessionState::Listening);
                } else {
                    self.relay_tts(outcome.text);
                }
            }
            Err(_) if chat_cancel.is_cancelled() => {}
            Err(e) => {
                tracing::warn!("chat failed: {e}");
                let _ = self.outbound.send(Outbound::Json(ServerMessage::error(CHAT_FAILED)));
                self.set_state(SessionState::Error);
            }
        }
    }

    fn relay_tts(self: &Arc<Self>, text: String) {
        let tts_cancel = CancelToken::new();
        *self.tts_cancel.lock() = tts_cancel.clone();
        self.set_state(SessionState::Speaking);
        TraceEvent::TtsStarted {
            session_id: self.id.clone(),
            words: text.split_whitespace().count(),
        }
        .emit();

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
            let outbound = session.outbound.clone();
            let forward = tokio::spawn(async move {
                let mut chunks = 0usize;
                while let Some(bytes) = rx.recv().await {
                    chunks += 1;
                    let _ = outbound.send(Outbound::Binary(bytes));
                }
                chunks
            });

            let result = session.tts.synthesize(&text, tx, tts_cancel.clone()).await;
            let chunks = forward.await.unwrap_or(0);

            match result {
                Ok(()) => {
                    TraceEvent::TtsCompleted {
                        session_id: session.id.clone(),
                        chunks,
                        cancelled: tts_cancel.is_cancelled(),
                    }
                    .emit();
                    if !tts_cancel.is_cancelled() {
                        let _ = session.outbound.send(Outbound::Json(ServerMessage::TtsDone));
                    }
                }
                Err(e) => {
                    tracing::warn!("TTS failed: {e}");
                    let _ = session
                        .outbound
                        .send(Outbound::Json(ServerMessage::error(TTS_FAILED)));
                }
            }
            session.set_state(SessionState::Listening);
        });
        *self.tts_task.lock() = Some(handle);
    }

    fn set_state(&self, new: SessionState) {
        let mut state = self.state.lock();
        let valid = is_valid_transition(*state, new);
        TraceEvent::SessionStateChanged {
            session_id: self.id.clone(),
            from: format!("{:?}", *state),
            to: format!("{new:?}"),
            valid,
        }
        .emit();
        if !valid {
            tracing::debug!(session_id = %self.id, from = ?*state, to = ?new, "invalid session state transition");
        }
        *state = new;
    }
}

fn build_tool_executor(agent: &AgentConfig) -> ToolExecutor {
    let mut executor = ToolExecutor::new(HashMap::new());
    for tool in agent.user_tools.values() {
        executor.register(tool.definition.clone(), Arc::clone(&tool.handler));
    }
    executor
}
