//! Shared application state handed to every axum handler: the provider
//! clients, the pre-configured agent, and the registry of live sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use vg_domain::config::PlatformConfig;
use vg_providers::LlmProvider;

use crate::agent::AgentConfig;
use crate::runtime::BuiltinToolExecutor;
use crate::session::{Session, SessionDeps};

#[derive(Clone)]
pub struct AppState {
    pub platform: PlatformConfig,
    pub llm: Arc<dyn LlmProvider>,
    pub builtins: Arc<BuiltinToolExecutor>,
    pub agent: AgentConfig,
    pub stt_api_key: Arc<str>,
    pub tts_api_key: Arc<str>,
    pub sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl AppState {
    pub fn new(
        platform: PlatformConfig,
        llm: Arc<dyn LlmProvider>,
        builtins: Arc<BuiltinToolExecutor>,
        agent: AgentConfig,
        stt_api_key: String,
        tts_api_key: String,
    ) -> Self {
        Self {
            platform,
            llm,
            builtins,
            agent,
            stt_api_key: stt_api_key.into(),
            tts_api_key: tts_api_key.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build a fresh session id and the dependency bundle a new `Session`
    /// needs; the agent configuration is cloned per session since it's
    /// immutable and cheap (shared `Arc`s for tool handlers).
    pub fn new_session_deps(&self) -> (String, SessionDeps) {
        let id = Uuid::new_v4().to_string();
        let deps = SessionDeps {
            llm: Arc::clone(&self.llm),
            builtins: Arc::clone(&self.builtins),
            agent: self.agent.clone(),
            platform: self.platform.clone(),
            stt_api_key: self.stt_api_key.to_string(),
            tts_api_key: self.tts_api_key.to_string(),
        };
        (id, deps)
    }

    pub fn insert_session(&self, id: String, session: Arc<Session>) {
        self.sessions.lock().insert(id, session);
    }

    pub fn remove_session(&self, id: &str) {
        self.sessions.lock().remove(id);
    }
}
