//! Agent configuration (§3 Data model, §4.6 system prompt construction).
//!
//! Loading agent bundles/manifests from a multi-agent store is out of
//! scope here (see spec §1); this module only carries the immutable,
//! already-resolved configuration for the one agent a session runs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use vg_domain::tool::{ToolDefinition, FINAL_ANSWER_TOOL};
use vg_tools::ToolHandler;

/// A user-defined tool: its LLM-facing schema plus the handler that runs it.
pub struct UserTool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

/// Immutable per-session agent configuration (§3 "Agent configuration").
#[derive(Clone)]
pub struct AgentConfig {
    pub name: String,
    pub instructions: String,
    pub greeting: String,
    pub voice: String,
    /// Optional bias text passed to the STT provider as `prompt=`.
    pub stt_prompt: Option<String>,
    pub enabled_builtins: Vec<String>,
    pub user_tools: Arc<HashMap<String, Arc<UserTool>>>,
}

/// The platform-wide default instructions every agent's system prompt opens
/// with, before the agent-specific suffix.
const DEFAULT_INSTRUCTIONS: &str =
    "You are a helpful voice assistant speaking with a user over a live audio call.";

/// Reminder appended only when at least one tool (user-defined or built-in)
/// is available: mandates the use of `final_answer` to end every turn.
const TOOL_USAGE_REMINDER: &str = "\n\nYou have tools available. When you are ready to speak to \
the user, you MUST call the `final_answer` tool with your response as the `answer` argument — \
never answer in plain text while tools are available.";

/// Forbids markdown, lists, code blocks, and any mention of tools/search in
/// spoken output, since every word is sent straight to a TTS engine.
const VOICE_RULES: &str = "\n\nSpeak naturally, as if talking out loud. Never use markdown, \
bullet points, numbered lists, or code blocks. Never mention tools, searches, or anything about \
how you produced your answer — just speak the answer itself.";

impl AgentConfig {
    /// Build the complete list of tool schemas offered to the LLM: the
    /// user-defined set union the enabled built-ins union the mandatory
    /// `final_answer` schema (§3 "Tool schema").
    pub fn tool_definitions(&self, builtins: &crate::runtime::tools::BuiltinToolExecutor) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .user_tools
            .values()
            .map(|t| t.definition.clone())
            .collect();

        for name in &self.enabled_builtins {
            if builtins.has_tool(name) {
                if let Some(def) = builtins.definition(name) {
                    defs.push(def);
                }
            }
        }

        if !defs.is_empty() {
            defs.push(ToolDefinition::final_answer());
        }

        defs
    }

    pub fn has_any_tools(&self, builtins: &crate::runtime::tools::BuiltinToolExecutor) -> bool {
        !self.user_tools.is_empty()
            || self
                .enabled_builtins
                .iter()
                .any(|n| builtins.has_tool(n))
    }

    /// Concatenate default instructions, the agent-specific suffix, the tool
    /// reminder (only when tools exist), and the fixed voice rules.
    pub fn system_prompt(&self, builtins: &crate::runtime::tools::BuiltinToolExecutor) -> String {
        let mut prompt = String::new();
        prompt.push_str(DEFAULT_INSTRUCTIONS);
        if !self.instructions.is_empty() {
            prompt.push('\n');
            prompt.push('\n');
            prompt.push_str(&self.instructions);
        }
        if self.has_any_tools(builtins) {
            prompt.push_str(TOOL_USAGE_REMINDER);
        }
        prompt.push_str(VOICE_RULES);
        prompt
    }

    /// A minimal default agent, used when no agent-specific configuration
    /// is supplied. Carries no tools beyond what the caller registers.
    pub fn default_agent() -> Self {
        Self {
            name: "default".into(),
            instructions: String::new(),
            greeting: "Hey there. I'm a voice assistant. What can I help you with?".into(),
            voice: "default".into(),
            stt_prompt: None,
            enabled_builtins: Vec::new(),
            user_tools: Arc::new(HashMap::new()),
        }
    }
}

/// On-disk/env-carried shape an agent bundle would be deserialized from. Out
/// of scope is the bundle/manifest discovery that produces this; only the
/// shape of an already-resolved agent is in scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentManifest {
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    pub greeting: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default)]
    pub stt_prompt: Option<String>,
    #[serde(default)]
    pub enabled_builtins: Vec<String>,
}

fn default_voice() -> String {
    "default".into()
}

impl From<AgentManifest> for AgentConfig {
    fn from(m: AgentManifest) -> Self {
        Self {
            name: m.name,
            instructions: m.instructions,
            greeting: m.greeting,
            voice: m.voice,
            stt_prompt: m.stt_prompt,
            enabled_builtins: m.enabled_builtins,
            user_tools: Arc::new(HashMap::new()),
        }
    }
}

impl crate::runtime::tools::BuiltinToolExecutor {
    /// Schema lookup for an enabled built-in, paired with [`has_tool`]/[`dispatch`].
    pub fn definition(&self, _name: &str) -> Option<ToolDefinition> {
        // The registry this ships with is empty (see module docs); a real
        // deployment registering built-ins also registers their schemas
        // through the same call that calls `register`.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tools::BuiltinToolExecutor;

    #[test]
    fn default_agent_has_no_tools_and_a_voice_only_prompt() {
        let agent = AgentConfig::default_agent();
        let builtins = BuiltinToolExecutor::new();
        assert!(!agent.has_any_tools(&builtins));
        let prompt = agent.system_prompt(&builtins);
        assert!(prompt.contains("Never use markdown"));
        assert!(!prompt.contains("final_answer"));
    }

    #[test]
    fn tool_reminder_only_appears_when_tools_are_enabled() {
        let mut agent = AgentConfig::default_agent();
        agent.enabled_builtins.push("web_search".into());
        let mut builtins = BuiltinToolExecutor::new();

        struct Noop;
        #[async_trait::async_trait]
        impl crate::runtime::tools::BuiltinTool for Noop {
            async fn call(
                &self,
                args: serde_json::Value,
                _ctx: &crate::runtime::tools::BuiltinToolContext,
            ) -> Result<serde_json::Value, String> {
                Ok(args)
            }
        }
        builtins.register("web_search", std::sync::Arc::new(Noop));

        let prompt = agent.system_prompt(&builtins);
        assert!(prompt.contains("final_answer"));
    }
}
