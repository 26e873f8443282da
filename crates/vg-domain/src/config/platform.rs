use serde::{Deserialize, Serialize};

/// Everything needed to reach the three upstream providers: STT, TTS, and the
/// LLM chat-completion gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub llm: LlmGatewayConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            llm: LlmGatewayConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_stt_base_url")]
    pub base_url: String,
    /// Environment variable holding the STT API key.
    #[serde(default = "d_stt_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "d_speech_model")]
    pub speech_model: String,
    /// Ephemeral token lifetime, in seconds.
    #[serde(default = "d_token_ttl")]
    pub token_ttl_secs: u64,
    /// Fraction of `token_ttl_secs` at which a background refresh is scheduled.
    #[serde(default = "d_refresh_fraction")]
    pub refresh_at_fraction: f32,
    #[serde(default = "d_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "d_eot_confidence")]
    pub min_end_of_turn_silence_when_confident: u32,
    #[serde(default = "d_max_turn_silence")]
    pub max_turn_silence: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: d_stt_base_url(),
            api_key_env: d_stt_api_key_env(),
            sample_rate: d_sample_rate(),
            speech_model: d_speech_model(),
            token_ttl_secs: d_token_ttl(),
            refresh_at_fraction: d_refresh_fraction(),
            connect_timeout_secs: d_connect_timeout(),
            min_end_of_turn_silence_when_confident: d_eot_confidence(),
            max_turn_silence: d_max_turn_silence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_tts_base_url")]
    pub base_url: String,
    #[serde(default = "d_tts_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_voice")]
    pub voice: String,
    #[serde(default = "d_tts_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "d_tts_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_buffer_size")]
    pub buffer_size: u32,
    #[serde(default = "d_repetition_penalty")]
    pub repetition_penalty: f32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_top_p")]
    pub top_p: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: d_tts_base_url(),
            api_key_env: d_tts_api_key_env(),
            voice: d_voice(),
            sample_rate: d_tts_sample_rate(),
            max_tokens: d_tts_max_tokens(),
            buffer_size: d_buffer_size(),
            repetition_penalty: d_repetition_penalty(),
            temperature: d_temperature(),
            top_p: d_top_p(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmGatewayConfig {
    #[serde(default = "d_llm_base_url")]
    pub base_url: String,
    #[serde(default = "d_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model")]
    pub default_model: String,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_max_tool_iterations")]
    pub max_tool_iterations: u32,
}

impl Default for LlmGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base_url(),
            api_key_env: d_llm_api_key_env(),
            default_model: d_model(),
            max_tokens: d_max_tokens(),
            max_tool_iterations: d_max_tool_iterations(),
        }
    }
}

fn d_stt_base_url() -> String {
    "https://streaming.assemblyai.com".into()
}
fn d_stt_api_key_env() -> String {
    "STT_API_KEY".into()
}
fn d_sample_rate() -> u32 {
    16_000
}
fn d_speech_model() -> String {
    "universal-streaming".into()
}
fn d_token_ttl() -> u64 {
    480
}
fn d_refresh_fraction() -> f32 {
    0.8
}
fn d_connect_timeout() -> u64 {
    10
}
fn d_eot_confidence() -> u32 {
    400
}
fn d_max_turn_silence() -> u32 {
    1200
}

fn d_tts_base_url() -> String {
    "wss://api.tts.example.com/v1/stream".into()
}
fn d_tts_api_key_env() -> String {
    "TTS_API_KEY".into()
}
fn d_voice() -> String {
    "default".into()
}
fn d_tts_sample_rate() -> u32 {
    24_000
}
fn d_tts_max_tokens() -> u32 {
    4096
}
fn d_buffer_size() -> u32 {
    1024
}
fn d_repetition_penalty() -> f32 {
    1.0
}
fn d_temperature() -> f32 {
    0.7
}
fn d_top_p() -> f32 {
    0.9
}

fn d_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_llm_api_key_env() -> String {
    "LLM_API_KEY".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_max_tokens() -> u32 {
    300
}
fn d_max_tool_iterations() -> u32 {
    3
}
