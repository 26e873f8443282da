/// Shared error type used across all voxrelay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("speech recognition: {0}")]
    Stt(String),

    #[error("speech synthesis: {0}")]
    Tts(String),

    #[error("LLM gateway: {0}")]
    Llm(String),

    #[error("tool {name}: {message}")]
    Tool { name: String, message: String },

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
