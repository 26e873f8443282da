//! Shared types for the voice-agent gateway: configuration, the error
//! taxonomy, the conversation transcript, tool schemas, and structured
//! trace events. Every other crate in the workspace depends on this one.

pub mod cancel;
pub mod config;
pub mod error;
pub mod tool;
pub mod trace;
pub mod transcript;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Error, Result};
pub use trace::TraceEvent;
pub use transcript::{Message, Role, Transcript};
