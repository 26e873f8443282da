//! Runtime building blocks shared by the session orchestrator: the built-in
//! tool registry (C1's in-process counterpart for web/search-style tools)
//! and the turn executor (C5).

pub mod tools;
pub mod turn;

pub use tools::{BuiltinTool, BuiltinToolContext, BuiltinToolExecutor};
pub use turn::{run_turn, TurnContext, TurnOutcome};
