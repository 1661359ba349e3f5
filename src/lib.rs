//! AttoClaw - Minimal tool-calling agent runtime with context compaction

pub mod agent;
pub mod config;
pub mod error;
pub mod providers;
pub mod session;
pub mod tools;

pub use agent::{Agent, Compactor, LimitTable, LoopGuard, ProgressCallback, TurnReport, TurnState};
pub use config::Config;
pub use error::{AttoError, Result};
pub use providers::{
    resolve_backend, BackendKind, ChatBackend, ChatOptions, ChatTurn, RenderedTools, StreamEvent,
    ToolProtocol,
};
pub use session::{Conversation, ConversationStore, ImageAttachment, Message, Role, ToolCall};
pub use tools::{EchoTool, Tool, ToolRegistry};
