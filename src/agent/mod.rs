//! Agent module - Turn loop, loop guard, context budget, and compaction
//!
//! This module provides the core turn machinery for AttoClaw. The agent is
//! responsible for:
//!
//! - Driving the send / execute-tools / repeat cycle against one backend
//! - Detecting stuck tool-call cycles and substituting corrective results
//! - Keeping token usage under the active model's context budget by
//!   compacting history
//! - Streaming progress to the caller while a response is generated
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Transport  │────>│    Agent    │────>│  ChatBackend │
//! │ (excluded)  │     │  turn loop  │     │ (streaming)  │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                        │       │
//!                        ▼       ▼
//!                 ┌───────────┐ ┌───────────┐
//!                 │ LoopGuard │ │   Tool    │
//!                 │           │ │ Registry  │
//!                 └───────────┘ └───────────┘
//! ```

pub mod budget;
pub mod compaction;
mod context;
mod guard;
mod r#loop;

pub use budget::{estimate_tokens, LimitTable, ModelLimits};
pub use compaction::{Compactor, CHECKPOINT_HEADER, DEFAULT_KEEP_RECENT};
pub use context::{sanitize_progress, ContextBuilder};
pub use guard::{LoopGuard, STUCK_CYCLE_NOTICE, STUCK_CYCLE_WINDOW};
pub use r#loop::{
    Agent, ProgressCallback, TurnReport, TurnState, CEILING_FALLBACK_REPLY,
    DEFAULT_MAX_TOOL_TURNS, TRANSPORT_FAILURE_REPLY,
};
