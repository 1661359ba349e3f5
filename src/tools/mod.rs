//! Tools module - Tool trait, registry, and dual-format rendering
//!
//! Tools are the capabilities the backend can invoke during a turn
//! sequence. This module provides:
//!
//! - The `Tool` trait all tools implement (string-in/string-out executors
//!   that never fail)
//! - The `ToolRegistry`, the single source of truth rendered into both
//!   backend wire formats
//! - `TypedToolHandle`, the wrapped execution path for the typed-schema
//!   protocol
//! - `ToolOutcome`, the tagged success/failure classification
//!
//! Concrete tool implementations (file I/O, web fetch, remote memory, shell)
//! live with their owners; this crate ships only `EchoTool`.

mod echo;
mod registry;
mod types;

pub use echo::EchoTool;
pub use registry::{ToolRegistry, TypedToolHandle};
pub use types::{OutcomeKind, Tool, ToolOutcome, ToolView, ToolVisibility};
