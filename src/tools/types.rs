//! Tool types for AttoClaw
//!
//! This module defines the `Tool` trait that all tools implement, the
//! visibility category used for filtered registry views, and the tagged
//! outcome type that confines the string-based success/failure heuristic
//! to a single translation point.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Visibility category for a tool.
///
/// Always-visible tools are offered to the backend on every request.
/// Conditionally-visible tools are only offered when the agent is configured
/// to expose them (e.g. maintenance or debugging capabilities).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolVisibility {
    /// Offered on every request.
    Always,
    /// Offered only when conditional tools are enabled.
    Conditional,
}

/// Which slice of the registry a rendering covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolView {
    /// Always-visible and conditionally-visible tools.
    Full,
    /// Always-visible tools only.
    AlwaysOnly,
}

impl ToolView {
    /// Whether a tool with the given visibility is part of this view.
    pub fn includes(&self, visibility: ToolVisibility) -> bool {
        match self {
            ToolView::Full => true,
            ToolView::AlwaysOnly => visibility == ToolVisibility::Always,
        }
    }
}

/// Result strings that start with one of these mark a failed execution.
const FAILURE_PREFIXES: &[&str] = &["Unknown", "Failed", "Error", "rejected", "denied"];

/// Classification of a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The execution produced a usable result.
    Success,
    /// The result text matches the failure vocabulary.
    Failure,
}

/// A classified tool result.
///
/// Tools communicate both success and failure through their returned string;
/// this type tags the string once, at the registry boundary, so the rest of
/// the runtime can match on `kind` instead of re-inspecting text. The string
/// heuristic lives only in [`ToolOutcome::classify`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// The result text, fed back to the backend verbatim.
    pub text: String,
    /// Whether the text reads as a failure.
    pub kind: OutcomeKind,
}

impl ToolOutcome {
    /// Classify a raw result string using the fixed failure-prefix
    /// vocabulary: "Unknown", "Failed", "Error", "rejected", "denied", or
    /// any text containing "rejected:".
    pub fn classify(text: String) -> Self {
        let failed = FAILURE_PREFIXES.iter().any(|p| text.starts_with(p))
            || text.contains("rejected:");
        Self {
            text,
            kind: if failed {
                OutcomeKind::Failure
            } else {
                OutcomeKind::Success
            },
        }
    }

    /// Construct a success outcome without classification (used for the
    /// synthetic corrective result, which is not an error).
    pub fn success(text: String) -> Self {
        Self {
            text,
            kind: OutcomeKind::Success,
        }
    }

    /// Whether this outcome is a failure.
    pub fn is_failure(&self) -> bool {
        self.kind == OutcomeKind::Failure
    }
}

/// Trait that all tools must implement.
///
/// Tools are capabilities the backend can invoke: reading files, fetching
/// web pages, writing memory, running shell commands. The runtime treats
/// each executor as an opaque black box.
///
/// # Contract
///
/// `execute` must never panic and has no error channel: failures are encoded
/// in the returned string using the failure-prefix vocabulary (e.g.
/// `"Failed to open /tmp/x: permission denied"`). Each tool is responsible
/// for its own concurrency safety.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use attoclaw::tools::Tool;
///
/// struct UptimeTool;
///
/// #[async_trait]
/// impl Tool for UptimeTool {
///     fn name(&self) -> &str { "uptime" }
///     fn description(&self) -> &str { "Report how long the agent has been running" }
///     fn schema(&self) -> Value {
///         serde_json::json!({
///             "type": "object",
///             "properties": {},
///             "required": []
///         })
///     }
///     async fn execute(&self, _args: Value) -> String {
///         "up 3 minutes".to_string()
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    ///
    /// This name identifies the tool when the backend requests it. It must
    /// be unique within a registry; registering the same name twice
    /// overwrites the earlier entry.
    fn name(&self) -> &str;

    /// Get the tool description sent to the backend.
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    ///
    /// An object schema with named properties, each carrying a type and a
    /// description, plus a `required` list.
    fn schema(&self) -> Value;

    /// Visibility category for filtered registry views.
    ///
    /// Defaults to always-visible.
    fn visibility(&self) -> ToolVisibility {
        ToolVisibility::Always
    }

    /// Execute the tool with parsed arguments.
    ///
    /// Never fails: the returned string is the sole channel for both success
    /// and failure.
    async fn execute(&self, args: Value) -> String;
}
