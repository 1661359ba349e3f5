//! Stuck-cycle detection for tool dispatch.
//!
//! The backend occasionally gets stuck retrying the identical failing tool
//! call. The guard keeps a short window of dispatch fingerprints and, when
//! the whole window is one repeated call, substitutes a corrective result
//! instead of executing again.
//!
//! Fingerprints are exact-match over the tool name plus a bounded prefix of
//! the raw argument text. This is cheap and catches "retry the identical
//! failing call", at the cost of being defeated by argument reordering or
//! whitespace changes — a known limitation, not silently patched.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

/// How many consecutive identical dispatches count as a stuck cycle.
pub const STUCK_CYCLE_WINDOW: usize = 3;

/// How much of the raw argument text participates in the fingerprint.
const FINGERPRINT_ARG_CHARS: usize = 500;

/// The synthetic corrective result substituted for a stuck call.
///
/// Deliberately outside the failure-prefix vocabulary: a stuck cycle is a
/// course correction, not an execution error.
pub const STUCK_CYCLE_NOTICE: &str = "You have repeated the same tool call with identical \
arguments several times in a row. The call was not executed again. Use the results you \
already have, or try a different tool or different arguments.";

/// Detects stuck tool-call cycles.
///
/// One `LoopGuard` is injected per agent, so concurrent conversations with
/// separate agents cannot corrupt each other's detection window and tests
/// can instantiate isolated instances.
///
/// # Example
///
/// ```
/// use attoclaw::agent::LoopGuard;
///
/// let guard = LoopGuard::new();
/// assert!(!guard.check("echo", r#"{"text": "hi"}"#));
/// assert!(!guard.check("echo", r#"{"text": "hi"}"#));
/// // Third identical call trips the detector
/// assert!(guard.check("echo", r#"{"text": "hi"}"#));
/// // The window is cleared; the next call proceeds normally
/// assert!(!guard.check("echo", r#"{"text": "hi"}"#));
/// ```
#[derive(Debug, Default)]
pub struct LoopGuard {
    window: Mutex<VecDeque<String>>,
}

impl LoopGuard {
    /// Create a new guard with an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatch attempt and report whether it completes a stuck
    /// cycle.
    ///
    /// Returns `true` when the last [`STUCK_CYCLE_WINDOW`] dispatches were
    /// all this exact (name, argument-prefix) pair; the window is cleared in
    /// that case so the conversation gets a fresh start after the corrective
    /// result.
    pub fn check(&self, name: &str, raw_args: &str) -> bool {
        let fingerprint = Self::fingerprint(name, raw_args);

        let mut window = self.window.lock().expect("loop guard lock poisoned");
        window.push_back(fingerprint.clone());
        while window.len() > STUCK_CYCLE_WINDOW {
            window.pop_front();
        }

        let stuck = window.len() == STUCK_CYCLE_WINDOW && window.iter().all(|f| *f == fingerprint);
        if stuck {
            warn!(tool = name, "Stuck tool-call cycle detected, substituting corrective result");
            window.clear();
        }
        stuck
    }

    /// Clear the detection window.
    ///
    /// Called when the caller considers the conversation fresh (new
    /// conversation, or `invalidate_cache`).
    pub fn reset(&self) {
        let mut window = self.window.lock().expect("loop guard lock poisoned");
        window.clear();
    }

    fn fingerprint(name: &str, raw_args: &str) -> String {
        let prefix: String = raw_args.chars().take(FINGERPRINT_ARG_CHARS).collect();
        format!("{}:{}", name, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_identical_calls_trip() {
        let guard = LoopGuard::new();
        assert!(!guard.check("echo", "{}"));
        assert!(!guard.check("echo", "{}"));
        assert!(guard.check("echo", "{}"));
    }

    #[test]
    fn test_window_clears_after_trip() {
        let guard = LoopGuard::new();
        guard.check("echo", "{}");
        guard.check("echo", "{}");
        assert!(guard.check("echo", "{}"));

        // Needs three more identical calls to trip again
        assert!(!guard.check("echo", "{}"));
        assert!(!guard.check("echo", "{}"));
        assert!(guard.check("echo", "{}"));
    }

    #[test]
    fn test_different_args_break_the_cycle() {
        let guard = LoopGuard::new();
        assert!(!guard.check("echo", r#"{"text": "a"}"#));
        assert!(!guard.check("echo", r#"{"text": "a"}"#));
        assert!(!guard.check("echo", r#"{"text": "b"}"#));
        // Window is [a, a, b] — not stuck; two more b's are needed
        assert!(!guard.check("echo", r#"{"text": "b"}"#));
        assert!(guard.check("echo", r#"{"text": "b"}"#));
    }

    #[test]
    fn test_different_tool_breaks_the_cycle() {
        let guard = LoopGuard::new();
        assert!(!guard.check("echo", "{}"));
        assert!(!guard.check("echo", "{}"));
        assert!(!guard.check("fetch", "{}"));
    }

    #[test]
    fn test_args_beyond_prefix_are_ignored() {
        let guard = LoopGuard::new();
        let common = "x".repeat(500);
        // These differ only after the fingerprint cutoff
        let a = format!("{}AAA", common);
        let b = format!("{}BBB", common);
        assert!(!guard.check("echo", &a));
        assert!(!guard.check("echo", &b));
        assert!(guard.check("echo", &a));
    }

    #[test]
    fn test_reset_clears_window() {
        let guard = LoopGuard::new();
        guard.check("echo", "{}");
        guard.check("echo", "{}");
        guard.reset();
        assert!(!guard.check("echo", "{}"));
    }

    #[test]
    fn test_notice_is_not_in_failure_vocabulary() {
        use crate::tools::ToolOutcome;
        let outcome = ToolOutcome::classify(STUCK_CYCLE_NOTICE.to_string());
        assert!(!outcome.is_failure());
    }
}
