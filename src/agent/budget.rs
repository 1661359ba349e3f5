//! Token estimation and per-model context budgets.
//!
//! Estimation is a conservative character ratio, not a real tokenizer: it
//! over-counts so compaction triggers early, which is the safe direction.
//! The limit table maps model identifiers to context-window sizes with a
//! default fallback for models it has never heard of.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::session::Message;

/// Conservative characters-per-token ratio used for estimation.
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Fraction of the context window at which compaction triggers, leaving
/// headroom for the compaction call itself plus continued tool use.
pub const COMPACT_TRIGGER_RATIO: f64 = 0.7;

/// Flat per-message token overhead (role framing, separators).
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Context window applied to models absent from the table.
const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Built-in context windows by model-identifier prefix.
///
/// Longest matching prefix wins; config can override per exact model id.
static BUILTIN_WINDOWS: Lazy<Vec<(&'static str, usize)>> = Lazy::new(|| {
    vec![
        ("claude-opus-4", 200_000),
        ("claude-sonnet-4", 200_000),
        ("claude-haiku-4", 200_000),
        ("claude-3", 200_000),
        ("gpt-4.1", 1_000_000),
        ("gpt-4o-mini", 128_000),
        ("gpt-4o", 128_000),
        ("o3", 200_000),
        ("o4-mini", 200_000),
    ]
});

/// Estimate the token count of one message.
///
/// Counts content characters plus tool-call name and argument characters,
/// then adds a flat per-message overhead. The overhead makes the estimate
/// strictly monotonic: appending any message increases it.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut chars = message.content.chars().count();
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            chars += call.name.chars().count() + call.arguments.chars().count();
        }
    }
    (chars as f64 / CHARS_PER_TOKEN).ceil() as usize + MESSAGE_OVERHEAD_TOKENS
}

/// Estimate the token count of a message list.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Context budget for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    /// Total context-window size in tokens.
    pub context_window: usize,
    /// Estimated token count at which compaction runs.
    pub compact_threshold: usize,
}

impl ModelLimits {
    /// Derive limits from a context-window size; the threshold is
    /// `floor(window × 0.7)`.
    pub fn with_window(context_window: usize) -> Self {
        Self {
            context_window,
            compact_threshold: (context_window as f64 * COMPACT_TRIGGER_RATIO).floor() as usize,
        }
    }
}

/// Maps model identifiers to their context budgets.
///
/// Lookup order: exact override, longest built-in prefix, default fallback.
#[derive(Debug, Clone)]
pub struct LimitTable {
    overrides: HashMap<String, ModelLimits>,
    fallback: ModelLimits,
}

impl LimitTable {
    /// Create a table with the built-in model families and the default
    /// fallback.
    pub fn builtin() -> Self {
        Self {
            overrides: HashMap::new(),
            fallback: ModelLimits::with_window(DEFAULT_CONTEXT_WINDOW),
        }
    }

    /// Override (or add) the context window for an exact model identifier.
    pub fn set_window(&mut self, model: &str, context_window: usize) {
        self.overrides
            .insert(model.to_string(), ModelLimits::with_window(context_window));
    }

    /// Look up the limits for a model identifier.
    pub fn for_model(&self, model: &str) -> ModelLimits {
        if let Some(limits) = self.overrides.get(model) {
            return *limits;
        }

        BUILTIN_WINDOWS
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, window)| ModelLimits::with_window(*window))
            .unwrap_or(self.fallback)
    }
}

impl Default for LimitTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCall;

    #[test]
    fn test_estimate_counts_content() {
        // 35 chars / 3.5 = 10 tokens + 4 overhead
        let msg = Message::user(&"x".repeat(35));
        assert_eq!(estimate_message_tokens(&msg), 14);
    }

    #[test]
    fn test_estimate_rounds_up() {
        // 1 char → ceil(1/3.5) = 1 token + overhead
        let msg = Message::user("x");
        assert_eq!(estimate_message_tokens(&msg), 5);
    }

    #[test]
    fn test_estimate_includes_tool_call_arguments() {
        let plain = Message::assistant("running");
        let with_call = Message::assistant_with_tools(
            "running",
            vec![ToolCall::new("call_1", "echo", r#"{"text": "0123456789"}"#)],
        );
        assert!(estimate_message_tokens(&with_call) > estimate_message_tokens(&plain));
    }

    #[test]
    fn test_estimate_strictly_monotonic_on_append() {
        let mut messages = vec![Message::user("hello there")];
        let before = estimate_tokens(&messages);
        messages.push(Message::assistant("x"));
        let after = estimate_tokens(&messages);
        assert!(after > before);
    }

    #[test]
    fn test_threshold_is_floor_of_seventy_percent() {
        let limits = ModelLimits::with_window(100_000);
        assert_eq!(limits.compact_threshold, 70_000);

        // 1001 * 0.7 = 700.7 → floor
        let odd = ModelLimits::with_window(1001);
        assert_eq!(odd.compact_threshold, 700);
    }

    #[test]
    fn test_table_builtin_prefix_lookup() {
        let table = LimitTable::builtin();
        assert_eq!(
            table.for_model("claude-sonnet-4-5-20250929").context_window,
            200_000
        );
        assert_eq!(table.for_model("gpt-4o-2024-08-06").context_window, 128_000);
        assert_eq!(table.for_model("gpt-4.1-mini").context_window, 1_000_000);
    }

    #[test]
    fn test_table_longest_prefix_wins() {
        let table = LimitTable::builtin();
        // "gpt-4o-mini" must match its own entry, not the shorter "gpt-4o"
        assert_eq!(table.for_model("gpt-4o-mini").context_window, 128_000);
    }

    #[test]
    fn test_table_default_fallback() {
        let table = LimitTable::builtin();
        assert_eq!(
            table.for_model("some-unheard-of-model").context_window,
            DEFAULT_CONTEXT_WINDOW
        );
    }

    #[test]
    fn test_table_override_beats_builtin() {
        let mut table = LimitTable::builtin();
        table.set_window("claude-sonnet-4-5-20250929", 50_000);
        assert_eq!(
            table.for_model("claude-sonnet-4-5-20250929").context_window,
            50_000
        );
        assert_eq!(
            table.for_model("claude-sonnet-4-5-20250929").compact_threshold,
            35_000
        );
        // Other sonnet models still use the built-in entry
        assert_eq!(table.for_model("claude-sonnet-4-0").context_window, 200_000);
    }
}
