//! Context compaction for conversation history.
//!
//! Rewrites a long history into `{prefix, one checkpoint message, recent
//! suffix}`. The prefix (system prompt + original request) and the most
//! recent messages survive verbatim; everything between is summarized by one
//! extra backend call over a serialized transcript.
//!
//! Compaction is best-effort: any failure — transport error, empty summary —
//! returns the original history unchanged. The turn continues and may hit
//! the hard context limit on the next call, which then surfaces as an
//! ordinary transport failure.

use tracing::{debug, warn};

use crate::providers::{complete, ChatBackend, ChatOptions, RenderedTools};
use crate::session::{Message, Role};

/// Default number of recent messages kept verbatim.
pub const DEFAULT_KEEP_RECENT: usize = 4;

/// Messages preserved at the head of the history: the system prompt and the
/// original user request.
const PREFIX_LEN: usize = 2;

/// A serialized message longer than this is truncated in the transcript.
const MAX_SERIALIZED_MESSAGE_CHARS: usize = 5000;

/// How much tool-call argument text appears in the transcript.
const ARG_PREVIEW_CHARS: usize = 120;

/// Marker prefix on the synthetic message that replaces the middle slice.
pub const CHECKPOINT_HEADER: &str = "CONTEXT CHECKPOINT";

/// The fixed instruction sent with the serialized transcript.
const SUMMARY_INSTRUCTION: &str = "The conversation transcript below must be compressed to \
free up context space. Write a summary with exactly these five sections:\n\
\n\
## Goal\nWhat the user is trying to accomplish.\n\
## Progress\nWhat has been done so far.\n\
## Key Findings\nImportant information discovered along the way.\n\
## Current State\nWhere things stand right now.\n\
## Open Issues\nUnresolved problems and remaining work.\n\
\n\
Preserve file paths, command outputs, error messages, and decisions verbatim where \
feasible. Everything not in your summary will be forgotten.\n\
\n\
Transcript:\n";

/// Rewrites message histories to stay under a context budget.
///
/// # Example
///
/// ```rust,ignore
/// use attoclaw::agent::Compactor;
///
/// let compactor = Compactor::new();
/// let rewritten = compactor.compact(messages, backend.as_ref(), "claude-sonnet-4-5").await;
/// ```
pub struct Compactor {
    keep_recent: usize,
}

impl Compactor {
    /// Create a compactor keeping [`DEFAULT_KEEP_RECENT`] recent messages.
    pub fn new() -> Self {
        Self {
            keep_recent: DEFAULT_KEEP_RECENT,
        }
    }

    /// Create a compactor with a custom recent-message count.
    pub fn with_keep_recent(keep_recent: usize) -> Self {
        Self { keep_recent }
    }

    /// The minimum history length at which compaction does anything.
    pub fn min_messages(&self) -> usize {
        self.keep_recent + 4
    }

    /// Rewrite the history, summarizing the middle slice through one
    /// backend call.
    ///
    /// No-ops (returning the input unchanged) when the history is too short
    /// to partition, and on any failure of the summary call.
    pub async fn compact(
        &self,
        messages: Vec<Message>,
        backend: &dyn ChatBackend,
        model: &str,
    ) -> Vec<Message> {
        if messages.len() < self.min_messages() {
            return messages;
        }

        let middle_len = messages.len() - PREFIX_LEN - self.keep_recent;
        if middle_len < 2 {
            return messages;
        }

        let middle = &messages[PREFIX_LEN..PREFIX_LEN + middle_len];
        let transcript = serialize_transcript(middle);

        let request = vec![Message::user(&format!(
            "{}{}",
            SUMMARY_INSTRUCTION, transcript
        ))];
        let options = ChatOptions::new().with_max_tokens(2048);

        let summary = match complete(backend, request, RenderedTools::None, model, options).await {
            Ok(turn) if !turn.content.trim().is_empty() => turn.content,
            Ok(_) => {
                warn!("Compaction summary came back empty, keeping original history");
                return messages;
            }
            Err(e) => {
                warn!(error = %e, "Compaction call failed, keeping original history");
                return messages;
            }
        };

        let checkpoint = Message::system(&format!(
            "{} — summary of {} earlier messages:\n\n{}",
            CHECKPOINT_HEADER, middle_len, summary
        ));

        let mut rewritten = Vec::with_capacity(PREFIX_LEN + 1 + self.keep_recent);
        rewritten.extend_from_slice(&messages[..PREFIX_LEN]);
        rewritten.push(checkpoint);
        rewritten.extend_from_slice(&messages[messages.len() - self.keep_recent..]);

        debug!(
            before = messages.len(),
            after = rewritten.len(),
            "Compacted conversation history"
        );
        rewritten
    }
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize messages as `[ROLE]: content` lines for the summary prompt.
///
/// Tool calls render as `→ name(args)` with the argument text truncated;
/// any single message over [`MAX_SERIALIZED_MESSAGE_CHARS`] is cut with an
/// inline marker.
pub(crate) fn serialize_transcript(messages: &[Message]) -> String {
    let mut transcript = String::new();
    for msg in messages {
        let role = match msg.role {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::Tool => "TOOL",
        };

        let mut line = format!("[{}]: {}", role, msg.content);
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                let args: String = call.arguments.chars().take(ARG_PREVIEW_CHARS).collect();
                line.push_str(&format!("\n  → {}({})", call.name, args));
            }
        }

        if line.chars().count() > MAX_SERIALIZED_MESSAGE_CHARS {
            let truncated: String = line.chars().take(MAX_SERIALIZED_MESSAGE_CHARS).collect();
            line = format!("{}\n  [... truncated ...]", truncated);
        }

        transcript.push_str(&line);
        transcript.push('\n');
    }
    transcript
}
