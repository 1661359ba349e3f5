//! System prompt handling and progress-text sanitation.
//!
//! The system prompt can come from a file so operators can edit it without
//! rebuilding; it is cached after the first load and refreshed when the
//! agent's `invalidate_cache` is called.

use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::warn;

/// Default system prompt when no prompt file is configured.
const DEFAULT_SYSTEM_PROMPT: &str = r#"You are AttoClaw, a minimal tool-calling AI assistant.

You have access to tools to help accomplish tasks. Use them when needed.

Be concise but helpful. Focus on completing the user's request efficiently."#;

/// Supplies the system prompt for new turns, caching file loads.
pub struct ContextBuilder {
    prompt_path: Option<PathBuf>,
    cached: RwLock<Option<String>>,
}

impl ContextBuilder {
    /// Create a builder using the built-in default prompt.
    pub fn new() -> Self {
        Self {
            prompt_path: None,
            cached: RwLock::new(None),
        }
    }

    /// Create a builder that loads the prompt from a file.
    ///
    /// Falls back to the default prompt (with a logged warning) when the
    /// file cannot be read.
    pub fn with_prompt_path(path: PathBuf) -> Self {
        Self {
            prompt_path: Some(path),
            cached: RwLock::new(None),
        }
    }

    /// Get the system prompt, loading and caching it on first use.
    pub async fn system_prompt(&self) -> String {
        {
            let cached = self.cached.read().await;
            if let Some(prompt) = cached.as_ref() {
                return prompt.clone();
            }
        }

        let prompt = match &self.prompt_path {
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to read system prompt file, using default");
                    DEFAULT_SYSTEM_PROMPT.to_string()
                }
            },
            None => DEFAULT_SYSTEM_PROMPT.to_string(),
        };

        let mut cached = self.cached.write().await;
        *cached = Some(prompt.clone());
        prompt
    }

    /// Drop the cached prompt so the next call reloads it.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sanitize accumulated streamed text for the progress callback.
///
/// Strips complete `<thinking>…</thinking>` blocks and any unterminated
/// `<thinking>` tail still being streamed, so partial reasoning never
/// reaches the caller.
pub fn sanitize_progress(text: &str) -> String {
    const OPEN: &str = "<thinking>";
    const CLOSE: &str = "</thinking>";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find(OPEN) {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find(CLOSE) {
                    Some(end) => rest = &rest[start + end + CLOSE.len()..],
                    // Unterminated segment: drop everything from the tag on
                    None => break,
                }
            }
        }
    }
    out
}
