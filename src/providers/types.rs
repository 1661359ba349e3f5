//! Backend types for AttoClaw
//!
//! This module defines the core types and traits for LLM backends: the
//! `ChatBackend` trait, chat options, streamed response events, the two
//! wire-level tool descriptor shapes, and the accumulator that reassembles
//! a streamed response into a runnable turn.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{AttoError, Result};
use crate::session::{Message, ToolCall};

/// Which tool-invocation protocol a backend speaks.
///
/// The two backend families use structurally different descriptor wrappers
/// and execution paths; the tool registry renders its single table into
/// either shape on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolProtocol {
    /// Typed-schema descriptors (`{name, description, input_schema}`);
    /// execution goes through wrapped handles that surface an error flag.
    Typed,
    /// JSON-Schema function-calling descriptors
    /// (`{"type": "function", "function": {...}}`); execution goes through
    /// `ToolRegistry::dispatch`.
    Functions,
}

/// A tool descriptor in the typed-schema wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct TypedToolSpec {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for tool parameters
    pub input_schema: serde_json::Value,
}

/// A tool descriptor in the function-calling wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionToolSpec {
    /// Always "function"
    #[serde(rename = "type")]
    pub kind: String,
    /// The function definition
    pub function: FunctionDef,
}

/// The function definition inside a [`FunctionToolSpec`].
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// JSON Schema for function parameters
    pub parameters: serde_json::Value,
}

/// Tool descriptors rendered for a specific protocol.
///
/// Produced by `ToolRegistry::render`; consumed by the matching backend.
/// A backend handed the wrong variant rejects the request rather than
/// guessing at a conversion.
#[derive(Debug, Clone)]
pub enum RenderedTools {
    /// No tools offered for this request
    None,
    /// Typed-schema descriptors
    Typed(Vec<TypedToolSpec>),
    /// Function-calling descriptors
    Functions(Vec<FunctionToolSpec>),
}

impl RenderedTools {
    /// Check whether any descriptors are present.
    pub fn is_empty(&self) -> bool {
        match self {
            RenderedTools::None => true,
            RenderedTools::Typed(t) => t.is_empty(),
            RenderedTools::Functions(f) => f.is_empty(),
        }
    }

    /// Number of descriptors present.
    pub fn len(&self) -> usize {
        match self {
            RenderedTools::None => 0,
            RenderedTools::Typed(t) => t.len(),
            RenderedTools::Functions(f) => f.len(),
        }
    }
}

/// Trait for LLM backends (Anthropic, OpenAI-compatible, etc.).
///
/// Implement this trait to add support for a new backend. The backend is
/// responsible for translating between AttoClaw's message format and the
/// wire format, and for turning the response body into a stream of
/// [`StreamEvent`]s.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a chat request and stream back the response.
    ///
    /// # Arguments
    /// * `messages` - The conversation history
    /// * `tools` - Tool descriptors rendered for this backend's protocol
    /// * `model` - Model identifier to use
    /// * `options` - Additional options like temperature and max_tokens
    ///
    /// # Returns
    /// A channel of [`StreamEvent`]s ending in `Done` (or `Error`).
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: RenderedTools,
        model: &str,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>>;

    /// The tool-invocation protocol this backend speaks.
    fn protocol(&self) -> ToolProtocol;

    /// Get the default model for this backend.
    fn default_model(&self) -> &str;

    /// Get the backend name (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Whether this backend accepts image attachments on user messages.
    fn supports_images(&self) -> bool {
        false
    }
}

/// Options for chat requests.
///
/// Use the builder pattern to construct options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature for sampling (0.0 = deterministic, 1.0 = creative)
    pub temperature: Option<f32>,
}

impl ChatOptions {
    /// Create new default chat options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature for sampling.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// One event in a streamed backend response.
///
/// Tool-call fragments may arrive across multiple events; they carry the
/// call index so the accumulator can reassemble them before execution.
#[derive(Debug)]
pub enum StreamEvent {
    /// A fragment of assistant text
    TextDelta(String),
    /// A fragment of a tool call, keyed by call index
    ToolCallDelta {
        /// Position of this call within the response
        index: usize,
        /// Call id, present on the first fragment
        id: Option<String>,
        /// Tool name, present on the first fragment
        name: Option<String>,
        /// A fragment of the JSON argument text
        args_fragment: String,
    },
    /// Terminal event: the response is complete
    Done {
        /// Token usage, when the backend reported it
        usage: Option<Usage>,
    },
    /// Terminal event: the stream failed
    Error(AttoError),
}

/// Token usage information from a chat request.
#[derive(Debug, Clone)]
pub struct Usage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used (prompt + completion)
    pub total_tokens: u32,
}

impl Usage {
    /// Create new usage information.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A fully reassembled backend response.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// Text content of the response
    pub content: String,
    /// Tool calls requested by the backend (if any)
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information (if available)
    pub usage: Option<Usage>,
}

impl ChatTurn {
    /// Check if this turn contains any tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Partial tool call being reassembled from streamed fragments.
#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Reassembles a stream of [`StreamEvent`]s into a [`ChatTurn`].
///
/// Text deltas are concatenated in order; tool-call fragments are merged by
/// call index (id and name come from the first fragment that carries them,
/// argument text is concatenated). The caller drives events through
/// [`StreamAccumulator::apply`] and finishes with
/// [`StreamAccumulator::finish`] once `apply` reports the terminal event.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    calls: BTreeMap<usize, PartialCall>,
    usage: Option<Usage>,
    error: Option<AttoError>,
}

impl StreamAccumulator {
    /// Create a new empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stream event. Returns `true` when the stream is finished
    /// (either `Done` or `Error` was seen).
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::TextDelta(delta) => {
                self.text.push_str(&delta);
                false
            }
            StreamEvent::ToolCallDelta {
                index,
                id,
                name,
                args_fragment,
            } => {
                let partial = self.calls.entry(index).or_default();
                if partial.id.is_none() {
                    partial.id = id;
                }
                if partial.name.is_none() {
                    partial.name = name;
                }
                partial.arguments.push_str(&args_fragment);
                false
            }
            StreamEvent::Done { usage } => {
                self.usage = usage;
                true
            }
            StreamEvent::Error(err) => {
                self.error = Some(err);
                true
            }
        }
    }

    /// The text accumulated so far (used for progress callbacks).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the accumulator and produce the reassembled turn.
    ///
    /// # Errors
    /// Returns the stream error if one was observed.
    pub fn finish(self) -> Result<ChatTurn> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let tool_calls = self
            .calls
            .into_iter()
            .filter(|(_, partial)| partial.name.is_some())
            .map(|(index, partial)| {
                let id = partial.id.unwrap_or_else(|| format!("call_{}", index));
                let arguments = if partial.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    partial.arguments
                };
                ToolCall::new(&id, &partial.name.unwrap_or_default(), &arguments)
            })
            .collect();

        Ok(ChatTurn {
            content: self.text,
            tool_calls,
            usage: self.usage,
        })
    }
}

/// Drive a full (non-interactive) request against a backend and collect the
/// reassembled turn. Used for compaction and ceiling-summary calls, where no
/// progress reporting is needed.
pub async fn complete(
    backend: &dyn ChatBackend,
    messages: Vec<Message>,
    tools: RenderedTools,
    model: &str,
    options: ChatOptions,
) -> Result<ChatTurn> {
    let mut rx = backend.chat_stream(messages, tools, model, options).await?;
    let mut acc = StreamAccumulator::new();
    while let Some(event) = rx.recv().await {
        if acc.apply(event) {
            break;
        }
    }
    acc.finish()
}
