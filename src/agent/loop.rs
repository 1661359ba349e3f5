//! Agent turn loop.
//!
//! The orchestrator for one turn sequence: send the conversation to the
//! backend, execute any requested tool calls, feed the results back, and
//! repeat until the backend answers in plain text or the turn ceiling is
//! reached. Compaction keeps the running history under the active model's
//! context budget, which is what lets turn sequences continue indefinitely;
//! the ceiling is a safety net, not the primary termination mechanism.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::providers::{
    complete, ChatBackend, ChatOptions, ChatTurn, RenderedTools, StreamAccumulator, StreamEvent,
    ToolProtocol,
};
use crate::session::{Conversation, ConversationStore, ImageAttachment, Message, Role};
use crate::tools::{ToolRegistry, ToolView, TypedToolHandle};

use super::budget::{estimate_tokens, LimitTable};
use super::compaction::Compactor;
use super::context::{sanitize_progress, ContextBuilder};
use super::guard::LoopGuard;

/// Default ceiling on tool-call turns per turn sequence.
pub const DEFAULT_MAX_TOOL_TURNS: usize = 15;

/// The fixed reply when a backend transport failure ends a turn sequence.
/// Internal detail is logged, never shown to the end user.
pub const TRANSPORT_FAILURE_REPLY: &str =
    "Sorry, I ran into a problem talking to the language model. Please try again.";

/// The fixed reply when the turn ceiling is reached and even the wrap-up
/// summary call fails.
pub const CEILING_FALLBACK_REPLY: &str = "I ran out of tool-call turns before finishing. \
The work so far is recorded in the conversation; ask me to continue to pick it up.";

/// The wrap-up request issued after the last tool-call turn.
const CEILING_SUMMARY_PROMPT: &str = "You have used all available tool-call turns for this \
request. Without calling any more tools, summarize what you accomplished and what remains \
to be done.";

/// Best-effort progress callback: receives the sanitized accumulated text
/// after each streamed delta. Must not block; throttling is the caller's
/// responsibility.
pub type ProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// State of a turn sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting on a backend response.
    AwaitModel,
    /// Executing requested tool calls.
    ExecuteTools,
    /// Terminal: the backend answered in plain text.
    Done,
    /// Terminal: the turn ceiling was exhausted.
    CeilingReached,
}

/// Outcome of a completed turn sequence.
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// The final answer text.
    pub final_text: String,
    /// Terminal state (`Done` or `CeilingReached`).
    pub state: TurnState,
    /// Number of primary backend calls made (excludes the ceiling summary
    /// call and compaction calls).
    pub model_calls: usize,
}

/// The agent: owns one backend, one registry view, and one loop guard, and
/// drives turn sequences over stored conversations.
///
/// Registry and guard are injected so tests (and embedders running several
/// agents in one process) get isolated instances instead of process-wide
/// state.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use attoclaw::agent::{Agent, LoopGuard};
/// use attoclaw::config::Config;
/// use attoclaw::providers::resolve_backend;
/// use attoclaw::tools::{EchoTool, ToolRegistry};
///
/// let config = Config::load()?;
/// let backend = resolve_backend(&config.backend)?;
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(EchoTool));
///
/// let agent = Agent::new(config, backend, Arc::new(registry), Arc::new(LoopGuard::new()));
/// let answer = agent.run_turn("cli", "hello", None, None).await;
/// ```
pub struct Agent {
    config: Config,
    backend: Arc<dyn ChatBackend>,
    registry: Arc<ToolRegistry>,
    guard: Arc<LoopGuard>,
    store: ConversationStore,
    limits: LimitTable,
    compactor: Compactor,
    context: ContextBuilder,
}

impl Agent {
    /// Create a new agent.
    ///
    /// # Arguments
    /// * `config` - Agent configuration
    /// * `backend` - The resolved chat backend
    /// * `registry` - Tool registry (shared, read-only after start-up)
    /// * `guard` - Loop guard for stuck-cycle detection
    pub fn new(
        config: Config,
        backend: Arc<dyn ChatBackend>,
        registry: Arc<ToolRegistry>,
        guard: Arc<LoopGuard>,
    ) -> Self {
        let mut limits = LimitTable::builtin();
        for (model, window) in &config.limits {
            limits.set_window(model, *window);
        }

        let compactor = Compactor::with_keep_recent(config.agent.keep_recent_turns);
        let context = match &config.agent.system_prompt_path {
            Some(path) => ContextBuilder::with_prompt_path(path.clone()),
            None => ContextBuilder::new(),
        };

        Self {
            config,
            backend,
            registry,
            guard,
            store: ConversationStore::new(),
            limits,
            compactor,
            context,
        }
    }

    /// Run one turn sequence and return the final answer text.
    ///
    /// This is the single public entry point for transports and schedulers.
    /// It never fails: transport errors are logged and collapsed into a
    /// fixed user-facing reply.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        user_message: &str,
        on_chunk: Option<ProgressCallback>,
        image: Option<ImageAttachment>,
    ) -> String {
        match self
            .run_turn_detailed(conversation_id, user_message, on_chunk, image)
            .await
        {
            Ok(report) => report.final_text,
            Err(e) => {
                error!(error = %e, "Turn sequence failed");
                TRANSPORT_FAILURE_REPLY.to_string()
            }
        }
    }

    /// Run one turn sequence and return the full report.
    ///
    /// Unlike [`Agent::run_turn`] this propagates transport errors, which is
    /// useful for embedders that want to retry or inspect the failure class.
    pub async fn run_turn_detailed(
        &self,
        conversation_id: &str,
        user_message: &str,
        on_chunk: Option<ProgressCallback>,
        image: Option<ImageAttachment>,
    ) -> Result<TurnReport> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "turn_sequence",
            request_id = %request_id,
            conversation = %conversation_id,
        );

        async {
            let mut convo = self.store.get_or_create(conversation_id).await;
            let result = self
                .drive(&mut convo, user_message, on_chunk.as_ref(), image)
                .await;
            // Persist whatever was appended, even when the sequence failed
            // mid-way, so tool results survive into the next turn.
            self.store.save(convo).await;
            result
        }
        .instrument(span)
        .await
    }

    /// Force a reload of the cached system prompt on the next call and
    /// reset the loop guard.
    ///
    /// Invoke whenever external state the prompt depends on changes.
    pub async fn invalidate_cache(&self) {
        self.context.invalidate().await;
        self.guard.reset();
    }

    /// Access the conversation store.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Access the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn drive(
        &self,
        convo: &mut Conversation,
        user_message: &str,
        on_chunk: Option<&ProgressCallback>,
        image: Option<ImageAttachment>,
    ) -> Result<TurnReport> {
        // System prompt heads the history; refresh it from the cache so
        // invalidate_cache takes effect on existing conversations too.
        let prompt = self.context.system_prompt().await;
        let has_system_prefix = convo
            .messages
            .first()
            .map(|m| m.role == Role::System)
            .unwrap_or(false);
        if has_system_prefix {
            convo.messages[0].content = prompt;
        } else {
            convo.messages.insert(0, Message::system(&prompt));
        }

        let mut user = Message::user(user_message);
        if let Some(attachment) = image {
            if self.backend.supports_images() {
                user.attachment = Some(attachment);
            } else {
                warn!(
                    backend = self.backend.name(),
                    "Backend does not accept image attachments, dropping"
                );
            }
        }
        convo.push(user);

        let model = self
            .config
            .agent
            .model
            .clone()
            .unwrap_or_else(|| self.backend.default_model().to_string());
        let limits = self.limits.for_model(&model);
        let view = if self.config.agent.expose_conditional_tools {
            ToolView::Full
        } else {
            ToolView::AlwaysOnly
        };
        let (rendered, typed_handles) = self.render_tools(view);

        let max_turns = self.config.agent.max_tool_turns;
        let mut model_calls = 0usize;

        for turn in 0..max_turns {
            let estimated = estimate_tokens(&convo.messages);
            if estimated >= limits.compact_threshold {
                info!(
                    turn,
                    estimated,
                    threshold = limits.compact_threshold,
                    "Context above threshold, compacting"
                );
                let rewritten = self
                    .compactor
                    .compact(convo.messages.clone(), self.backend.as_ref(), &model)
                    .await;
                convo.replace_messages(rewritten);
            }

            debug!(turn, state = "AWAIT_MODEL", "Requesting model response");
            let chat = self
                .stream_turn(convo.messages.clone(), rendered.clone(), &model, on_chunk)
                .await?;
            model_calls += 1;
            if let Some(usage) = &chat.usage {
                debug!(
                    input_tokens = usage.prompt_tokens,
                    output_tokens = usage.completion_tokens,
                    "Model call usage"
                );
            }

            if !chat.has_tool_calls() {
                convo.push(Message::assistant(&chat.content));
                info!(turns = turn + 1, "Turn sequence complete");
                return Ok(TurnReport {
                    final_text: chat.content,
                    state: TurnState::Done,
                    model_calls,
                });
            }

            debug!(
                turn,
                state = "EXECUTE_TOOLS",
                calls = chat.tool_calls.len(),
                "Executing tool calls"
            );
            convo.push(Message::assistant_with_tools(
                &chat.content,
                chat.tool_calls.clone(),
            ));

            // Tools run one at a time, in the order the backend requested.
            for call in &chat.tool_calls {
                info!(tool = %call.name, id = %call.id, "Dispatching tool call");
                let message = match &typed_handles {
                    Some(handles) => match handles.get(call.name.as_str()) {
                        Some(handle) => {
                            let outcome = handle.invoke(&call.arguments).await;
                            Message::tool_result_with_error(
                                &call.id,
                                &outcome.text,
                                outcome.is_failure(),
                            )
                        }
                        None => {
                            Message::tool_result(&call.id, &format!("Unknown tool: {}", call.name))
                        }
                    },
                    None => {
                        let text = self
                            .registry
                            .dispatch(&call.name, &call.arguments, &self.guard)
                            .await;
                        Message::tool_result(&call.id, &text)
                    }
                };
                convo.push(message);
            }
        }

        // Ceiling reached: one final non-tool request for a progress summary.
        info!(max_turns, "Tool-turn ceiling reached, requesting progress summary");
        let mut wrap_up = convo.messages.clone();
        wrap_up.push(Message::user(CEILING_SUMMARY_PROMPT));

        let final_text = match complete(
            self.backend.as_ref(),
            wrap_up,
            RenderedTools::None,
            &model,
            self.chat_options(),
        )
        .await
        {
            Ok(turn) if !turn.content.trim().is_empty() => turn.content,
            Ok(_) => {
                warn!("Ceiling summary came back empty, using fallback reply");
                CEILING_FALLBACK_REPLY.to_string()
            }
            Err(e) => {
                warn!(error = %e, "Ceiling summary call failed, using fallback reply");
                CEILING_FALLBACK_REPLY.to_string()
            }
        };
        convo.push(Message::assistant(&final_text));

        Ok(TurnReport {
            final_text,
            state: TurnState::CeilingReached,
            model_calls,
        })
    }

    /// Stream one backend response, firing the progress callback on each
    /// text delta with the sanitized accumulated text.
    async fn stream_turn(
        &self,
        messages: Vec<Message>,
        tools: RenderedTools,
        model: &str,
        on_chunk: Option<&ProgressCallback>,
    ) -> Result<ChatTurn> {
        let mut rx = self
            .backend
            .chat_stream(messages, tools, model, self.chat_options())
            .await?;

        let mut acc = StreamAccumulator::new();
        while let Some(event) = rx.recv().await {
            let text_delta = matches!(&event, StreamEvent::TextDelta(_));
            let finished = acc.apply(event);
            if text_delta {
                if let Some(cb) = on_chunk {
                    cb(sanitize_progress(acc.text()));
                }
            }
            if finished {
                break;
            }
        }
        acc.finish()
    }

    /// Render the registry for the active backend's protocol. The typed
    /// protocol additionally yields the wrapped handles the loop executes
    /// through; the functions protocol executes via `dispatch`.
    fn render_tools(
        &self,
        view: ToolView,
    ) -> (RenderedTools, Option<HashMap<String, TypedToolHandle>>) {
        match self.backend.protocol() {
            ToolProtocol::Typed => {
                let handles = self.registry.typed_handles(Arc::clone(&self.guard), view);
                let specs = handles.iter().map(|h| h.spec().clone()).collect();
                let map = handles
                    .into_iter()
                    .map(|h| (h.name().to_string(), h))
                    .collect();
                (RenderedTools::Typed(specs), Some(map))
            }
            ToolProtocol::Functions => {
                (self.registry.render(ToolProtocol::Functions, view), None)
            }
        }
    }

    fn chat_options(&self) -> ChatOptions {
        let mut options = ChatOptions::new().with_max_tokens(self.config.agent.max_tokens);
        if let Some(temperature) = self.config.agent.temperature {
            options = options.with_temperature(temperature);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Backend that always answers "ok" in plain text.
    struct PlainBackend;

    #[async_trait]
    impl ChatBackend for PlainBackend {
        async fn chat_stream(
            &self,
            _messages: Vec<Message>,
            _tools: RenderedTools,
            _model: &str,
            _options: ChatOptions,
        ) -> Result<mpsc::Receiver<StreamEvent>> {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                let _ = tx.send(StreamEvent::TextDelta("ok".into())).await;
                let _ = tx.send(StreamEvent::Done { usage: None }).await;
            });
            Ok(rx)
        }

        fn protocol(&self) -> ToolProtocol {
            ToolProtocol::Typed
        }

        fn default_model(&self) -> &str {
            "plain-model"
        }

        fn name(&self) -> &str {
            "plain"
        }
    }

    fn test_agent() -> Agent {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        Agent::new(
            Config::default(),
            Arc::new(PlainBackend),
            Arc::new(registry),
            Arc::new(LoopGuard::new()),
        )
    }

    #[tokio::test]
    async fn test_plain_answer_single_call() {
        let agent = test_agent();
        let report = agent
            .run_turn_detailed("t", "hello", None, None)
            .await
            .unwrap();
        assert_eq!(report.final_text, "ok");
        assert_eq!(report.state, TurnState::Done);
        assert_eq!(report.model_calls, 1);
    }

    #[tokio::test]
    async fn test_conversation_records_system_user_assistant() {
        let agent = test_agent();
        agent.run_turn("t", "hello", None, None).await;

        let convo = agent.store().get("t").await.unwrap();
        assert_eq!(convo.messages.len(), 3);
        assert_eq!(convo.messages[0].role, Role::System);
        assert_eq!(convo.messages[1].role, Role::User);
        assert_eq!(convo.messages[1].content, "hello");
        assert_eq!(convo.messages[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_second_turn_reuses_history() {
        let agent = test_agent();
        agent.run_turn("t", "first", None, None).await;
        agent.run_turn("t", "second", None, None).await;

        let convo = agent.store().get("t").await.unwrap();
        // system + (user, assistant) × 2 — the system prompt is not duplicated
        assert_eq!(convo.messages.len(), 5);
        assert_eq!(convo.messages[0].role, Role::System);
        assert_eq!(convo.messages[3].content, "second");
    }

    #[tokio::test]
    async fn test_image_dropped_when_unsupported() {
        let agent = test_agent();
        let image = ImageAttachment::new("image/png", "aGk=");
        agent.run_turn("t", "look", None, Some(image)).await;

        let convo = agent.store().get("t").await.unwrap();
        assert!(convo.messages[1].attachment.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_cache_resets_guard() {
        let agent = test_agent();
        agent.guard.check("echo", "{}");
        agent.guard.check("echo", "{}");
        agent.invalidate_cache().await;
        // Window was cleared, so this is the first of a fresh run
        assert!(!agent.guard.check("echo", "{}"));
    }
}
