//! Tool registry for AttoClaw
//!
//! This module provides the `ToolRegistry`: the single source of truth for
//! tool definitions. A tool is registered once and the registry renders the
//! table into either backend wire format on demand, so every tool is
//! automatically usable against both backend families.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::{LoopGuard, STUCK_CYCLE_NOTICE};
use crate::providers::{
    FunctionDef, FunctionToolSpec, RenderedTools, ToolProtocol, TypedToolSpec,
};

use super::{Tool, ToolOutcome, ToolView};

/// A registry that holds and renders tools.
///
/// Tools are registered at start-up and never removed. Duplicate
/// registration silently overwrites the earlier entry (last write wins).
///
/// # Example
///
/// ```rust
/// use attoclaw::agent::LoopGuard;
/// use attoclaw::tools::{EchoTool, ToolRegistry};
///
/// # tokio_test::block_on(async {
/// let mut registry = ToolRegistry::new();
/// registry.register(Box::new(EchoTool));
///
/// let guard = LoopGuard::new();
/// let result = registry.dispatch("echo", r#"{"text": "hello"}"#, &guard).await;
/// assert_eq!(result, "hello");
/// # });
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    ///
    /// If a tool with the same name already exists, it is replaced.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Re-registering tool, previous entry replaced");
        } else {
            info!(tool = %name, "Registering tool");
        }
        self.tools.insert(name, Arc::from(tool));
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Check if a tool exists in the registry.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get the names of all registered tools, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Tools included in the given view, in name order.
    fn view_tools(&self, view: ToolView) -> Vec<&Arc<dyn Tool>> {
        let mut selected: Vec<(&str, &Arc<dyn Tool>)> = self
            .tools
            .iter()
            .filter(|(_, t)| view.includes(t.visibility()))
            .map(|(name, t)| (name.as_str(), t))
            .collect();
        selected.sort_unstable_by_key(|(name, _)| *name);
        selected.into_iter().map(|(_, t)| t).collect()
    }

    /// Render the registry into wire-level descriptors for a protocol.
    ///
    /// Both renderings consume the same registered table; the protocol only
    /// changes the wrapper shape.
    pub fn render(&self, protocol: ToolProtocol, view: ToolView) -> RenderedTools {
        match protocol {
            ToolProtocol::Typed => RenderedTools::Typed(
                self.view_tools(view)
                    .into_iter()
                    .map(|t| TypedToolSpec {
                        name: t.name().to_string(),
                        description: t.description().to_string(),
                        input_schema: t.schema(),
                    })
                    .collect(),
            ),
            ToolProtocol::Functions => RenderedTools::Functions(
                self.view_tools(view)
                    .into_iter()
                    .map(|t| FunctionToolSpec {
                        kind: "function".to_string(),
                        function: FunctionDef {
                            name: t.name().to_string(),
                            description: t.description().to_string(),
                            parameters: t.schema(),
                        },
                    })
                    .collect(),
            ),
        }
    }

    /// Render the typed-protocol view as executable handles.
    ///
    /// Each handle pairs the wire descriptor with a wrapped executor that
    /// consults the loop guard before running and classifies the result
    /// string, surfacing the classification as the protocol-level error
    /// flag. The function-calling protocol has no wrapping; it executes
    /// through [`ToolRegistry::dispatch`] instead.
    pub fn typed_handles(&self, guard: Arc<LoopGuard>, view: ToolView) -> Vec<TypedToolHandle> {
        self.view_tools(view)
            .into_iter()
            .map(|t| TypedToolHandle {
                spec: TypedToolSpec {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    input_schema: t.schema(),
                },
                tool: Arc::clone(t),
                guard: Arc::clone(&guard),
            })
            .collect()
    }

    /// Execute a tool by name from raw argument text.
    ///
    /// This is the function-calling execution path. It never fails:
    /// - unknown name → `"Unknown tool: <name>"`
    /// - stuck cycle → the fixed corrective notice, executor not invoked
    /// - unparseable arguments → `"Failed to parse tool arguments: <message>"`
    pub async fn dispatch(&self, name: &str, raw_args: &str, guard: &LoopGuard) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => Arc::clone(t),
            None => return format!("Unknown tool: {}", name),
        };

        if guard.check(name, raw_args) {
            return STUCK_CYCLE_NOTICE.to_string();
        }

        let args = match parse_arguments(raw_args) {
            Ok(v) => v,
            Err(msg) => return msg,
        };

        let start = Instant::now();
        let result = tool.execute(args).await;
        debug!(
            tool = name,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool executed"
        );
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed-protocol tool bound to its executor and loop guard.
///
/// Produced by [`ToolRegistry::typed_handles`]. The wire descriptor is in
/// [`TypedToolHandle::spec`]; [`TypedToolHandle::invoke`] runs the guard
/// check, parses arguments, executes, and classifies the result.
pub struct TypedToolHandle {
    spec: TypedToolSpec,
    tool: Arc<dyn Tool>,
    guard: Arc<LoopGuard>,
}

impl TypedToolHandle {
    /// The wire-level descriptor for this tool.
    pub fn spec(&self) -> &TypedToolSpec {
        &self.spec
    }

    /// The tool name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Execute the wrapped tool from raw argument text.
    ///
    /// Never fails; all failure modes are encoded in the classified outcome.
    pub async fn invoke(&self, raw_args: &str) -> ToolOutcome {
        if self.guard.check(&self.spec.name, raw_args) {
            return ToolOutcome::success(STUCK_CYCLE_NOTICE.to_string());
        }

        let args = match parse_arguments(raw_args) {
            Ok(v) => v,
            Err(msg) => return ToolOutcome::classify(msg),
        };

        let start = Instant::now();
        let result = self.tool.execute(args).await;
        debug!(
            tool = %self.spec.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool executed"
        );
        ToolOutcome::classify(result)
    }
}

/// Parse raw tool-call argument text into a JSON value.
///
/// Empty text counts as an empty object (backends emit "" for zero-argument
/// calls). Parse failures become the fixed failure string, never an error.
fn parse_arguments(raw_args: &str) -> Result<Value, String> {
    let trimmed = raw_args.trim();
    if trimmed.is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| format!("Failed to parse tool arguments: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, ToolVisibility};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts executions so tests can assert the executor was (not) invoked.
    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counting"
        }
        fn description(&self) -> &str {
            "Counts invocations"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(&self, _args: Value) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            "counted".to_string()
        }
    }

    /// A conditionally-visible tool for view filtering tests.
    struct DebugDumpTool;

    #[async_trait]
    impl Tool for DebugDumpTool {
        fn name(&self) -> &str {
            "debug_dump"
        }
        fn description(&self) -> &str {
            "Dump internal state"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}, "required": []})
        }
        fn visibility(&self) -> ToolVisibility {
            ToolVisibility::Conditional
        }
        async fn execute(&self, _args: Value) -> String {
            "state".to_string()
        }
    }

    #[test]
    fn test_registry_new() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        assert!(registry.has("echo"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_registry_duplicate_overwrites_silently() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(EchoTool));

        assert_eq!(registry.len(), 1);
        assert!(registry.has("echo"));
    }

    #[tokio::test]
    async fn test_dispatch_executes() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let guard = LoopGuard::new();
        let result = registry.dispatch("echo", r#"{"text": "hello"}"#, &guard).await;
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let guard = LoopGuard::new();
        let result = registry.dispatch("nonexistent", "{}", &guard).await;
        assert_eq!(result, "Unknown tool: nonexistent");
    }

    #[tokio::test]
    async fn test_dispatch_unparseable_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let guard = LoopGuard::new();
        let result = registry.dispatch("echo", "{not json", &guard).await;
        assert!(result.starts_with("Failed to parse tool arguments:"));
    }

    #[tokio::test]
    async fn test_dispatch_empty_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let guard = LoopGuard::new();
        let result = registry.dispatch("echo", "", &guard).await;
        assert_eq!(result, "(no text)");
    }

    #[tokio::test]
    async fn test_dispatch_stuck_cycle_skips_executor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CountingTool {
            calls: Arc::clone(&calls),
        }));

        let guard = LoopGuard::new();
        assert_eq!(registry.dispatch("counting", "{}", &guard).await, "counted");
        assert_eq!(registry.dispatch("counting", "{}", &guard).await, "counted");
        // Third identical dispatch is replaced by the corrective notice
        let third = registry.dispatch("counting", "{}", &guard).await;
        assert_eq!(third, STUCK_CYCLE_NOTICE);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // A fourth attempt with differing arguments executes normally
        let fourth = registry
            .dispatch("counting", r#"{"other": true}"#, &guard)
            .await;
        assert_eq!(fourth, "counted");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_render_typed_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let rendered = registry.render(ToolProtocol::Typed, ToolView::Full);
        match rendered {
            RenderedTools::Typed(specs) => {
                assert_eq!(specs.len(), 1);
                assert_eq!(specs[0].name, "echo");
                assert!(specs[0].input_schema.is_object());
            }
            _ => panic!("expected typed descriptors"),
        }
    }

    #[test]
    fn test_render_functions_shape() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let rendered = registry.render(ToolProtocol::Functions, ToolView::Full);
        match rendered {
            RenderedTools::Functions(specs) => {
                assert_eq!(specs.len(), 1);
                assert_eq!(specs[0].kind, "function");
                assert_eq!(specs[0].function.name, "echo");
                assert!(specs[0].function.parameters.is_object());
            }
            _ => panic!("expected function descriptors"),
        }
    }

    #[test]
    fn test_render_view_filters_conditional_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(DebugDumpTool));

        let full = registry.render(ToolProtocol::Typed, ToolView::Full);
        assert_eq!(full.len(), 2);

        let always = registry.render(ToolProtocol::Typed, ToolView::AlwaysOnly);
        assert_eq!(always.len(), 1);
        match always {
            RenderedTools::Typed(specs) => assert_eq!(specs[0].name, "echo"),
            _ => panic!("expected typed descriptors"),
        }
    }

    #[test]
    fn test_both_renderings_share_one_table() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let typed = registry.render(ToolProtocol::Typed, ToolView::Full);
        let functions = registry.render(ToolProtocol::Functions, ToolView::Full);
        assert_eq!(typed.len(), functions.len());

        let typed_schema = match typed {
            RenderedTools::Typed(specs) => specs[0].input_schema.clone(),
            _ => unreachable!(),
        };
        let function_schema = match functions {
            RenderedTools::Functions(specs) => specs[0].function.parameters.clone(),
            _ => unreachable!(),
        };
        assert_eq!(typed_schema, function_schema);
    }

    #[tokio::test]
    async fn test_typed_handle_invoke_classifies() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let guard = Arc::new(LoopGuard::new());
        let handles = registry.typed_handles(guard, ToolView::Full);
        assert_eq!(handles.len(), 1);

        let ok = handles[0].invoke(r#"{"text": "hi"}"#).await;
        assert_eq!(ok.text, "hi");
        assert!(!ok.is_failure());

        let bad = handles[0].invoke("{broken").await;
        assert!(bad.text.starts_with("Failed to parse tool arguments:"));
        assert!(bad.is_failure());
    }

    #[tokio::test]
    async fn test_typed_handle_stuck_cycle_is_not_an_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CountingTool {
            calls: Arc::clone(&calls),
        }));

        let guard = Arc::new(LoopGuard::new());
        let handles = registry.typed_handles(guard, ToolView::Full);
        let handle = &handles[0];

        handle.invoke("{}").await;
        handle.invoke("{}").await;
        let third = handle.invoke("{}").await;
        assert_eq!(third.text, STUCK_CYCLE_NOTICE);
        assert!(!third.is_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(DebugDumpTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.names(), vec!["debug_dump", "echo"]);
    }
}
