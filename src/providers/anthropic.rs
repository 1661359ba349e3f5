//! Anthropic backend implementation
//!
//! Implements `ChatBackend` for Anthropic's Messages API: the typed-schema
//! tool protocol. Handles message conversion (system prompt extraction,
//! tool-result grouping, image blocks), SSE streaming, and error
//! classification.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{AttoError, Result};
use crate::session::{Message, Role};

use super::{
    parse_provider_error, ChatBackend, ChatOptions, RenderedTools, StreamEvent, ToolProtocol,
    TypedToolSpec, Usage,
};

/// The default Messages API endpoint.
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// The default model to use.
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// The Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic chat backend.
pub struct AnthropicBackend {
    api_key: String,
    api_base: String,
    client: Client,
}

impl AnthropicBackend {
    /// Create a new backend with the given API key.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Override the API base URL (proxies, compatible gateways).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: RenderedTools,
        model: &str,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let tools = match tools {
            RenderedTools::None => None,
            RenderedTools::Typed(specs) if specs.is_empty() => None,
            RenderedTools::Typed(specs) => Some(specs),
            RenderedTools::Functions(_) => {
                return Err(AttoError::Provider(
                    "function-calling descriptors passed to typed-schema backend".into(),
                ))
            }
        };

        let (system, wire_messages) = convert_messages(messages);
        let request = MessagesRequest {
            model: model.to_string(),
            max_tokens: options.max_tokens.unwrap_or(8192),
            messages: wire_messages,
            system,
            tools,
            temperature: options.temperature,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            let body = match serde_json::from_str::<ApiErrorResponse>(&error_text) {
                Ok(parsed) => format!(
                    "Anthropic API error: {} - {}",
                    parsed.error.r#type, parsed.error.message
                ),
                Err(_) => format!("Anthropic API error: {}", error_text),
            };
            return Err(AttoError::from(parse_provider_error(status, &body)));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(32);
        let byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut input_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;
            let mut line_buffer = String::new();

            tokio::pin!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error(AttoError::Provider(format!(
                                "Stream read error: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };

                line_buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = line_buffer.find('\n') {
                    let line = line_buffer[..newline_pos].trim().to_string();
                    line_buffer = line_buffer[newline_pos + 1..].to_string();

                    if line.is_empty() || line.starts_with("event:") {
                        continue;
                    }
                    let data = match line.strip_prefix("data:") {
                        Some(stripped) => stripped.trim_start(),
                        None => continue,
                    };

                    let sse: SseEvent = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    match sse.event_type.as_str() {
                        "message_start" => {
                            if let Some(usage) = sse.message.and_then(|m| m.usage) {
                                input_tokens = usage.input_tokens.unwrap_or(0);
                            }
                        }
                        "content_block_start" => {
                            if let Some(block) = &sse.content_block {
                                if block.block_type == "tool_use" {
                                    let event = StreamEvent::ToolCallDelta {
                                        index: sse.index.unwrap_or(0) as usize,
                                        id: block.id.clone(),
                                        name: block.name.clone(),
                                        args_fragment: String::new(),
                                    };
                                    if tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        "content_block_delta" => {
                            if let Some(delta) = &sse.delta {
                                match delta.delta_type.as_deref() {
                                    Some("text_delta") => {
                                        if let Some(text) = &delta.text {
                                            if tx
                                                .send(StreamEvent::TextDelta(text.clone()))
                                                .await
                                                .is_err()
                                            {
                                                return;
                                            }
                                        }
                                    }
                                    Some("input_json_delta") => {
                                        if let Some(json_chunk) = &delta.partial_json {
                                            let event = StreamEvent::ToolCallDelta {
                                                index: sse.index.unwrap_or(0) as usize,
                                                id: None,
                                                name: None,
                                                args_fragment: json_chunk.clone(),
                                            };
                                            if tx.send(event).await.is_err() {
                                                return;
                                            }
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                        "message_delta" => {
                            if let Some(usage) = &sse.usage {
                                output_tokens = usage.output_tokens.unwrap_or(0);
                            }
                        }
                        "message_stop" => {
                            let _ = tx
                                .send(StreamEvent::Done {
                                    usage: Some(Usage::new(input_tokens, output_tokens)),
                                })
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            // Stream ended without message_stop; close out with what we have.
            let _ = tx
                .send(StreamEvent::Done {
                    usage: Some(Usage::new(input_tokens, output_tokens)),
                })
                .await;
        });

        Ok(rx)
    }

    fn protocol(&self) -> ToolProtocol {
        ToolProtocol::Typed
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn supports_images(&self) -> bool {
        true
    }
}

// ============================================================================
// Wire Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    /// System prompt (a separate field in this API, not a message)
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<TypedToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: WireContent,
}

/// Message content - simple text or an array of blocks.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

// ============================================================================
// Wire Error / SSE Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    r#type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SseEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    delta: Option<SseDelta>,
    #[serde(default)]
    content_block: Option<SseContentBlock>,
    #[serde(default)]
    usage: Option<SseUsage>,
    #[serde(default)]
    message: Option<SseMessage>,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(rename = "type")]
    #[serde(default)]
    delta_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SseMessage {
    #[serde(default)]
    usage: Option<SseUsage>,
}

// ============================================================================
// Conversion
// ============================================================================

/// Convert messages to the wire format, extracting the system prompt.
///
/// Tool results become `tool_result` blocks inside user messages;
/// consecutive results are grouped into one message as the API requires.
fn convert_messages(messages: Vec<Message>) -> (Option<String>, Vec<WireMessage>) {
    let mut system: Option<String> = None;
    let mut wire: Vec<WireMessage> = Vec::new();
    let mut pending_tool_results: Vec<ContentBlock> = Vec::new();

    fn flush(pending: &mut Vec<ContentBlock>, wire: &mut Vec<WireMessage>) {
        if !pending.is_empty() {
            wire.push(WireMessage {
                role: "user".to_string(),
                content: WireContent::Blocks(std::mem::take(pending)),
            });
        }
    }

    for msg in messages {
        match msg.role {
            Role::System => {
                system = Some(msg.content);
            }
            Role::User => {
                flush(&mut pending_tool_results, &mut wire);
                let content = match msg.attachment {
                    Some(attachment) => {
                        let mut blocks = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text { text: msg.content });
                        }
                        blocks.push(ContentBlock::Image {
                            source: ImageSource {
                                source_type: "base64".to_string(),
                                media_type: attachment.media_type,
                                data: attachment.data,
                            },
                        });
                        WireContent::Blocks(blocks)
                    }
                    None => WireContent::Text(msg.content),
                };
                wire.push(WireMessage {
                    role: "user".to_string(),
                    content,
                });
            }
            Role::Assistant => {
                flush(&mut pending_tool_results, &mut wire);
                if let Some(tool_calls) = msg.tool_calls {
                    let mut blocks: Vec<ContentBlock> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(ContentBlock::Text { text: msg.content });
                    }
                    for tc in tool_calls {
                        let input: serde_json::Value =
                            serde_json::from_str(&tc.arguments).unwrap_or(serde_json::json!({}));
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id,
                            name: tc.name,
                            input,
                        });
                    }
                    wire.push(WireMessage {
                        role: "assistant".to_string(),
                        content: WireContent::Blocks(blocks),
                    });
                } else {
                    wire.push(WireMessage {
                        role: "assistant".to_string(),
                        content: WireContent::Text(msg.content),
                    });
                }
            }
            Role::Tool => {
                if let Some(tool_call_id) = msg.tool_call_id {
                    pending_tool_results.push(ContentBlock::ToolResult {
                        tool_use_id: tool_call_id,
                        content: msg.content,
                        is_error: msg.is_error.filter(|e| *e),
                    });
                }
            }
        }
    }

    flush(&mut pending_tool_results, &mut wire);
    (system, wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ImageAttachment, ToolCall};

    #[test]
    fn test_backend_identity() {
        let backend = AnthropicBackend::new("test-key");
        assert_eq!(backend.name(), "anthropic");
        assert_eq!(backend.protocol(), ToolProtocol::Typed);
        assert!(backend.supports_images());
        assert_eq!(backend.default_model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_with_api_base_trims_slash() {
        let backend = AnthropicBackend::new("k").with_api_base("https://proxy.local/");
        assert_eq!(backend.api_base, "https://proxy.local");
    }

    #[test]
    fn test_convert_extracts_system() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi!"),
        ];
        let (system, wire) = convert_messages(messages);
        assert_eq!(system, Some("You are helpful".to_string()));
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "user");
        assert_eq!(wire[1].role, "assistant");
    }

    #[test]
    fn test_convert_tool_calls_become_blocks() {
        let call = ToolCall::new("call_1", "echo", r#"{"text": "hi"}"#);
        let messages = vec![
            Message::user("go"),
            Message::assistant_with_tools("Running.", vec![call]),
            Message::tool_result("call_1", "hi"),
        ];
        let (_, wire) = convert_messages(messages);
        assert_eq!(wire.len(), 3);

        match &wire[1].content {
            WireContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(blocks[0], ContentBlock::Text { .. }));
                assert!(matches!(blocks[1], ContentBlock::ToolUse { .. }));
            }
            _ => panic!("expected blocks"),
        }

        // Tool results ride in a user message
        assert_eq!(wire[2].role, "user");
        match &wire[2].content {
            WireContent::Blocks(blocks) => {
                assert!(matches!(blocks[0], ContentBlock::ToolResult { .. }))
            }
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn test_convert_groups_consecutive_tool_results() {
        let messages = vec![
            Message::user("go"),
            Message::assistant_with_tools(
                "Two calls.",
                vec![
                    ToolCall::new("call_1", "a", "{}"),
                    ToolCall::new("call_2", "b", "{}"),
                ],
            ),
            Message::tool_result("call_1", "Result A"),
            Message::tool_result("call_2", "Result B"),
            Message::assistant("Both done."),
        ];
        let (_, wire) = convert_messages(messages);
        assert_eq!(wire.len(), 4);
        match &wire[2].content {
            WireContent::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            _ => panic!("expected grouped tool results"),
        }
    }

    #[test]
    fn test_convert_error_flag_serialized_only_when_true() {
        let messages = vec![
            Message::tool_result_with_error("call_1", "Failed to read", true),
            Message::tool_result_with_error("call_2", "fine", false),
        ];
        let (_, wire) = convert_messages(messages);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains(r#""is_error":true"#));
        assert_eq!(json.matches("is_error").count(), 1);
    }

    #[test]
    fn test_convert_image_attachment() {
        let messages = vec![
            Message::user("what is this?").with_attachment(ImageAttachment::new("image/png", "aGk="))
        ];
        let (_, wire) = convert_messages(messages);
        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains(r#""type":"image""#));
        assert!(json.contains(r#""media_type":"image/png""#));
        assert!(json.contains(r#""data":"aGk=""#));
    }

    #[test]
    fn test_request_serialization_skips_optionals() {
        let request = MessagesRequest {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            messages: vec![],
            system: None,
            tools: None,
            temperature: None,
            stream: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("system"));
        assert!(!json.contains("tools"));
        assert!(!json.contains("temperature"));
        assert!(json.contains(r#""stream":true"#));
    }

    #[test]
    fn test_parse_sse_text_delta() {
        let line = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#;
        let event: SseEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.event_type, "content_block_delta");
        assert_eq!(event.delta.unwrap().text.as_deref(), Some("Hello"));
    }

    #[test]
    fn test_parse_sse_tool_use_start() {
        let line = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_01","name":"echo","input":{}}}"#;
        let event: SseEvent = serde_json::from_str(line).unwrap();
        let block = event.content_block.unwrap();
        assert_eq!(block.block_type, "tool_use");
        assert_eq!(block.name.as_deref(), Some("echo"));
        assert_eq!(event.index, Some(1));
    }

    #[test]
    fn test_parse_sse_input_json_delta() {
        let line = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"text\""}}"#;
        let event: SseEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event.delta.unwrap().partial_json.as_deref(),
            Some(r#"{"text""#)
        );
    }

    #[test]
    fn test_parse_sse_message_delta_usage() {
        let line = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#;
        let event: SseEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.usage.unwrap().output_tokens, Some(42));
    }
}
