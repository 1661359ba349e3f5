//! OpenAI-compatible backend implementation
//!
//! Implements `ChatBackend` for the chat-completions API shape: the
//! JSON-Schema function-calling tool protocol. Also covers the many
//! OpenAI-compatible gateways, which is why the base URL is configurable.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{AttoError, Result};
use crate::session::{Message, Role};

use super::{
    parse_provider_error, ChatBackend, ChatOptions, FunctionToolSpec, RenderedTools, StreamEvent,
    ToolProtocol, Usage,
};

/// The default chat-completions endpoint base.
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// The default model to use.
const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI-compatible chat backend.
pub struct OpenAiBackend {
    api_key: String,
    api_base: String,
    client: Client,
}

impl OpenAiBackend {
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

    /// Override the API base URL (Azure, local gateways, compatible APIs).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn chat_stream(
        &self,
        messages: Vec<Message>,
        tools: RenderedTools,
        model: &str,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let tools = match tools {
            RenderedTools::None => None,
            RenderedTools::Functions(specs) if specs.is_empty() => None,
            RenderedTools::Functions(specs) => Some(specs),
            RenderedTools::Typed(_) => {
                return Err(AttoError::Provider(
                    "typed-schema descriptors passed to function-calling backend".into(),
                ))
            }
        };

        let request = CompletionsRequest {
            model: model.to_string(),
            messages: convert_messages(messages),
            tools,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            let body = match serde_json::from_str::<ApiErrorResponse>(&error_text) {
                Ok(parsed) => format!("OpenAI API error: {}", parsed.error.message),
                Err(_) => format!("OpenAI API error: {}", error_text),
            };
            return Err(AttoError::from(parse_provider_error(status, &body)));
        }

        let (tx, rx) = mpsc::channel::<StreamEvent>(32);
        let byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut usage: Option<Usage> = None;
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

                    if line.is_empty() {
                        continue;
                    }
                    let data = match line.strip_prefix("data:") {
                        Some(stripped) => stripped.trim_start(),
                        None => continue,
                    };

                    if data == "[DONE]" {
                        let _ = tx.send(StreamEvent::Done { usage }).await;
                        return;
                    }

                    let sse: StreamChunk = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(chunk_usage) = sse.usage {
                        usage = Some(Usage::new(
                            chunk_usage.prompt_tokens,
                            chunk_usage.completion_tokens,
                        ));
                    }

                    let Some(choice) = sse.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(content) = choice.delta.content {
                        if !content.is_empty()
                            && tx.send(StreamEvent::TextDelta(content)).await.is_err()
                        {
                            return;
                        }
                    }

                    for tc in choice.delta.tool_calls.unwrap_or_default() {
                        let event = StreamEvent::ToolCallDelta {
                            index: tc.index,
                            id: tc.id,
                            name: tc.function.as_ref().and_then(|f| f.name.clone()),
                            args_fragment: tc
                                .function
                                .and_then(|f| f.arguments)
                                .unwrap_or_default(),
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }

            // Stream ended without [DONE]; close out with what we have.
            let _ = tx.send(StreamEvent::Done { usage }).await;
        });

        Ok(rx)
    }

    fn protocol(&self) -> ToolProtocol {
        ToolProtocol::Functions
    }

    fn default_model(&self) -> &str {
        DEFAULT_MODEL
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn supports_images(&self) -> bool {
        true
    }
}

// ============================================================================
// Wire Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<FunctionToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Message content - plain text or multimodal parts.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

// ============================================================================
// Wire Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ============================================================================
// Conversion
// ============================================================================

/// Convert messages to the chat-completions wire format.
///
/// System prompts stay in the message list; tool results become
/// `role: "tool"` messages correlated by `tool_call_id`.
fn convert_messages(messages: Vec<Message>) -> Vec<WireMessage> {
    messages
        .into_iter()
        .map(|msg| match msg.role {
            Role::System => WireMessage {
                role: "system".to_string(),
                content: Some(WireContent::Text(msg.content)),
                tool_calls: None,
                tool_call_id: None,
            },
            Role::User => {
                let content = match msg.attachment {
                    Some(attachment) => {
                        let mut parts = Vec::new();
                        if !msg.content.is_empty() {
                            parts.push(ContentPart::Text { text: msg.content });
                        }
                        parts.push(ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!(
                                    "data:{};base64,{}",
                                    attachment.media_type, attachment.data
                                ),
                            },
                        });
                        WireContent::Parts(parts)
                    }
                    None => WireContent::Text(msg.content),
                };
                WireMessage {
                    role: "user".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: None,
                }
            }
            Role::Assistant => {
                let tool_calls = msg.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|tc| WireToolCall {
                            id: tc.id,
                            kind: "function".to_string(),
                            function: WireFunctionCall {
                                name: tc.name,
                                arguments: tc.arguments,
                            },
                        })
                        .collect()
                });
                WireMessage {
                    role: "assistant".to_string(),
                    content: if msg.content.is_empty() && tool_calls.is_some() {
                        None
                    } else {
                        Some(WireContent::Text(msg.content))
                    },
                    tool_calls,
                    tool_call_id: None,
                }
            }
            Role::Tool => WireMessage {
                role: "tool".to_string(),
                content: Some(WireContent::Text(msg.content)),
                tool_calls: None,
                tool_call_id: msg.tool_call_id,
            },
        })
        .collect()
}
