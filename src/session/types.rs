//! Conversation types for AttoClaw
//!
//! This module defines the core types for conversation state management,
//! including messages, roles, tool calls, and image attachments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation: the ordered message history for one conversation id.
///
/// The message list is append-only, with one exception: compaction replaces
/// the middle slice with a single checkpoint message via
/// [`Conversation::replace_messages`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier for this conversation (e.g., "cli", "task:digest")
    pub id: String,
    /// Ordered list of messages in this conversation
    pub messages: Vec<Message>,
    /// When this conversation was created
    pub created_at: DateTime<Utc>,
    /// When this conversation was last modified
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation with the given id.
    ///
    /// # Example
    /// ```
    /// use attoclaw::session::Conversation;
    ///
    /// let convo = Conversation::new("cli");
    /// assert!(convo.messages.is_empty());
    /// ```
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message to this conversation.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Replace the full message list in one step.
    ///
    /// This is the only non-append mutation; compaction uses it to swap in
    /// the rewritten history atomically.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.updated_at = Utc::now();
    }

    /// Get the number of messages in this conversation.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Check if this conversation is empty (no messages).
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get the last message in this conversation, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// A single message in a conversation.
///
/// Messages can be from users, assistants, system prompts, or tool results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender
    pub role: Role,
    /// The text content of the message
    pub content: String,
    /// Tool calls made by the assistant (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (for tool results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Whether a tool result represents a failure (typed-schema protocol only;
    /// surfaced as the wire-level error flag)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    /// Optional image attached to a user message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<ImageAttachment>,
}

impl Message {
    /// Create a new user message.
    ///
    /// # Example
    /// ```
    /// use attoclaw::session::{Message, Role};
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            is_error: None,
            attachment: None,
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            is_error: None,
            attachment: None,
        }
    }

    /// Create a new system message.
    ///
    /// System messages are used for prompts and instructions.
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            is_error: None,
            attachment: None,
        }
    }

    /// Create a new tool result message.
    ///
    /// # Arguments
    /// * `tool_call_id` - The ID of the tool call this is responding to
    /// * `content` - The result content from the tool
    ///
    /// # Example
    /// ```
    /// use attoclaw::session::{Message, Role};
    ///
    /// let msg = Message::tool_result("call_123", "Tool executed successfully");
    /// assert_eq!(msg.role, Role::Tool);
    /// assert_eq!(msg.tool_call_id, Some("call_123".to_string()));
    /// ```
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
            is_error: None,
            attachment: None,
        }
    }

    /// Create a tool result message carrying the typed-protocol error flag.
    ///
    /// The flag is only serialized when `true`, matching the wire format.
    pub fn tool_result_with_error(tool_call_id: &str, content: &str, is_error: bool) -> Self {
        let mut msg = Self::tool_result(tool_call_id, content);
        if is_error {
            msg.is_error = Some(true);
        }
        msg
    }

    /// Create an assistant message with tool calls.
    ///
    /// # Example
    /// ```
    /// use attoclaw::session::{Message, ToolCall};
    ///
    /// let call = ToolCall::new("call_1", "echo", r#"{"text": "hi"}"#);
    /// let msg = Message::assistant_with_tools("Running echo.", vec![call]);
    /// assert!(msg.has_tool_calls());
    /// ```
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            is_error: None,
            attachment: None,
        }
    }

    /// Attach an image to this message (builder style).
    pub fn with_attachment(mut self, attachment: ImageAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Check if this message has tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|tc| !tc.is_empty())
            .unwrap_or(false)
    }

    /// Check if this is a tool result message.
    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompts and instructions
    System,
    /// Messages from the user
    User,
    /// Messages from the AI assistant
    Assistant,
    /// Results from tool executions
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call made by the assistant.
///
/// Tool calls represent requests to execute specific tools with given
/// arguments. Arguments stay as the raw JSON text the backend produced;
/// parsing happens at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call.
    ///
    /// # Example
    /// ```
    /// use attoclaw::session::ToolCall;
    ///
    /// let call = ToolCall::new("call_123", "echo", r#"{"text": "hi"}"#);
    /// assert_eq!(call.name, "echo");
    /// ```
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }
}

/// An image attached to a user message.
///
/// The payload is base64-encoded; both backend wire formats consume base64
/// directly (Anthropic as a source block, OpenAI as a data URL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type (e.g., "image/png", "image/jpeg")
    pub media_type: String,
    /// Base64-encoded image bytes
    pub data: String,
}

impl ImageAttachment {
    /// Create a new image attachment from an already-encoded payload.
    pub fn new(media_type: &str, data: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            data: data.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_new() {
        let convo = Conversation::new("cli");
        assert_eq!(convo.id, "cli");
        assert!(convo.messages.is_empty());
        assert!(convo.created_at <= convo.updated_at);
    }

    #[test]
    fn test_conversation_push() {
        let mut convo = Conversation::new("test");
        convo.push(Message::user("Hello"));
        assert_eq!(convo.message_count(), 1);
        assert!(!convo.is_empty());
        assert_eq!(convo.last_message().unwrap().content, "Hello");
    }

    #[test]
    fn test_conversation_replace_messages() {
        let mut convo = Conversation::new("test");
        convo.push(Message::user("one"));
        convo.push(Message::user("two"));

        convo.replace_messages(vec![Message::system("checkpoint")]);
        assert_eq!(convo.message_count(), 1);
        assert_eq!(convo.messages[0].role, Role::System);
    }

    #[test]
    fn test_message_constructors() {
        let user = Message::user("Hello");
        assert_eq!(user.role, Role::User);
        assert!(user.tool_calls.is_none());

        let assistant = Message::assistant("Hi there");
        assert_eq!(assistant.role, Role::Assistant);

        let system = Message::system("You are helpful");
        assert_eq!(system.role, Role::System);

        let tool = Message::tool_result("call_1", "Success");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id, Some("call_1".to_string()));
        assert!(tool.is_tool_result());
    }

    #[test]
    fn test_tool_result_with_error_flag() {
        let ok = Message::tool_result_with_error("call_1", "done", false);
        assert!(ok.is_error.is_none());

        let failed = Message::tool_result_with_error("call_2", "Failed to read file", true);
        assert_eq!(failed.is_error, Some(true));
    }

    #[test]
    fn test_message_with_tool_calls() {
        let call = ToolCall::new("call_1", "echo", r#"{"text": "hi"}"#);
        let msg = Message::assistant_with_tools("Running...", vec![call]);

        assert!(msg.has_tool_calls());
        let calls = msg.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
    }

    #[test]
    fn test_message_with_attachment() {
        let msg =
            Message::user("what is this?").with_attachment(ImageAttachment::new("image/png", "aGk="));
        assert_eq!(msg.attachment.as_ref().unwrap().media_type, "image/png");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn test_role_serialize() {
        let json = serde_json::to_string(&Role::User).unwrap();
        assert_eq!(json, r#""user""#);
        let parsed: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Role::User);
    }

    #[test]
    fn test_message_serialization_skips_none() {
        let msg = Message::user("Hello");
        let json = serde_json::to_string(&msg).unwrap();

        // Optional fields should not be in JSON when None
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("is_error"));
        assert!(!json.contains("attachment"));
    }

    #[test]
    fn test_conversation_serialization() {
        let mut convo = Conversation::new("test");
        convo.push(Message::user("Hello"));
        convo.push(Message::assistant("Hi!"));

        let json = serde_json::to_string(&convo).unwrap();
        let parsed: Conversation = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, "test");
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].role, Role::User);
    }
}
