//! Echo tool
//!
//! Returns its `text` argument verbatim. Mostly useful for wiring checks
//! and tests; registered by the CLI so a fresh install has at least one
//! callable tool.

use async_trait::async_trait;
use serde_json::Value;

use super::Tool;

/// A tool that echoes back the provided text.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes back the provided text"
    }

    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The text to echo back"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> String {
        args.get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(no text)")
            .to_string()
    }
}
