//! Configuration type definitions for AttoClaw
//!
//! All types implement serde traits for TOML serialization and have
//! sensible defaults, so an absent config file means a working agent.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::agent::{DEFAULT_KEEP_RECENT, DEFAULT_MAX_TOOL_TURNS};
use crate::providers::BackendKind;

/// Main configuration struct for AttoClaw
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent configuration (model, tokens, turn ceiling)
    pub agent: AgentSettings,
    /// Backend selection and credentials
    pub backend: BackendSettings,
    /// Per-model context-window overrides (model id → window size in tokens)
    pub limits: HashMap<String, usize>,
}

/// Agent behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Model identifier; the backend's default model when unset
    pub model: Option<String>,
    /// Maximum tokens per model response
    pub max_tokens: u32,
    /// Sampling temperature; backend default when unset
    pub temperature: Option<f32>,
    /// Ceiling on tool-call turns per turn sequence
    pub max_tool_turns: usize,
    /// Recent messages kept verbatim by compaction
    pub keep_recent_turns: usize,
    /// Optional file the system prompt is loaded from
    pub system_prompt_path: Option<PathBuf>,
    /// Whether conditionally-visible tools are offered to the backend
    pub expose_conditional_tools: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 8192,
            temperature: None,
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
            keep_recent_turns: DEFAULT_KEEP_RECENT,
            system_prompt_path: None,
            expose_conditional_tools: false,
        }
    }
}

/// Backend selection and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Which backend family to talk to
    pub kind: BackendKind,
    /// API key; falls back to the family's conventional environment variable
    pub api_key: Option<String>,
    /// API base URL override (proxies, compatible gateways)
    pub api_base: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Anthropic,
            api_key: None,
            api_base: None,
        }
    }
}
