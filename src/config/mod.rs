//! Configuration management for AttoClaw
//!
//! Configuration is loaded from `~/.attoclaw/config.toml` with environment
//! variable overrides following the pattern `ATTOCLAW_SECTION_KEY`.

mod types;

pub use types::*;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AttoError, Result};
use crate::providers::BackendKind;

impl Config {
    /// Returns the AttoClaw configuration directory path (~/.attoclaw)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".attoclaw")
    }

    /// Returns the path to the config file (~/.attoclaw/config.toml)
    pub fn path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| AttoError::Config(format!("invalid config file: {}", e)))?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ATTOCLAW_AGENT_MODEL") {
            self.agent.model = Some(val);
        }
        if let Ok(val) = std::env::var("ATTOCLAW_AGENT_MAX_TOKENS") {
            if let Ok(v) = val.parse() {
                self.agent.max_tokens = v;
            }
        }
        if let Ok(val) = std::env::var("ATTOCLAW_AGENT_TEMPERATURE") {
            if let Ok(v) = val.parse() {
                self.agent.temperature = Some(v);
            }
        }
        if let Ok(val) = std::env::var("ATTOCLAW_AGENT_MAX_TOOL_TURNS") {
            if let Ok(v) = val.parse() {
                self.agent.max_tool_turns = v;
            }
        }
        if let Ok(val) = std::env::var("ATTOCLAW_AGENT_KEEP_RECENT_TURNS") {
            if let Ok(v) = val.parse() {
                self.agent.keep_recent_turns = v;
            }
        }
        if let Ok(val) = std::env::var("ATTOCLAW_AGENT_SYSTEM_PROMPT_PATH") {
            self.agent.system_prompt_path = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("ATTOCLAW_BACKEND_KIND") {
            match BackendKind::from_str(&val) {
                Ok(kind) => self.backend.kind = kind,
                Err(e) => tracing::warn!(error = %e, "Ignoring ATTOCLAW_BACKEND_KIND"),
            }
        }
        if let Ok(val) = std::env::var("ATTOCLAW_BACKEND_API_KEY") {
            self.backend.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("ATTOCLAW_BACKEND_API_BASE") {
            self.backend.api_base = Some(val);
        }
    }
}
