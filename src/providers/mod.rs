//! Providers module - LLM backends
//!
//! This module defines the `ChatBackend` trait and the two backend families
//! AttoClaw speaks to. The families use incompatible tool-invocation
//! protocols (typed-schema vs. JSON-Schema function calling); which one is
//! active is resolved exactly once at start-up from configuration via
//! [`BackendKind`] — never by string-matching model names at call time.

mod anthropic;
mod openai;
mod types;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BackendSettings;
use crate::error::{AttoError, ProviderError, Result};

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;
pub use types::{
    complete, ChatBackend, ChatOptions, ChatTurn, FunctionDef, FunctionToolSpec, RenderedTools,
    StreamAccumulator, StreamEvent, ToolProtocol, TypedToolSpec, Usage,
};

/// The backend family to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Anthropic Messages API (typed-schema tool protocol)
    Anthropic,
    /// OpenAI-compatible chat completions (function-calling tool protocol)
    OpenAi,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Anthropic => write!(f, "anthropic"),
            BackendKind::OpenAi => write!(f, "openai"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = AttoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Ok(BackendKind::Anthropic),
            "openai" => Ok(BackendKind::OpenAi),
            other => Err(AttoError::Config(format!(
                "unknown backend kind '{}' (expected 'anthropic' or 'openai')",
                other
            ))),
        }
    }
}

/// Environment variable consulted for the key when the config has none.
fn conventional_key_var(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::Anthropic => "ANTHROPIC_API_KEY",
        BackendKind::OpenAi => "OPENAI_API_KEY",
    }
}

/// Build the configured backend.
///
/// The API key comes from the config or, failing that, the conventional
/// environment variable for the family.
///
/// # Errors
/// Returns a config error when no API key can be found.
pub fn resolve_backend(settings: &BackendSettings) -> Result<Arc<dyn ChatBackend>> {
    let api_key = settings
        .api_key
        .clone()
        .or_else(|| std::env::var(conventional_key_var(settings.kind)).ok())
        .ok_or_else(|| {
            AttoError::Config(format!(
                "no API key for backend '{}'; set backend.api_key or {}",
                settings.kind,
                conventional_key_var(settings.kind)
            ))
        })?;

    let backend: Arc<dyn ChatBackend> = match settings.kind {
        BackendKind::Anthropic => {
            let mut backend = AnthropicBackend::new(&api_key);
            if let Some(base) = &settings.api_base {
                backend = backend.with_api_base(base);
            }
            Arc::new(backend)
        }
        BackendKind::OpenAi => {
            let mut backend = OpenAiBackend::new(&api_key);
            if let Some(base) = &settings.api_base {
                backend = backend.with_api_base(base);
            }
            Arc::new(backend)
        }
    };
    Ok(backend)
}

/// Parse an HTTP status code and response body into a [`ProviderError`].
///
/// Centralizes the status-code mapping so both backends produce consistent
/// typed errors.
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 => ProviderError::Auth(body.to_string()),
        402 => ProviderError::Billing(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 => ProviderError::InvalidRequest(body.to_string()),
        408 => ProviderError::Timeout(body.to_string()),
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("anthropic".parse::<BackendKind>().unwrap(), BackendKind::Anthropic);
        assert_eq!("OpenAI".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert!("mystery".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_backend_kind_display_roundtrip() {
        for kind in [BackendKind::Anthropic, BackendKind::OpenAi] {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_backend_kind_serde() {
        let json = serde_json::to_string(&BackendKind::OpenAi).unwrap();
        assert_eq!(json, r#""openai""#);
        let back: BackendKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BackendKind::OpenAi);
    }

    #[test]
    fn test_resolve_backend_with_explicit_key() {
        let settings = BackendSettings {
            kind: BackendKind::Anthropic,
            api_key: Some("sk-test".into()),
            api_base: None,
        };
        let backend = resolve_backend(&settings).unwrap();
        assert_eq!(backend.name(), "anthropic");
        assert_eq!(backend.protocol(), ToolProtocol::Typed);
    }

    #[test]
    fn test_resolve_backend_openai() {
        let settings = BackendSettings {
            kind: BackendKind::OpenAi,
            api_key: Some("sk-test".into()),
            api_base: Some("http://localhost:8000/v1".into()),
        };
        let backend = resolve_backend(&settings).unwrap();
        assert_eq!(backend.name(), "openai");
        assert_eq!(backend.protocol(), ToolProtocol::Functions);
    }

    #[test]
    fn test_parse_provider_error_classes() {
        assert!(matches!(
            parse_provider_error(401, "bad key"),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            parse_provider_error(402, "pay up"),
            ProviderError::Billing(_)
        ));
        assert!(matches!(
            parse_provider_error(404, "no model"),
            ProviderError::ModelNotFound(_)
        ));
        assert!(matches!(
            parse_provider_error(408, "slow"),
            ProviderError::Timeout(_)
        ));
        assert!(matches!(
            parse_provider_error(429, "slow down"),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            parse_provider_error(400, "bad json"),
            ProviderError::InvalidRequest(_)
        ));
        for status in [500, 502, 503, 504] {
            assert!(matches!(
                parse_provider_error(status, "boom"),
                ProviderError::ServerError(_)
            ));
        }
        let unknown = parse_provider_error(418, "teapot");
        assert!(matches!(unknown, ProviderError::Unknown(_)));
        assert!(unknown.to_string().contains("HTTP 418"));
    }
}
