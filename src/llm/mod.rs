//! Generation backend abstraction.
//!
//! The engine treats text generation as an opaque, possibly-slow,
//! possibly-failing remote call behind a narrow trait, so retrieval and
//! cache correctness are testable with a stub generator and no network.

mod ollama;

pub use ollama::OllamaClient;

use crate::Result;
use std::time::Duration;

/// A single generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The fully assembled prompt.
    pub prompt: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Trait for text-generation backends.
pub trait GenerationClient: Send + Sync {
    /// The backend name, for logs.
    fn name(&self) -> &'static str;

    /// Generates text for the given request.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::GenerationTimeout`] if the backend exceeds
    /// its deadline, or [`crate::Error::GenerationUnavailable`] for any
    /// other backend failure. An empty completion is treated as a failure
    /// so it can never be cached as an answer.
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// HTTP client configuration for generation backends.
#[derive(Debug, Clone, Copy)]
pub struct LlmHttpConfig {
    /// Request timeout in milliseconds (0 to disable).
    pub timeout_ms: u64,
    /// Connect timeout in milliseconds (0 to disable).
    pub connect_timeout_ms: u64,
}

impl Default for LlmHttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl LlmHttpConfig {
    /// Loads HTTP configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("CRAFTLORE_LLM_TIMEOUT_MS") {
            if let Ok(timeout_ms) = v.parse::<u64>() {
                self.timeout_ms = timeout_ms;
            }
        }
        if let Ok(v) = std::env::var("CRAFTLORE_LLM_CONNECT_TIMEOUT_MS") {
            if let Ok(connect_timeout_ms) = v.parse::<u64>() {
                self.connect_timeout_ms = connect_timeout_ms;
            }
        }
        self
    }
}

/// Builds a blocking HTTP client with configured timeouts.
#[must_use]
pub fn build_http_client(config: LlmHttpConfig) -> reqwest::blocking::Client {
    let mut builder = reqwest::blocking::Client::builder();
    if config.timeout_ms > 0 {
        builder = builder.timeout(Duration::from_millis(config.timeout_ms));
    }
    if config.connect_timeout_ms > 0 {
        builder = builder.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
    }

    builder.build().unwrap_or_else(|err| {
        tracing::warn!("Failed to build LLM HTTP client: {err}");
        reqwest::blocking::Client::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_http_config() {
        let config = LlmHttpConfig::default();
        assert_eq!(config.timeout_ms, 60_000);
        assert_eq!(config.connect_timeout_ms, 3_000);
    }

    #[test]
    fn test_build_http_client_zero_timeouts() {
        // Disabled timeouts must still produce a usable client
        let _client = build_http_client(LlmHttpConfig {
            timeout_ms: 0,
            connect_timeout_ms: 0,
        });
    }
}
