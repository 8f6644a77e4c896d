//! Ollama (local) generation client.

use super::{GenerationClient, GenerationRequest, LlmHttpConfig, build_http_client};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Ollama local generation client.
pub struct OllamaClient {
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "http://localhost:11434";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "phi3:mini";

    /// Creates a new Ollama client.
    #[must_use]
    pub fn new() -> Self {
        let endpoint =
            std::env::var("OLLAMA_HOST").unwrap_or_else(|_| Self::DEFAULT_ENDPOINT.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        Self {
            endpoint,
            model,
            client: build_http_client(LlmHttpConfig::from_env()),
        }
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets HTTP client timeouts.
    #[must_use]
    pub fn with_http_config(mut self, config: LlmHttpConfig) -> Self {
        self.client = build_http_client(config);
        self
    }

    /// Checks if the Ollama endpoint is reachable.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.endpoint))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationClient for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let payload = GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt.clone(),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                top_p: 0.9,
                num_predict: request.max_tokens,
                repeat_penalty: 1.1,
            },
        };

        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&payload)
            .send()
            .map_err(|e| {
                let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                if e.is_timeout() {
                    tracing::error!(
                        provider = "ollama",
                        model = %self.model,
                        elapsed_ms,
                        "generation request timed out"
                    );
                    metrics::counter!("generation_timeouts_total").increment(1);
                    Error::GenerationTimeout { elapsed_ms }
                } else {
                    let error_kind = if e.is_connect() {
                        "connect"
                    } else if e.is_request() {
                        "request"
                    } else {
                        "unknown"
                    };
                    tracing::error!(
                        provider = "ollama",
                        model = %self.model,
                        error = %e,
                        error_kind = error_kind,
                        "generation request failed"
                    );
                    metrics::counter!("generation_failures_total").increment(1);
                    Error::GenerationUnavailable {
                        cause: format!("{error_kind} error: {e}"),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            tracing::error!(
                provider = "ollama",
                model = %self.model,
                status = %status,
                body = %body,
                "generation API returned error status"
            );
            metrics::counter!("generation_failures_total").increment(1);
            return Err(Error::GenerationUnavailable {
                cause: format!("API returned status: {status} - {body}"),
            });
        }

        let response: GenerateResponse =
            response.json().map_err(|e| Error::GenerationUnavailable {
                cause: format!("failed to parse response: {e}"),
            })?;

        let answer = response.response.trim().to_string();
        if answer.is_empty() {
            // An empty completion must never propagate as an answer; the
            // cache would otherwise serve blanks forever
            return Err(Error::GenerationUnavailable {
                cause: "backend returned an empty completion".to_string(),
            });
        }

        tracing::debug!(
            provider = "ollama",
            model = %self.model,
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "generation complete"
        );
        Ok(answer)
    }
}

/// Request to the Generate API.
#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

/// Sampling options passed to the Generate API.
#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    repeat_penalty: f32,
}

/// Response from the Generate API.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OllamaClient::new();
        assert_eq!(client.name(), "ollama");
    }

    #[test]
    fn test_client_configuration() {
        let client = OllamaClient::new()
            .with_endpoint("http://localhost:12345")
            .with_model("gemma2:2b");

        assert_eq!(client.endpoint, "http://localhost:12345");
        assert_eq!(client.model, "gemma2:2b");
    }

    #[test]
    fn test_unreachable_endpoint_is_unavailable() {
        // Nothing listens on this port; the error must map to the typed
        // unavailable variant, not a panic or timeout
        let client = OllamaClient::new()
            .with_endpoint("http://127.0.0.1:1")
            .with_http_config(LlmHttpConfig {
                timeout_ms: 2_000,
                connect_timeout_ms: 500,
            });

        let err = client.generate(&GenerationRequest {
            prompt: "hello".to_string(),
            max_tokens: 16,
            temperature: 0.3,
        });

        assert!(matches!(
            err,
            Err(Error::GenerationUnavailable { .. } | Error::GenerationTimeout { .. })
        ));
    }
}
