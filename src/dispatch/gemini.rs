use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::dispatch::TextGenerator;
use crate::error::DatafactError;

pub const PROVIDER: &str = "gemini";

pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Upstream error bodies are echoed into messages; keep them short.
const MAX_ERROR_BODY_CHARS: usize = 500;

pub const TEMPERATURE: f64 = 0.7;

/// Linear backoff: the wait after failed attempt `n` (1-based) is `n × unit`.
/// Throttling (429) and server errors (5xx) back off on the longer unit.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub backoff_unit: Duration,
    pub throttle_unit: Duration,
    /// Bounds a single request including the body read.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(2),
            throttle_unit: Duration::from_secs(3),
            attempt_timeout: Duration::from_secs(90),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32, err: &DatafactError) -> Duration {
        let unit = match err {
            DatafactError::RateLimited { .. } | DatafactError::Upstream { .. } => {
                self.throttle_unit
            }
            _ => self.backoff_unit,
        };
        unit * attempt
    }
}

#[derive(Serialize)]
struct GeminiPayload<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
}

impl<'a> GeminiPayload<'a> {
    fn new(system_prompt: &'a str, user_prompt: &'a str) -> Self {
        let system_instruction = (!system_prompt.is_empty()).then(|| GeminiContent {
            role: "user",
            parts: vec![RequestPart {
                text: system_prompt,
            }],
        });
        Self {
            contents: vec![GeminiContent {
                role: "user",
                parts: vec![RequestPart { text: user_prompt }],
            }],
            system_instruction,
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Pull the first non-empty text part out of a `generateContent` response.
pub fn extract_text(body: &[u8]) -> Result<String, DatafactError> {
    let response: GeminiResponse =
        serde_json::from_slice(body).map_err(|e| DatafactError::MalformedResponse {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        })?;

    response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.text)
        .find(|t| !t.is_empty())
        .ok_or_else(|| DatafactError::EmptyResponse {
            provider: PROVIDER.to_string(),
        })
}

/// Pooled client for the generative-language endpoint. Built once at startup
/// and shared by every pipeline task.
pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(50)
        .build()
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
}

impl GeminiClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = RetryPolicy {
            max_attempts: policy.max_attempts.max(1),
            ..policy
        };
        self
    }

    /// Generate text, retrying transient failures with linear backoff.
    pub async fn generate(
        &self,
        model: &str,
        api_key: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, DatafactError> {
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);
        let payload = GeminiPayload::new(system_prompt, user_prompt);
        let max_attempts = self.policy.max_attempts;
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            match self.attempt(&url, api_key, &payload).await {
                Ok(text) => {
                    if attempt > 1 {
                        tracing::debug!(model, attempt, "gemini call recovered after retry");
                    }
                    return Ok(text);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        model,
                        attempt,
                        max_attempts,
                        "gemini attempt failed: {}",
                        e.user_message()
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay_after(attempt, &e)).await;
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DatafactError::RetriesExhausted {
            provider: PROVIDER.to_string(),
            attempts: max_attempts,
            source: Box::new(
                last_err.unwrap_or_else(|| DatafactError::Other("no attempt made".to_string())),
            ),
        })
    }

    async fn attempt(
        &self,
        url: &str,
        api_key: &str,
        payload: &GeminiPayload<'_>,
    ) -> Result<String, DatafactError> {
        // The key travels in the query string; strip URLs from reqwest errors
        // so it never ends up in messages or logs.
        let response = self
            .client
            .post(url)
            .query(&[("key", api_key)])
            .timeout(self.policy.attempt_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| DatafactError::Request(e.without_url()))?;

        let status = response.status();

        // Body is read before the status is judged so the connection is
        // returned to the pool in every branch.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DatafactError::Request(e.without_url()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(DatafactError::RateLimited {
                provider: PROVIDER.to_string(),
            });
        }

        if status != StatusCode::OK {
            let text = String::from_utf8_lossy(&bytes);
            let preview: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(DatafactError::Upstream {
                provider: PROVIDER.to_string(),
                message: format!("{status}: {preview}"),
                status: Some(status.as_u16()),
            });
        }

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(DatafactError::Upstream {
                provider: PROVIDER.to_string(),
                message: format!(
                    "response too large: {} bytes (max {})",
                    bytes.len(),
                    MAX_RESPONSE_BYTES
                ),
                status: None,
            });
        }

        extract_text(&bytes)
    }
}

impl TextGenerator for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        api_key: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, DatafactError> {
        GeminiClient::generate(self, model, api_key, system_prompt, user_prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_omits_empty_system_instruction() {
        let body = serde_json::to_value(GeminiPayload::new("", "hello")).unwrap();
        assert!(body.get("system_instruction").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generation_config"]["temperature"], 0.7);
    }

    #[test]
    fn payload_carries_system_instruction() {
        let body = serde_json::to_value(GeminiPayload::new("be terse", "hello")).unwrap();
        assert_eq!(body["system_instruction"]["parts"][0]["text"], "be terse");
    }

    #[test]
    fn extract_text_takes_first_non_empty_part() {
        let body = br#"{"candidates":[
            {"content":{"parts":[{"text":""}]}},
            {"content":{"parts":[{"inlineData":{}},{"text":"second"}]}}
        ]}"#;
        assert_eq!(extract_text(body).unwrap(), "second");
    }

    #[test]
    fn extract_text_empty_candidates_is_retryable() {
        let err = extract_text(br#"{"candidates":[]}"#).unwrap_err();
        assert!(matches!(err, DatafactError::EmptyResponse { .. }));
        assert!(err.is_retryable());

        let err = extract_text(br#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap_err();
        assert!(matches!(err, DatafactError::EmptyResponse { .. }));
    }

    #[test]
    fn extract_text_garbage_is_malformed() {
        let err = extract_text(b"<html>").unwrap_err();
        assert!(matches!(err, DatafactError::MalformedResponse { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn delay_is_linear_and_throttle_aware() {
        let policy = RetryPolicy::default();
        let transient = DatafactError::EmptyResponse {
            provider: PROVIDER.to_string(),
        };
        let throttled = DatafactError::RateLimited {
            provider: PROVIDER.to_string(),
        };
        assert_eq!(policy.delay_after(1, &transient), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3, &transient), Duration::from_secs(6));
        assert_eq!(policy.delay_after(2, &throttled), Duration::from_secs(6));
    }

    #[test]
    fn with_policy_never_allows_zero_attempts() {
        let client = GeminiClient::new(Client::new(), "http://localhost/").with_policy(RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        });
        assert_eq!(client.policy.max_attempts, 1);
        assert_eq!(client.base_url, "http://localhost");
    }
}
