//! The model caller: the orchestrator's only point of contact with a
//! language model. Every other component calls through [`ModelCaller`]
//! rather than holding its own HTTP client.
//!
//! Abstraction over the wire protocol for testability: production code talks
//! to [`HttpModelClient`], tests substitute [`MockModelClient`].

mod audit;
mod registry;
pub mod testing;

pub use audit::{CallRecord, CallStatus};
pub use registry::CapabilityRegistry;
pub use testing::MockModelClient;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::errors::ModelError;
use crate::substrate::Substrate;
use planloop_types::TraceContext;

/// Default per-call deadline, per the model caller's contract.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub capability: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(capability: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            capability: capability.into(),
            messages,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: u32,
    pub request_id: String,
}

/// Abstraction over the transport used to reach a model endpoint. Production
/// code uses [`HttpModelClient`]; tests substitute a fake.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        endpoint: &str,
        request: &CompletionRequest,
    ) -> Result<(String, u32), ModelError>;
}

/// Talks to a model endpoint over HTTP, POSTing an OpenAI-shaped chat
/// completion body and reading back `{content, tokens_used}`.
pub struct HttpModelClient {
    http: reqwest::Client,
}

impl HttpModelClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpModelClient {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    content: String,
    #[serde(default)]
    tokens_used: u32,
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn complete(
        &self,
        endpoint: &str,
        request: &CompletionRequest,
    ) -> Result<(String, u32), ModelError> {
        let body = ChatRequestBody {
            model: &request.capability,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let resp = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Transport(anyhow::Error::from(e)))?;

        if !resp.status().is_success() {
            return Err(ModelError::BadResponse {
                model: request.capability.clone(),
                reason: format!("endpoint returned status {}", resp.status()),
            });
        }

        let parsed: ChatResponseBody = resp
            .json()
            .await
            .map_err(|e| ModelError::BadResponse {
                model: request.capability.clone(),
                reason: e.to_string(),
            })?;
        Ok((parsed.content, parsed.tokens_used))
    }
}

/// The orchestrator's single entry point to the language model: resolves a
/// capability, assigns a request id, records the call to the audit bucket,
/// and enforces the deadline/cancellation contract.
pub struct ModelCaller {
    registry: CapabilityRegistry,
    client: Arc<dyn ModelClient>,
    substrate: Arc<Substrate>,
}

impl ModelCaller {
    pub fn new(registry: CapabilityRegistry, client: Arc<dyn ModelClient>, substrate: Arc<Substrate>) -> Self {
        Self {
            registry,
            client,
            substrate,
        }
    }

    #[instrument(skip(self, request, cancel), fields(capability = %request.capability, trace_id = %trace.trace_id))]
    pub async fn complete(
        &self,
        trace: &TraceContext,
        request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ModelError> {
        let endpoint = self
            .registry
            .resolve(&request.capability)
            .ok_or_else(|| ModelError::NoCapability {
                capability: request.capability.clone(),
            })?;

        let request_id = Uuid::new_v4().to_string();
        let prompt_hash = hash_messages(&request.messages);
        let started_at = chrono::Utc::now();
        let clock = Instant::now();

        let mut record = CallRecord::started(
            request_id.clone(),
            trace.clone(),
            request.capability.clone(),
            prompt_hash,
            started_at,
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                record.finish(CallStatus::Cancelled, 0, chrono::Utc::now());
                self.write_audit(&record).await;
                return Err(ModelError::Cancelled { capability: request.capability });
            }
            result = tokio::time::timeout(DEFAULT_DEADLINE, self.client.complete(&endpoint, &request)) => result,
        };

        match outcome {
            Err(_elapsed) => {
                record.finish(CallStatus::Timeout, 0, chrono::Utc::now());
                self.write_audit(&record).await;
                Err(ModelError::DeadlineExceeded {
                    capability: request.capability,
                    elapsed_ms: clock.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(err)) => {
                record.finish(CallStatus::Failed, 0, chrono::Utc::now());
                self.write_audit(&record).await;
                Err(err)
            }
            Ok(Ok((content, tokens_used))) => {
                record.finish(CallStatus::Succeeded, tokens_used, chrono::Utc::now());
                self.write_audit(&record).await;
                Ok(CompletionResponse {
                    content,
                    model: endpoint,
                    tokens_used,
                    request_id,
                })
            }
        }
    }

    async fn write_audit(&self, record: &CallRecord) {
        if let Err(err) = audit::write(&self.substrate, record).await {
            warn!(error = %err, request_id = %record.request_id, "failed to write model-call audit record");
        }
    }
}

fn hash_messages(messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    for m in messages {
        hasher.update(m.role.as_bytes());
        hasher.update(m.content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Extract the first top-level JSON value embedded in `text`, tolerating
/// markdown code fences and leading prose the way model responses often
/// carry them.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let fenced = text
        .split("```json")
        .nth(1)
        .or_else(|| text.split("```").nth(1));
    let candidate = fenced.unwrap_or(text);
    let candidate = candidate.trim().trim_end_matches("```").trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
        return Some(value);
    }

    let start = candidate.find(['{', '['])?;
    let end = candidate.rfind(['}', ']'])? + 1;
    if start >= end {
        return None;
    }
    serde_json::from_str(&candidate[start..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_reads_fenced_block() {
        let text = "Here is the plan:\n```json\n{\"goal\": \"ship caching\"}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["goal"], "ship caching");
    }

    #[test]
    fn extract_json_reads_bare_object_with_surrounding_prose() {
        let text = "Sure, {\"goal\": \"ship caching\"} is my answer.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["goal"], "ship caching");
    }

    #[test]
    fn extract_json_returns_none_for_non_json() {
        assert!(extract_json("no json here at all").is_none());
    }

    #[test]
    fn hash_messages_is_deterministic() {
        let messages = vec![Message::system("be terse"), Message::user("plan it")];
        assert_eq!(hash_messages(&messages), hash_messages(&messages));
    }

    #[tokio::test]
    async fn http_model_client_parses_chat_response_body() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "the plan",
                "tokens_used": 42,
            })))
            .mount(&server)
            .await;

        let client = HttpModelClient::new();
        let request = CompletionRequest::new("planning", vec![Message::user("plan it")]);
        let (content, tokens_used) = client
            .complete(&format!("{}/v1/complete", server.uri()), &request)
            .await
            .unwrap();
        assert_eq!(content, "the plan");
        assert_eq!(tokens_used, 42);
    }

    #[tokio::test]
    async fn http_model_client_surfaces_non_success_status_as_bad_response() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/complete"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = HttpModelClient::new();
        let request = CompletionRequest::new("planning", vec![Message::user("plan it")]);
        let err = client
            .complete(&format!("{}/v1/complete", server.uri()), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::BadResponse { .. }));
    }
}
