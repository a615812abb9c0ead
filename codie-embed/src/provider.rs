//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fnv::FnvHasher;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Trait for providers that turn a batch of texts into vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// On success the result holds exactly one vector per input, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Check that the configured credential is accepted.
    async fn verify_credentials(&self) -> Result<()> {
        self.embed_texts(&["ping".to_string()]).await.map(|_| ())
    }

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Provider for OpenAI-compatible `/embeddings` endpoints
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiProvider {
    /// Build an HTTP client for the configured endpoint.
    ///
    /// Fails with [`EmbedError::Auth`] when no credential is configured.
    pub fn new(config: &EmbedConfig) -> Result<Self> {
        if !config.has_credential() {
            return Err(EmbedError::auth("no API key configured"));
        }

        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|_| EmbedError::invalid_config("API key contains invalid characters"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbedError::invalid_config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            model: config.model.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send_error(&self, err: reqwest::Error) -> EmbedError {
        if err.is_timeout() {
            EmbedError::Timeout {
                seconds: self.timeout.as_secs(),
            }
        } else {
            err.into()
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, &body));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            EmbedError::invalid_response(format!("failed to parse embedding response: {e}"))
        })?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(EmbedError::invalid_response(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Map a non-success HTTP status to the error taxonomy.
///
/// Some compatible servers report throttling with a generic status, so a body
/// mentioning a rate limit is treated as one too.
fn classify_status(status: StatusCode, body: &str) -> EmbedError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match status.as_u16() {
        401 | 403 => EmbedError::auth(message),
        429 => EmbedError::rate_limited(message),
        500..=599 => EmbedError::transient(format!("{status}: {message}")),
        _ if message.to_lowercase().contains("rate limit") => EmbedError::rate_limited(message),
        code => EmbedError::Provider {
            status: code,
            message,
        },
    }
}

type FailureFn = Box<dyn Fn(&[String]) -> Option<EmbedError> + Send + Sync>;

/// Deterministic in-process provider for tests and dry runs.
///
/// Vectors are derived from an FNV hash of each text, so equal texts always get
/// equal vectors and distinct texts (almost surely) get distinct ones.
pub struct MockProvider {
    dimension: usize,
    delay: Option<Duration>,
    failure: Option<FailureFn>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("dimension", &self.dimension)
            .field("delay", &self.delay)
            .field("failure", &self.failure.is_some())
            .field("calls", &self.calls())
            .finish()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MockProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            delay: None,
            failure: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail any call for which `failure` returns an error.
    pub fn with_failure<F>(self, failure: F) -> Self
    where
        F: Fn(&[String]) -> Option<EmbedError> + Send + Sync + 'static,
    {
        Self {
            failure: Some(Box::new(failure)),
            ..self
        }
    }

    /// Hold every call open for `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The vector this provider returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        (0..self.dimension)
            .map(|i| {
                let mut hasher = FnvHasher::default();
                hasher.write(text.as_bytes());
                hasher.write_usize(i);
                let unit = hasher.finish() as f64 / u64::MAX as f64;
                (unit * 2.0 - 1.0) as f32
            })
            .collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every batch received so far, in arrival order.
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(texts.to_vec());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.failure.as_ref().and_then(|failure| failure(texts)) {
            Some(err) => Err(err),
            None => Ok(texts.iter().map(|text| self.vector_for(text)).collect()),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAiProvider {
        let config = EmbedConfig::new("sk-test").with_base_url(format!("{}/v1", server.uri()));
        OpenAiProvider::new(&config).unwrap()
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_embeds_in_request_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let vectors = provider_for(&server)
            .embed_texts(&texts(&["first", "second"]))
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let cases = [
            (401, r#"{"error":{"message":"Incorrect API key"}}"#),
            (429, r#"{"error":{"message":"Rate limit reached"}}"#),
            (503, "upstream unavailable"),
            (400, r#"{"error":{"message":"input too long"}}"#),
        ];

        for (status, body) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string(body))
                .mount(&server)
                .await;

            let err = provider_for(&server)
                .embed_texts(&texts(&["x"]))
                .await
                .unwrap_err();
            match status {
                401 => assert!(matches!(err, EmbedError::Auth { ref message } if message == "Incorrect API key")),
                429 => assert!(matches!(err, EmbedError::RateLimited { .. })),
                503 => assert!(matches!(err, EmbedError::Transient { .. })),
                _ => assert!(
                    matches!(err, EmbedError::Provider { status: 400, ref message } if message == "input too long")
                ),
            }
        }
    }

    #[test]
    fn test_rate_limit_message_with_generic_status() {
        let err = classify_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"Rate limit exceeded for model"}}"#,
        );
        assert!(matches!(err, EmbedError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .embed_texts(&texts(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_verify_credentials_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider_for(&server).verify_credentials().await.unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_missing_key_is_auth_error() {
        let err = OpenAiProvider::new(&EmbedConfig::new("")).unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_mock_provider_is_deterministic() -> Result<()> {
        let provider = MockProvider::new(4);
        let first = provider.embed_texts(&texts(&["a", "b"])).await?;
        let second = provider.embed_texts(&texts(&["a", "b"])).await?;

        assert_eq!(first, second);
        assert_eq!(first[0].len(), 4);
        assert_ne!(first[0], first[1]);
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.requests()[0], texts(&["a", "b"]));
        Ok(())
    }

    #[tokio::test]
    async fn test_mock_provider_failure_injection() {
        let provider = MockProvider::new(2).with_failure(|batch| {
            batch
                .iter()
                .any(|t| t == "poison")
                .then(|| EmbedError::transient("injected"))
        });

        assert!(provider.embed_texts(&texts(&["ok"])).await.is_ok());
        assert!(provider.embed_texts(&texts(&["poison"])).await.is_err());
        assert_eq!(provider.peak_in_flight(), 1);
    }
}
