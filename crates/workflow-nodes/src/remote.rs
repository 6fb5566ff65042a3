//! Remote generation service
//!
//! Node operations for engines, tools and conditioning call out to an
//! external image-generation service through [`GenerationClient`]. The
//! service's wire format is not the engine's concern; [`HttpGenerationClient`]
//! is one adapter that speaks a small JSON-over-HTTP dialect:
//!
//! | Call | Endpoint | Body |
//! |---|---|---|
//! | generate | `POST {base_url}/generate` | `{ prompt, model?, images }` |
//! | tool | `POST {base_url}/tools/{operation}` | `{ images }` |
//! | preprocess | `POST {base_url}/preprocess/{operator}` | `{ image }` |
//!
//! Every endpoint answers `{ "url": "..." }`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use node_engine::{Artifact, NodeEngineError, NodeInputs, ToolOperation};
use preprocessing::{PreprocessingError, Preprocessor};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure talking to the generation service
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("Failed to reach generation service: {0}")]
    Network(String),

    #[error("Generation service timed out: {0}")]
    Timeout(String),

    #[error("Generation service rejected credentials ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Generation service rate limit hit: {0}")]
    RateLimit(String),

    #[error("Generation service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("Generation service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Invalid response from generation service: {0}")]
    InvalidResponse(String),
}

impl From<RemoteError> for PreprocessingError {
    fn from(e: RemoteError) -> Self {
        let message = e.to_string();
        match e {
            RemoteError::Network(_) => PreprocessingError::Network(message),
            RemoteError::Timeout(_) => PreprocessingError::Timeout(message),
            RemoteError::Authentication { .. } => PreprocessingError::Authentication(message),
            RemoteError::RateLimit(_) => PreprocessingError::RateLimit(message),
            RemoteError::Rejected { .. } => PreprocessingError::Validation(message),
            RemoteError::UnsupportedType(_) => PreprocessingError::UnsupportedType(message),
            RemoteError::Service { .. } | RemoteError::InvalidResponse(_) => {
                PreprocessingError::Service(message)
            }
        }
    }
}

impl From<RemoteError> for NodeEngineError {
    fn from(e: RemoteError) -> Self {
        NodeEngineError::failed(e.to_string())
    }
}

/// Request for a generation engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Guide and init images keyed by input handle
    pub images: NodeInputs,
}

/// Operations of the external generation service
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<Artifact, RemoteError>;

    async fn run_tool(
        &self,
        operation: ToolOperation,
        images: Vec<Artifact>,
    ) -> Result<Artifact, RemoteError>;

    async fn preprocess(&self, image: &str, operator: &str) -> Result<Artifact, RemoteError>;
}

/// Where and how to reach the generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as a bearer token when set
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    url: String,
}

/// reqwest-backed [`GenerationClient`]
pub struct HttpGenerationClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    pub fn new(config: &ServiceConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<Artifact, RemoteError> {
        let url = self.endpoint(path);
        log::debug!("POST {}", url);

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(format!("{}: {}", url, e))
            } else {
                RemoteError::Network(format!("{}: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        let parsed: ArtifactResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        if parsed.url.trim().is_empty() {
            return Err(RemoteError::InvalidResponse("empty artifact url".to_string()));
        }
        Ok(parsed.url)
    }
}

/// Map a non-success HTTP status to a typed error
fn error_for_status(status: StatusCode, body: String) -> RemoteError {
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Authentication {
            status: code,
            message: body,
        },
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimit(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout(body),
        StatusCode::UNSUPPORTED_MEDIA_TYPE => RemoteError::UnsupportedType(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Rejected {
            status: code,
            message: body,
        },
        _ => RemoteError::Service {
            status: code,
            message: body,
        },
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(&self, request: GenerateRequest) -> Result<Artifact, RemoteError> {
        let body = serde_json::to_value(&request)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        self.post("generate", body).await
    }

    async fn run_tool(
        &self,
        operation: ToolOperation,
        images: Vec<Artifact>,
    ) -> Result<Artifact, RemoteError> {
        let path = format!("tools/{}", operation.as_str());
        self.post(&path, serde_json::json!({ "images": images })).await
    }

    async fn preprocess(&self, image: &str, operator: &str) -> Result<Artifact, RemoteError> {
        let path = format!("preprocess/{}", operator);
        self.post(&path, serde_json::json!({ "image": image })).await
    }
}

/// Runs conditioning preprocessing through a [`GenerationClient`]
pub struct RemotePreprocessor {
    client: Arc<dyn GenerationClient>,
}

impl RemotePreprocessor {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Preprocessor for RemotePreprocessor {
    async fn preprocess(
        &self,
        source_artifact: &str,
        operator: &str,
    ) -> preprocessing::Result<String> {
        Ok(self.client.preprocess(source_artifact, operator).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, String::new()),
            RemoteError::Authentication { status: 401, .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            RemoteError::RateLimit(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNPROCESSABLE_ENTITY, "bad size".into()),
            RemoteError::Rejected { status: 422, .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()),
            RemoteError::Service { status: 500, .. }
        ));
    }

    #[test]
    fn test_preprocessing_error_keeps_category() {
        let err: PreprocessingError = RemoteError::Timeout("30s".into()).into();
        assert!(matches!(err, PreprocessingError::Timeout(_)));

        let err: PreprocessingError = RemoteError::Rejected {
            status: 400,
            message: "bad image".into(),
        }
        .into();
        assert!(matches!(err, PreprocessingError::Validation(_)));

        let err: PreprocessingError = RemoteError::UnsupportedType("image/tiff".into()).into();
        assert!(matches!(err, PreprocessingError::UnsupportedType(_)));
    }

    #[test]
    fn test_engine_error_is_recoverable() {
        let err: NodeEngineError = RemoteError::Service {
            status: 500,
            message: "Service returned 500".into(),
        }
        .into();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Service returned 500"));
    }

    #[test]
    fn test_endpoints_ignore_trailing_slash() {
        let client = HttpGenerationClient::new(&ServiceConfig {
            base_url: "http://localhost:9000/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000");
        assert_eq!(client.endpoint("preprocess/pose"), "http://localhost:9000/preprocess/pose");
    }

    #[test]
    fn test_service_config_defaults() {
        let config: ServiceConfig = serde_json::from_str(r#"{"apiKey": "k"}"#).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.timeout_ms, 60_000);
    }

    #[test]
    fn test_generate_request_shape() {
        let mut images = NodeInputs::new();
        images.insert("pose".into(), "https://img/pose.png".into());
        let body = serde_json::to_value(GenerateRequest {
            prompt: "a cat".into(),
            model: None,
            images,
        })
        .unwrap();
        assert_eq!(body["prompt"], "a cat");
        assert!(body.get("model").is_none());
        assert_eq!(body["images"]["pose"], "https://img/pose.png");
    }
}
