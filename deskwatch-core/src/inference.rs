//! Inference backends: the external service that turns a frame into a
//! structured detection/classification payload.
//!
//! Provides an `InferenceBackend` trait with one implementation:
//! - **Workflow** - an inference server exposing a workflow endpoint
//!   (`POST {api_url}/{workspace}/workflows/{workflow_id}`), either a local
//!   container or a hosted deployment.
//!
//! The pipeline treats the returned payload as opaque and persists it as-is.
//! Failed requests are not retried; the item is left without a result and
//! the next run picks it up again.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::DispatchConfig;

/// Environment variable holding the inference API key.
pub const API_KEY_ENV: &str = "INFERENCE_API_KEY";

// ============================================================================
// InferenceBackend trait
// ============================================================================

/// Abstraction over inference providers.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run inference on the image at `image` and return the raw payload.
    async fn infer(&self, image: &Path) -> Result<Value, ServiceError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to read image {path}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow not configured: set dispatch.workspace and dispatch.workflow_id")]
    MissingWorkflow,
}

impl ServiceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Http(e) if e.is_timeout())
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub workspace: String,
    pub workflow_id: String,
    pub use_cache: bool,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl WorkflowConfig {
    /// Build from the `[dispatch]` section, reading the API key from the
    /// environment. A local inference container needs no key.
    pub fn from_dispatch(config: &DispatchConfig) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());

        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            workspace: config.workspace.clone(),
            workflow_id: config.workflow_id.clone(),
            use_cache: config.use_cache,
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

// ============================================================================
// Workflow API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct WorkflowRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    inputs: WorkflowInputs,
    use_cache: bool,
}

#[derive(Debug, Serialize)]
struct WorkflowInputs {
    image: ImageInput,
}

#[derive(Debug, Serialize)]
struct ImageInput {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowResponse {
    outputs: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WorkflowErrorResponse {
    message: Option<String>,
}

// ============================================================================
// WorkflowClient
// ============================================================================

/// Calls a workflow endpoint on an inference server.
#[derive(Debug, Clone)]
pub struct WorkflowClient {
    client: Client,
    config: WorkflowConfig,
}

impl WorkflowClient {
    pub fn new(config: WorkflowConfig) -> Result<Self, ServiceError> {
        if config.workspace.is_empty() || config.workflow_id.is_empty() {
            return Err(ServiceError::MissingWorkflow);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/workflows/{}",
            self.config.api_url, self.config.workspace, self.config.workflow_id
        )
    }

    /// Run the workflow on raw image bytes.
    pub async fn run_workflow(&self, image: &[u8]) -> Result<Value, ServiceError> {
        let request = WorkflowRequest {
            api_key: self.config.api_key.as_deref(),
            inputs: WorkflowInputs {
                image: ImageInput {
                    kind: "base64",
                    value: general_purpose::STANDARD.encode(image),
                },
            },
            use_cache: self.config.use_cache,
        };

        let response = self.client.post(self.endpoint()).json(&request).send().await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WorkflowErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(error_body);

            tracing::debug!(code = status.as_u16(), message = %message, "Workflow API error");

            return Err(ServiceError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body: WorkflowResponse = response.json().await?;

        body.outputs
            .ok_or_else(|| ServiceError::InvalidResponse("missing 'outputs'".to_string()))
    }
}

#[async_trait]
impl InferenceBackend for WorkflowClient {
    async fn infer(&self, image: &Path) -> Result<Value, ServiceError> {
        let bytes = tokio::fs::read(image)
            .await
            .map_err(|e| ServiceError::ImageRead {
                path: image.to_path_buf(),
                source: e,
            })?;
        self.run_workflow(&bytes).await
    }

    fn name(&self) -> &str {
        "workflow"
    }
}

// ============================================================================
// TESTS
// ============================================================================
