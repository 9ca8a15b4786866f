//! Remote model gateway.
//!
//! The gateway turns a prompt plus an optional input image into text and/or media using a hosted
//! generative model. It owns no retry policy beyond the per-request retry count handed in by the
//! caller: transport failures, HTTP 429 and HTTP 5xx are retried, nothing else is.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::GatewayConfig;

pub mod dummy;
pub mod gemini;

/// Output channels requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub media: Option<InlineMedia>,
    pub modalities: Vec<Modality>,
    /// Additional attempts allowed after the first one fails with a retryable error
    pub retries: u32,
}

/// Media produced by the model, either returned inline or hosted by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedMedia {
    Inline(InlineMedia),
    Url(String),
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    pub text: Option<String>,
    pub media: Option<GeneratedMedia>,
}

impl GenerationOutput {
    /// Fail if the output the caller depends on is missing.
    pub fn require(self, expected: Modality) -> Result<Self, GatewayError> {
        match expected {
            Modality::Image if self.media.is_none() => Err(GatewayError::NoOutput("image".to_string())),
            Modality::Text if self.text.as_deref().is_none_or(|t| t.trim().is_empty()) => {
                Err(GatewayError::NoOutput("text".to_string()))
            }
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Model request failed: {0}")]
    Transport(String),

    #[error("Model API returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The response parsed but did not contain the requested output
    #[error("Model response did not contain any {0} output")]
    NoOutput(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            GatewayError::NoOutput(_) | GatewayError::InvalidResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GatewayError>;
}

/// Create the configured gateway.
pub fn create_gateway(config: &GatewayConfig) -> anyhow::Result<Arc<dyn ModelGateway>> {
    match config {
        GatewayConfig::Gemini(gemini_config) => Ok(Arc::new(gemini::GeminiGateway::new(gemini_config.clone())?)),
        GatewayConfig::Dummy => {
            tracing::warn!("Using the dummy model gateway: jobs will echo their input image");
            Ok(Arc::new(dummy::DummyGateway))
        }
    }
}
