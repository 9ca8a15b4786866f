//! Development gateway that never leaves the process.

use async_trait::async_trait;

use super::{GatewayError, GeneratedMedia, GenerationOutput, GenerationRequest, Modality, ModelGateway};

pub const DUMMY_CAPTION: &str = "Golden light, good company, a moment worth keeping.";

/// Echoes the input image back for image requests and returns a fixed caption for text requests.
pub struct DummyGateway;

#[async_trait]
impl ModelGateway for DummyGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GatewayError> {
        tracing::debug!(prompt_len = request.prompt.len(), "Dummy gateway generating output");

        let media = if request.modalities.contains(&Modality::Image) {
            request.media.map(GeneratedMedia::Inline)
        } else {
            None
        };

        Ok(GenerationOutput {
            text: Some(DUMMY_CAPTION.to_string()),
            media,
        })
    }
}
