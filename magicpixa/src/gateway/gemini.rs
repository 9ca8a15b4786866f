//! Google Gemini `generateContent` client.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::{GatewayError, GeneratedMedia, GenerationOutput, GenerationRequest, InlineMedia, Modality, ModelGateway};
use crate::config::GeminiConfig;

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: GeminiFileData,
    },
    Other(#[allow(dead_code)] Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFileData {
    file_uri: String,
}

pub struct GeminiGateway {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGateway {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.as_str().trim_end_matches('/'),
            model
        )
    }

    fn build_payload(request: &GenerationRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        if let Some(media) = &request.media {
            parts.push(json!({
                "inlineData": {
                    "mimeType": media.mime_type,
                    "data": general_purpose::STANDARD.encode(&media.data),
                }
            }));
        }

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": { "responseModalities": request.modalities },
        })
    }

    async fn send_once(&self, url: &str, payload: &Value) -> Result<GeminiResponse, GatewayError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        // A body that fails mid-read is a transport problem; one that reads but does not
        // parse is a terminal protocol problem.
        let body = response.bytes().await.map_err(|e| GatewayError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

/// Pull `error.message` out of a Gemini error body, falling back to a truncated raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

fn collect_output(response: GeminiResponse) -> Result<GenerationOutput, GatewayError> {
    let mut texts = Vec::new();
    let mut media = None;

    let parts = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.content)
        .filter_map(|c| c.parts)
        .flatten();

    for part in parts {
        match part {
            GeminiPart::Text { text } if !text.trim().is_empty() => texts.push(text),
            GeminiPart::InlineData { inline_data } if media.is_none() && inline_data.mime_type.starts_with("image/") => {
                let data = general_purpose::STANDARD
                    .decode(inline_data.data.as_bytes())
                    .map_err(|e| GatewayError::InvalidResponse(format!("inline image is not valid base64: {e}")))?;
                media = Some(GeneratedMedia::Inline(InlineMedia {
                    mime_type: inline_data.mime_type,
                    data: Bytes::from(data),
                }));
            }
            GeminiPart::FileData { file_data } if media.is_none() => {
                media = Some(GeneratedMedia::Url(file_data.file_uri));
            }
            _ => {}
        }
    }

    Ok(GenerationOutput {
        text: (!texts.is_empty()).then(|| texts.join("\n")),
        media,
    })
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    #[instrument(skip_all, fields(retries = request.retries))]
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, GatewayError> {
        let model = if request.modalities.contains(&Modality::Image) {
            &self.config.image_model
        } else {
            &self.config.text_model
        };
        let url = self.endpoint(model);
        let payload = Self::build_payload(&request);

        let mut attempt = 0;
        loop {
            match self.send_once(&url, &payload).await {
                Ok(response) => {
                    debug!(model = %model, attempt, "Gemini request succeeded");
                    return collect_output(response);
                }
                Err(e) if e.is_retryable() && attempt < request.retries => {
                    attempt += 1;
                    warn!(model = %model, attempt, error = %e, "Retrying Gemini request");
                    metrics::counter!("magicpixa_gateway_retries_total").increment(1);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    warn!(model = %model, attempt, error = %e, "Gemini request failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::install_crypto_provider;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const IMAGE_PATH: &str = "/v1beta/models/gemini-2.5-flash-image:generateContent";

    fn gateway(server: &MockServer) -> GeminiGateway {
        install_crypto_provider();
        GeminiGateway::new(GeminiConfig {
            api_key: "test-key".to_string(),
            base_url: Url::parse(&server.uri()).unwrap(),
            retry_delay: Duration::from_millis(1),
            ..GeminiConfig::default()
        })
        .unwrap()
    }

    fn image_request(retries: u32) -> GenerationRequest {
        GenerationRequest {
            prompt: "Enhance this photograph.".to_string(),
            media: Some(InlineMedia {
                mime_type: "image/jpeg".to_string(),
                data: Bytes::from_static(b"jpeg-bytes"),
            }),
            modalities: vec![Modality::Text, Modality::Image],
            retries,
        }
    }

    fn image_response() -> Value {
        json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Here is your photo." },
                        { "inlineData": { "mimeType": "image/png", "data": general_purpose::STANDARD.encode(b"png-bytes") } }
                    ]
                }
            }]
        })
    }

    #[tokio::test]
    async fn sends_prompt_and_image_and_decodes_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(IMAGE_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_response()))
            .expect(1)
            .mount(&server)
            .await;

        let output = gateway(&server).generate(image_request(0)).await.unwrap();

        assert_eq!(output.text.as_deref(), Some("Here is your photo."));
        assert_eq!(
            output.media,
            Some(GeneratedMedia::Inline(InlineMedia {
                mime_type: "image/png".to_string(),
                data: Bytes::from_static(b"png-bytes"),
            }))
        );

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Enhance this photograph.");
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"]["data"],
            general_purpose::STANDARD.encode(b"jpeg-bytes")
        );
    }

    #[tokio::test]
    async fn retries_server_errors_up_to_declared_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(IMAGE_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(IMAGE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(image_response()))
            .mount(&server)
            .await;

        let output = gateway(&server).generate(image_request(1)).await.unwrap();
        assert!(output.media.is_some());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_retries_are_spent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(IMAGE_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "error": { "message": "quota" } })))
            .expect(3)
            .mount(&server)
            .await;

        let err = gateway(&server).generate(image_request(2)).await.unwrap_err();
        match err {
            GatewayError::Status { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "quota");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(IMAGE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway(&server).generate(image_request(2)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn empty_candidates_are_returned_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(IMAGE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let output = gateway(&server).generate(image_request(2)).await.unwrap();
        assert!(output.require(Modality::Image).is_err());
    }

    #[tokio::test]
    async fn text_requests_use_text_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Sunset squad." }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = GenerationRequest {
            modalities: vec![Modality::Text],
            ..image_request(0)
        };
        let output = gateway(&server).generate(request).await.unwrap();
        assert_eq!(output.text.as_deref(), Some("Sunset squad."));
    }
}
