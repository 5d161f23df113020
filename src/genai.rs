//! Generation backend: the `GenerationBackend` trait and the Gemini REST
//! implementation (text, image, video, file download).

use crate::config::ModelConfig;
use crate::error::{GenError, Result};

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One inline media part attached to a text generation request.
#[derive(Debug, Clone)]
pub struct InlinePart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A text generation request: one prompt plus optional inline media.
#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub prompt: String,
    pub media: Vec<InlinePart>,
}

/// Outcome of a text generation call.
#[derive(Debug, Clone, Default)]
pub struct TextResponse {
    /// Concatenated candidate text, if any was produced.
    pub text: Option<String>,
    /// Set when the backend refused the prompt itself.
    pub block_reason: Option<String>,
}

/// Handle for an asynchronous (long-running) generation operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub done: bool,
    /// Download reference for the finished artifact, present once done.
    pub result_uri: Option<String>,
}

/// Operations the reply pipeline needs from the generation service.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse>;

    /// Generate one image, returning its raw bytes.
    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>>;

    /// Start a video generation operation.
    async fn generate_video(&self, prompt: &str) -> Result<Operation>;

    /// Re-fetch the state of a long-running operation.
    async fn poll_operation(&self, operation: &Operation) -> Result<Operation>;

    /// Download a generated file by its reference.
    async fn download_file(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Gemini REST implementation.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    models: ModelConfig,
}

impl GeminiClient {
    pub fn new(api_key: String, models: ModelConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(GenError::Request)?;
        Ok(Self {
            http,
            api_key,
            models,
        })
    }

    fn safety_settings(&self) -> serde_json::Value {
        let safety = &self.models.safety;
        json!([
            { "category": "HARM_CATEGORY_HARASSMENT", "threshold": safety.harassment },
            { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": safety.hate_speech },
            { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": safety.sexually_explicit },
            { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": safety.dangerous_content },
            { "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": safety.civic_integrity },
        ])
    }

    async fn post_json(&self, operation: &str, url: String, body: serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(GenError::Request)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenError::Status {
                operation: operation.to_string(),
                status,
                body,
            }
            .into());
        }

        response
            .json()
            .await
            .map_err(|source| GenError::Request(source).into())
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResponse> {
        let mut parts = vec![json!({ "text": request.prompt })];
        for media in &request.media {
            parts.push(json!({
                "inline_data": {
                    "mime_type": media.mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&media.data),
                }
            }));
        }

        let url = format!("{API_BASE}/models/{}:generateContent", self.models.text_model);
        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "tools": [{ "google_search": {} }],
            "generationConfig": { "maxOutputTokens": 20000 },
            "safetySettings": self.safety_settings(),
        });

        let raw = self.post_json("generateContent", url, body).await?;
        let response: GenerateContentResponse =
            serde_json::from_value(raw).map_err(|error| GenError::UnexpectedResponse {
                operation: "generateContent".into(),
                message: error.to_string(),
            })?;

        let block_reason = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason);

        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .filter(|text| !text.trim().is_empty());

        Ok(TextResponse { text, block_reason })
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>> {
        let url = format!("{API_BASE}/models/{}:predict", self.models.image_model);
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "outputMimeType": "image/jpeg",
                "personGeneration": self.models.image_person_generation,
                "aspectRatio": "1:1",
            },
        });

        let raw = self.post_json("generateImages", url, body).await?;
        let encoded = raw
            .pointer("/predictions/0/bytesBase64Encoded")
            .and_then(|value| value.as_str())
            .ok_or(GenError::EmptyOutput)?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|error| {
                GenError::UnexpectedResponse {
                    operation: "generateImages".into(),
                    message: format!("invalid base64 payload: {error}"),
                }
                .into()
            })
    }

    async fn generate_video(&self, prompt: &str) -> Result<Operation> {
        let url = format!(
            "{API_BASE}/models/{}:predictLongRunning",
            self.models.video_model
        );
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "durationSeconds": 8,
                "personGeneration": self.models.video_person_generation,
            },
        });

        let raw = self.post_json("generateVideos", url, body).await?;
        let name = raw
            .get("name")
            .and_then(|value| value.as_str())
            .ok_or_else(|| GenError::UnexpectedResponse {
                operation: "generateVideos".into(),
                message: "missing operation name".into(),
            })?;

        Ok(Operation {
            name: name.to_string(),
            done: false,
            result_uri: None,
        })
    }

    async fn poll_operation(&self, operation: &Operation) -> Result<Operation> {
        let url = format!("{API_BASE}/{}", operation.name);
        let response = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(GenError::Request)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenError::Status {
                operation: "pollOperation".into(),
                status,
                body,
            }
            .into());
        }

        let raw: serde_json::Value = response.json().await.map_err(GenError::Request)?;
        let done = raw.get("done").and_then(|value| value.as_bool()).unwrap_or(false);
        let result_uri = raw
            .pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
            .and_then(|value| value.as_str())
            .map(|uri| uri.to_string());

        Ok(Operation {
            name: operation.name.clone(),
            done,
            result_uri,
        })
    }

    async fn download_file(&self, uri: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(uri)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(GenError::Request)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenError::Status {
                operation: "downloadFile".into(),
                status,
                body,
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(GenError::Request)?;
        Ok(bytes.to_vec())
    }
}
