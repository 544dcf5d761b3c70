use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/stabilityai/stable-diffusion-xl-base-1.0";
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("image generation request failed ({status})")]
    Http { status: u16 },
    #[error("image model still loading after {attempts} attempts")]
    ModelUnavailable { attempts: u32 },
    #[error("image generation transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("image generation returned an empty body")]
    EmptyBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub width: u32,
    pub height: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            num_inference_steps: 20,
            guidance_scale: 7.5,
            width: 512,
            height: 512,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
    pub api_key: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParams::default(),
            api_key,
        }
    }
}

/// Turns a prompt into an image reference (a `data:` URL for real backends).
pub trait ImageGenerator: Send + Sync {
    fn endpoint(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// How often a "model loading" (HTTP 503) answer is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub struct HuggingFaceClient {
    endpoint: String,
    retry: RetryPolicy,
    http: HttpClient,
}

impl HuggingFaceClient {
    pub fn new(endpoint: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            endpoint: endpoint.into(),
            retry,
            http: HttpClient::new(),
        }
    }

    fn send_once(
        &self,
        request: &GenerationRequest,
    ) -> Result<reqwest::blocking::Response, GenerationError> {
        let payload = json!({
            "inputs": request.prompt,
            "parameters": request.params,
        });
        let mut builder = self.http.post(&self.endpoint).json(&payload);
        if let Some(api_key) = request
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            builder = builder.bearer_auth(api_key);
        }
        Ok(builder.send()?)
    }
}

impl Default for HuggingFaceClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, RetryPolicy::default())
    }
}

impl ImageGenerator for HuggingFaceClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let response = self.send_once(request)?;
            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE {
                if attempt < max_attempts {
                    tracing::info!(
                        attempt,
                        max_attempts,
                        delay_ms = self.retry.delay.as_millis() as u64,
                        "image model is loading; waiting before retry"
                    );
                    thread::sleep(self.retry.delay);
                    continue;
                }
                break;
            }
            if !status.is_success() {
                return Err(GenerationError::Http {
                    status: status.as_u16(),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let bytes = response.bytes()?;
            if bytes.is_empty() {
                return Err(GenerationError::EmptyBody);
            }
            tracing::debug!(bytes = bytes.len(), "image generation succeeded");
            return Ok(encode_data_url(content_type.as_deref(), &bytes));
        }
        Err(GenerationError::ModelUnavailable {
            attempts: max_attempts,
        })
    }
}

/// Encodes image bytes as a `data:` URL. The declared content type wins when
/// it names an image; otherwise the format is sniffed from the bytes.
pub fn encode_data_url(content_type: Option<&str>, bytes: &[u8]) -> String {
    let declared = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| value.starts_with("image/"));
    let mime = declared.unwrap_or_else(|| {
        image::guess_format(bytes)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| FALLBACK_MIME.to_string())
    });
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}
