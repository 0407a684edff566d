// Gemini restoration adapter
//
// Sends the instruction text and the original image as inline base64 to
// `models/{model}:generateContent` and returns the first inline image of the
// response. A response without an image is a failure, never a silent
// fallback to the original.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use timeglow_core::config::{GeminiSettings, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use timeglow_core::{ProviderError, ProviderOutput, RestorationProvider, RestorationRequest};
use tracing::{debug, instrument, warn};

use crate::types::{
    Content, ErrorResponse, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    Part,
};

/// Gemini image restoration provider
///
/// # Example
///
/// ```ignore
/// use timeglow_gemini::GeminiProvider;
///
/// let provider = GeminiProvider::new("your-api-key")
///     .with_timeout(Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Option<Duration>,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            timeout: None,
        }
    }

    pub fn from_settings(settings: &GeminiSettings) -> Self {
        Self::new(settings.api_key.clone())
            .with_base_url(settings.base_url.clone())
            .with_model(settings.model.clone())
    }

    /// Override the API root (e.g. a proxy or a test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Client-side request timeout, reported as [`ProviderError::Timeout`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn api_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request(request: &RestorationRequest<'_>) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part::text(request.instruction),
                    Part::image(request.content_type, BASE64.encode(request.image)),
                ],
            }],
            generation_config: GenerationConfig::default(),
        }
    }
}

/// Map a non-success HTTP status to a typed failure
///
/// A rejected key (401, 403) or an unknown model (404) fails the same way on
/// every attempt, so they are terminal along with malformed requests.
pub(crate) fn classify_status(status: StatusCode, message: String) -> ProviderError {
    match status.as_u16() {
        408 | 504 => ProviderError::Timeout(message),
        429 => ProviderError::QuotaExceeded(message),
        400 | 401 | 403 | 404 | 413 | 422 => ProviderError::InvalidInput(message),
        _ => ProviderError::TransientUnavailable(message),
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::TransientUnavailable(format!("request failed: {e}"))
    }
}

#[async_trait]
impl RestorationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip(self, request), fields(model = %self.model, size = request.image.len()))]
    async fn restore(
        &self,
        request: RestorationRequest<'_>,
    ) -> Result<ProviderOutput, ProviderError> {
        if request.image.is_empty() {
            return Err(ProviderError::InvalidInput("image is empty".to_string()));
        }

        let body = Self::build_request(&request);
        let mut http = self
            .client
            .post(self.api_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }

        let response = http.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| format!("{} ({}): {}", e.error.status, e.error.code, e.error.message))
                .unwrap_or(text);
            warn!(%status, "gemini returned an error");
            return Err(classify_status(status, format!("gemini {status}: {message}")));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::TransientUnavailable(format!("malformed response: {e}"))
            }
        })?;

        if let Some(reason) = parsed.block_reason() {
            return Err(ProviderError::InvalidInput(format!(
                "request blocked by provider: {reason}"
            )));
        }

        let image = parsed.first_image().ok_or_else(|| {
            ProviderError::InvalidInput("provider returned no image".to_string())
        })?;
        let data = BASE64.decode(image.data.as_bytes()).map_err(|e| {
            ProviderError::TransientUnavailable(format!("undecodable image data: {e}"))
        })?;

        debug!(content_type = %image.mime_type, size = data.len(), "restored image received");
        Ok(ProviderOutput::Restored {
            data,
            content_type: image.mime_type.clone(),
        })
    }
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("api_url", &self.api_url())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
