//! HTTP client for the generation backend
//!
//! Article jobs post to `{article_url}/{mode}`; image and video jobs post to
//! their configured URL. Request bodies use the backend's snake_case field
//! names and carry `job_id` / `user_id` for backend-side tracing.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::client::*;
use crate::job::{ArticleMode, GenerationRequest, JobKind};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest backend error text kept in a job's `error` field
const MAX_ERROR_CHARS: usize = 500;

/// Per-kind backend URLs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationEndpoints {
    /// Prefix for article routes; the mode is appended (`/topic`, `/spin`, ...)
    pub article: Option<String>,
    pub image: Option<String>,
    pub video: Option<String>,
}

impl GenerationEndpoints {
    /// Derive the standard routes from the backend base URL
    pub fn from_base_url(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            article: Some(format!("{base}/api/generation")),
            image: Some(format!("{base}/api/images/generate")),
            video: Some(format!("{base}/api/videos/generate")),
        }
    }

    pub fn for_kind(&self, kind: JobKind) -> Option<&str> {
        match kind {
            JobKind::Article => self.article.as_deref(),
            JobKind::Image => self.image.as_deref(),
            JobKind::Video => self.video.as_deref(),
        }
    }

    pub fn set(&mut self, kind: JobKind, url: impl Into<String>) {
        let url = Some(url.into());
        match kind {
            JobKind::Article => self.article = url,
            JobKind::Image => self.image = url,
            JobKind::Video => self.video = url,
        }
    }

    /// Full URL for one request
    pub fn url_for(&self, request: &GenerationRequest) -> Option<String> {
        let base = self.for_kind(request.kind())?.trim_end_matches('/');
        Some(match request {
            GenerationRequest::Article(article) => format!("{base}/{}", article.mode.as_str()),
            _ => base.to_string(),
        })
    }
}

/// reqwest-backed [`GenerationClient`]
///
/// # Example
///
/// ```ignore
/// use contentgen_jobs::generation::{GenerationEndpoints, HttpGenerationClient};
///
/// let client = HttpGenerationClient::new(GenerationEndpoints::from_base_url("http://gpu-box:8000"))?;
/// ```
#[derive(Clone)]
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoints: GenerationEndpoints,
}

impl HttpGenerationClient {
    pub fn new(endpoints: GenerationEndpoints) -> Result<Self, GenerationError> {
        Self::with_connect_timeout(endpoints, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Only connection setup is bounded; the request itself may run indefinitely
    pub fn with_connect_timeout(
        endpoints: GenerationEndpoints,
        connect_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| GenerationError::Http(e.to_string()))?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &GenerationEndpoints {
        &self.endpoints
    }

    async fn call(&self, url: &str, body: &Value) -> Result<GenerationOutput, GenerationError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| GenerationError::Decode(e.to_string()))?;

        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        Ok(GenerationOutput::new(body))
    }
}

impl std::fmt::Debug for HttpGenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGenerationClient")
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    #[instrument(skip(self, request, cancel), fields(kind = %request.kind()))]
    async fn generate(
        &self,
        request: &GenerationRequest,
        job_id: Uuid,
        owner_id: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, GenerationError> {
        let url = self
            .endpoints
            .url_for(request)
            .ok_or(GenerationError::NotConfigured(request.kind()))?;
        let body = backend_body(request, job_id, owner_id);

        debug!(%url, "Calling generation backend");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(%job_id, "Generation call aborted");
                Err(GenerationError::Aborted)
            }
            result = self.call(&url, &body) => result,
        }
    }
}

/// Pull the most useful error text out of a backend response body
fn error_message(text: &str) -> String {
    let message = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| {
            ["detail", "error", "message"].iter().find_map(|key| {
                body.get(*key).map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            })
        })
        .unwrap_or_else(|| text.trim().to_string());

    let message = if message.is_empty() {
        "empty response body".to_string()
    } else {
        message
    };
    message.chars().take(MAX_ERROR_CHARS).collect()
}

/// Translate a request into the backend's snake_case request model
pub(crate) fn backend_body(request: &GenerationRequest, job_id: Uuid, owner_id: &str) -> Value {
    let mut body = match request {
        GenerationRequest::Article(a) => {
            let mut body = json!({
                "word_count": a.word_count,
                "tone": a.tone,
                "seo_optimization": a.seo_optimization,
                "use_web_search": a.use_web_search,
                "content_structure": a.content_structure,
                "include_images": a.include_images,
                "image_count": a.image_count,
                "image_style": a.image_style,
            });
            let extra = match a.mode {
                ArticleMode::Topic => json!({
                    "topic": a.topic,
                    "keywords": a.keywords,
                }),
                ArticleMode::Keywords => json!({
                    "keywords": a.keywords,
                    "keyword_density": a.keyword_density,
                }),
                ArticleMode::Trends => json!({
                    "trend_topic": a.topic,
                    "trend_url": a.trend_url,
                    "trend_description": a.trend_description,
                    "trend_source": a.trend_source,
                    "region": a.region,
                    "keywords": a.keywords,
                }),
                ArticleMode::Spin => json!({
                    "original_content": a.original_content,
                    "spin_angle": a.spin_angle,
                    "spin_intensity": a.spin_intensity,
                }),
            };
            merge(&mut body, extra);
            body
        }
        GenerationRequest::Image(i) => json!({
            "prompt": i.prompt,
            "width": i.width,
            "height": i.height,
            "style": i.style,
            "negative_prompt": i.negative_prompt,
            "steps": i.steps,
            "cfg_scale": i.cfg_scale,
            "seed": i.seed,
        }),
        GenerationRequest::Video(v) => json!({
            "prompt": v.prompt,
            "model_id": v.model_id,
            "width": v.width,
            "height": v.height,
            "negative_prompt": v.negative_prompt,
            "num_inference_steps": v.num_inference_steps,
            "guidance_scale": v.guidance_scale,
            "num_frames": v.num_frames,
            "seed": v.seed,
            "image": v.image,
        }),
    };

    merge(
        &mut body,
        json!({ "job_id": job_id.to_string(), "user_id": owner_id }),
    );
    body
}

fn merge(target: &mut Value, extra: Value) {
    if let (Value::Object(target), Value::Object(extra)) = (target, extra) {
        target.extend(extra);
    }
}
