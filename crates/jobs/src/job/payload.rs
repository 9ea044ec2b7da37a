//! Kind-specific generation payloads
//!
//! Payloads travel as `{"kind": "...", "payload": {...}}` both in queue
//! message bodies and in job records. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use super::model::JobKind;

/// Payload validation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    /// A field required by the selected mode is missing or empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A numeric field is outside its accepted range
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    /// A text field exceeds its maximum length
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Generation request, dispatched on `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum GenerationRequest {
    Article(ArticlePayload),
    Image(ImagePayload),
    Video(VideoPayload),
}

impl GenerationRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Article(_) => JobKind::Article,
            Self::Image(_) => JobKind::Image,
            Self::Video(_) => JobKind::Video,
        }
    }

    /// Check the payload against the backend's accepted ranges
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            Self::Article(p) => p.validate(),
            Self::Image(p) => p.validate(),
            Self::Video(p) => p.validate(),
        }
    }
}

/// How an article is seeded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleMode {
    #[default]
    Topic,
    Keywords,
    Trends,
    Spin,
}

impl ArticleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Keywords => "keywords",
            Self::Trends => "trends",
            Self::Spin => "spin",
        }
    }
}

fn default_word_count() -> u32 {
    1200
}

fn default_tone() -> String {
    "Professional".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_keyword_density() -> String {
    "natural".to_string()
}

fn default_region() -> String {
    "US".to_string()
}

fn default_spin_intensity() -> String {
    "medium".to_string()
}

/// Article generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlePayload {
    #[serde(default)]
    pub mode: ArticleMode,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_word_count")]
    pub word_count: u32,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub seo_optimization: bool,
    #[serde(default)]
    pub use_web_search: bool,
    #[serde(default = "default_auto")]
    pub content_structure: String,
    #[serde(default = "default_keyword_density")]
    pub keyword_density: String,
    #[serde(default)]
    pub include_images: bool,
    #[serde(default)]
    pub image_count: u32,
    #[serde(default = "default_auto")]
    pub image_style: String,

    // Trends mode
    #[serde(default)]
    pub trend_url: Option<String>,
    #[serde(default)]
    pub trend_description: Option<String>,
    #[serde(default)]
    pub trend_source: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,

    // Spin mode
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub spin_angle: Option<String>,
    #[serde(default = "default_spin_intensity")]
    pub spin_intensity: String,
}

impl ArticlePayload {
    /// Topic-mode article with backend defaults
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            mode: ArticleMode::Topic,
            topic: Some(topic.into()),
            keywords: vec![],
            word_count: default_word_count(),
            tone: default_tone(),
            seo_optimization: false,
            use_web_search: false,
            content_structure: default_auto(),
            keyword_density: default_keyword_density(),
            include_images: false,
            image_count: 0,
            image_style: default_auto(),
            trend_url: None,
            trend_description: None,
            trend_source: None,
            region: default_region(),
            original_content: None,
            spin_angle: None,
            spin_intensity: default_spin_intensity(),
        }
    }

    fn validate(&self) -> Result<(), PayloadError> {
        let has_topic = self
            .topic
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());

        match self.mode {
            ArticleMode::Topic | ArticleMode::Trends if !has_topic => {
                return Err(PayloadError::MissingField("topic"));
            }
            ArticleMode::Keywords if self.keywords.iter().all(|k| k.trim().is_empty()) => {
                return Err(PayloadError::MissingField("keywords"));
            }
            ArticleMode::Spin => {
                if self.original_content.as_deref().map_or(true, str::is_empty) {
                    return Err(PayloadError::MissingField("originalContent"));
                }
                if self.spin_angle.as_deref().map_or(true, str::is_empty) {
                    return Err(PayloadError::MissingField("spinAngle"));
                }
            }
            _ => {}
        }

        check_range("wordCount", self.word_count as f64, 100.0, 10_000.0)
    }
}

fn default_dimension() -> u32 {
    1024
}

fn default_style() -> Option<String> {
    Some("realistic".to_string())
}

fn default_steps() -> u32 {
    30
}

/// Image generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub prompt: String,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_style")]
    pub style: Option<String>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default)]
    pub cfg_scale: f64,
    #[serde(default)]
    pub seed: Option<i64>,
}

impl ImagePayload {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: default_dimension(),
            height: default_dimension(),
            style: default_style(),
            negative_prompt: None,
            steps: default_steps(),
            cfg_scale: 0.0,
            seed: None,
        }
    }

    fn validate(&self) -> Result<(), PayloadError> {
        check_prompt(&self.prompt)?;
        check_negative_prompt(self.negative_prompt.as_deref())?;
        check_range("width", self.width as f64, 256.0, 2048.0)?;
        check_range("height", self.height as f64, 256.0, 2048.0)?;
        check_range("steps", self.steps as f64, 10.0, 100.0)?;
        check_range("cfgScale", self.cfg_scale, 0.0, 20.0)
    }
}

fn default_video_steps() -> u32 {
    9
}

/// Video generation parameters (text-to-video, or image-to-video when `image` is set)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPayload {
    pub prompt: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_video_steps")]
    pub num_inference_steps: u32,
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    #[serde(default)]
    pub num_frames: Option<u32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub image: Option<String>,
}

impl VideoPayload {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model_id: None,
            width: None,
            height: None,
            negative_prompt: None,
            num_inference_steps: default_video_steps(),
            guidance_scale: None,
            num_frames: None,
            seed: None,
            image: None,
        }
    }

    fn validate(&self) -> Result<(), PayloadError> {
        check_prompt(&self.prompt)?;
        check_negative_prompt(self.negative_prompt.as_deref())?;
        if let Some(width) = self.width {
            check_range("width", width as f64, 256.0, 2048.0)?;
        }
        if let Some(height) = self.height {
            check_range("height", height as f64, 256.0, 2048.0)?;
        }
        check_range(
            "numInferenceSteps",
            self.num_inference_steps as f64,
            9.0,
            100.0,
        )?;
        if let Some(scale) = self.guidance_scale {
            check_range("guidanceScale", scale, 1.0, 20.0)?;
        }
        if let Some(frames) = self.num_frames {
            check_range("numFrames", frames as f64, 1.0, 200.0)?;
        }
        Ok(())
    }
}

const MAX_PROMPT_CHARS: usize = 1000;
const MAX_NEGATIVE_PROMPT_CHARS: usize = 500;

fn check_prompt(prompt: &str) -> Result<(), PayloadError> {
    if prompt.trim().is_empty() {
        return Err(PayloadError::MissingField("prompt"));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(PayloadError::TooLong {
            field: "prompt",
            max: MAX_PROMPT_CHARS,
        });
    }
    Ok(())
}

fn check_negative_prompt(negative: Option<&str>) -> Result<(), PayloadError> {
    match negative {
        Some(n) if n.chars().count() > MAX_NEGATIVE_PROMPT_CHARS => Err(PayloadError::TooLong {
            field: "negativePrompt",
            max: MAX_NEGATIVE_PROMPT_CHARS,
        }),
        _ => Ok(()),
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), PayloadError> {
    if value < min || value > max {
        return Err(PayloadError::OutOfRange {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}
