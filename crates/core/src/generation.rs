//! Normalized generation result.
//!
//! Upstream endpoints disagree on response shape; the generation client
//! folds them all into [`GenerationResult`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One produced image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl GeneratedImage {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: None,
            height: None,
            content_type: None,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// The outcome of one successful generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Never empty.
    pub images: Vec<GeneratedImage>,
    pub seed: Option<u64>,
    /// Per-stage timing breakdown in seconds.
    pub timings: Option<BTreeMap<String, f64>>,
    /// One flag per image, aligned by index with `images`.
    pub nsfw_flags: Option<Vec<bool>>,
    /// Estimated cost in USD.
    pub cost: Option<f64>,
    /// Provider request id, when the transport reports one.
    pub request_id: Option<String>,
    /// Wall time of the whole call, retries included.
    pub elapsed_ms: u64,
    /// Log lines of the attempt that succeeded.
    pub logs: Vec<String>,
    /// Untouched upstream payload.
    pub raw: serde_json::Value,
}

impl GenerationResult {
    /// The first image. Results are never empty.
    pub fn primary_image(&self) -> Option<&GeneratedImage> {
        self.images.first()
    }

    /// Whether the image at `index` was flagged as NSFW upstream.
    pub fn is_flagged(&self, index: usize) -> bool {
        self.nsfw_flags
            .as_ref()
            .and_then(|flags| flags.get(index).copied())
            .unwrap_or(false)
    }

    /// `(width, height)` pairs, for cost estimation.
    pub fn dimensions(&self) -> Vec<(Option<u32>, Option<u32>)> {
        self.images.iter().map(|i| (i.width, i.height)).collect()
    }
}
