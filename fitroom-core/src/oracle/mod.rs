//! Contracts for the three external AI oracles, plus the retry policy and
//! the Gemini transport that implements them.
//!
//! The rest of the crate depends only on these traits: send images and an
//! instruction, get an image, text, and token counts back.

pub mod gemini;
pub mod retry;

pub use gemini::GeminiClient;
pub use retry::RetryPolicy;

use crate::pricing::TokenUsage;
use crate::types::{FitRecommendation, ImageData, Measurements, SizeChart};

/// One image-generation call: ordered reference images and the instruction
/// text that follows them.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub images: Vec<ImageData>,
    pub instruction: String,
    /// Version of the instruction template that produced `instruction`.
    pub template_version: &'static str,
}

impl GenerationRequest {
    pub fn image_count(&self) -> u32 {
        u32::try_from(self.images.len()).unwrap_or(u32::MAX)
    }
}

/// A successful image-generation response.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub image: ImageData,
    /// Text the oracle sent alongside the image, if any.
    pub caption: Option<String>,
    pub usage: TokenUsage,
}

/// Image-generation oracle.
#[async_trait::async_trait]
pub trait ImageOracle: Send + Sync {
    /// Model identifier used for pricing.
    fn model_id(&self) -> &str;

    /// Run one generation attempt. Retries are the caller's concern.
    async fn generate(&self, request: &GenerationRequest) -> crate::error::Result<GeneratedImage>;
}

/// Fit-recommendation oracle.
#[async_trait::async_trait]
pub trait FitOracle: Send + Sync {
    /// Recommend a size from `chart` for `measurements`. Implementations
    /// return the raw recommendation; callers validate it.
    async fn recommend(
        &self,
        measurements: &Measurements,
        chart: &SizeChart,
    ) -> crate::error::Result<FitRecommendation>;
}

/// Measurement-estimation oracle.
#[async_trait::async_trait]
pub trait MeasurementOracle: Send + Sync {
    /// Estimate body measurements from a full-body photo.
    async fn estimate(&self, photo: &ImageData) -> crate::error::Result<Measurements>;
}
