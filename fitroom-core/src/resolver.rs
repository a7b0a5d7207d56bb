//! Garment reference image resolution.
//!
//! Picks the right image for a garment and pose, decodes embedded data URIs
//! in place and fetches anything else. Failures degrade: a broken back view
//! falls back to the primary image, and a broken primary image yields `None`
//! so the garment is described by its attributes instead. Nothing is cached
//! between calls.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::types::{Garment, ImageData};

/// Source of remote image bytes.
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ImageData, FetchError>;
}

/// Fetches images over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        crate::oracle::gemini::install_crypto_provider();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

#[async_trait::async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<ImageData, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or_else(|| "image/png".to_string());

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody(url.to_string()));
        }
        Ok(ImageData::new(bytes.to_vec(), mime))
    }
}

/// Resolves garment reference images.
#[derive(Clone)]
pub struct GarmentImageResolver {
    fetcher: Arc<dyn ImageFetcher>,
}

impl std::fmt::Debug for GarmentImageResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GarmentImageResolver").finish_non_exhaustive()
    }
}

impl GarmentImageResolver {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve the reference image for `garment`.
    ///
    /// A custom garment with an uploaded image returns that image untouched
    /// and never consults a URL.
    pub async fn resolve(
        &self,
        garment: &Garment,
        custom_image: Option<&ImageData>,
        want_back_view: bool,
    ) -> Option<ImageData> {
        if garment.is_custom() {
            if let Some(image) = custom_image {
                return Some(image.clone());
            }
        }

        let back = garment
            .back_image_url
            .as_deref()
            .filter(|url| want_back_view && !url.trim().is_empty());

        if let Some(url) = back {
            match self.load(url).await {
                Ok(image) => return Some(image),
                Err(e) => {
                    warn!(garment = %garment.id, error = %e, "Back image unavailable, falling back to primary image");
                }
            }
        }

        if garment.image_url.trim().is_empty() {
            debug!(garment = %garment.id, "Garment has no image, describing by attributes");
            return None;
        }

        match self.load(&garment.image_url).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(garment = %garment.id, error = %e, "Garment image unavailable, describing by attributes");
                None
            }
        }
    }

    async fn load(&self, url: &str) -> Result<ImageData, FetchError> {
        if ImageData::is_data_uri(url) {
            ImageData::from_data_uri(url)
        } else {
            self.fetcher.fetch(url).await
        }
    }
}
