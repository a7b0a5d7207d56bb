// Scripted oracles, fixture garments, and a session harness for end-to-end tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fitroom_core::catalog::StaticCatalog;
use fitroom_core::error::{FetchError, OracleError, RejectionKind};
use fitroom_core::ledger::CostLedger;
use fitroom_core::oracle::{FitOracle, GeneratedImage, GenerationRequest, ImageOracle, RetryPolicy};
use fitroom_core::pricing::TokenUsage;
use fitroom_core::resolver::ImageFetcher;
use fitroom_core::session::{SessionOptions, TryOnSession};
use fitroom_core::store::MemoryStore;
use fitroom_core::types::{
    FitRecommendation, Garment, ImageData, Measurements, SizeChart, SizeMeasurements, SizeOption,
    Slot,
};

pub const IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

// ── Image oracle ─────────────────────────────────────────────────

/// What the scripted image oracle does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return a fresh image.
    Image,
    /// Sleep, then return a fresh image.
    SlowImage(Duration),
    /// Zero candidates, as for a safety block.
    Empty,
    /// Structured rejection.
    Rejected(RejectionKind),
}

/// What one call received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub image_count: usize,
    pub instruction: String,
}

/// Image oracle that follows a script, then answers with images.
///
/// Every image it returns is distinct (`preview-<call>`), so tests can tell
/// which call produced a displayed or cached result.
#[derive(Debug)]
pub struct ScriptedImageOracle {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    requests: Mutex<Vec<RecordedRequest>>,
    usage: TokenUsage,
}

impl Default for ScriptedImageOracle {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScriptedImageOracle {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            usage: TokenUsage::new(1000, 1000, None),
        }
    }

    /// Append steps to the remaining script.
    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The image the n-th call (1-based) returns.
    pub fn image_for_call(n: u32) -> ImageData {
        ImageData::new(format!("preview-{n}").into_bytes(), "image/png")
    }
}

#[async_trait::async_trait]
impl ImageOracle for ScriptedImageOracle {
    fn model_id(&self) -> &str {
        IMAGE_MODEL
    }

    async fn generate(&self, request: &GenerationRequest) -> fitroom_core::error::Result<GeneratedImage> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(RecordedRequest {
            image_count: request.images.len(),
            instruction: request.instruction.clone(),
        });
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Image);

        match step {
            Step::Image => {}
            Step::SlowImage(delay) => tokio::time::sleep(delay).await,
            Step::Empty => {
                return Err(OracleError::EmptyResponse(
                    "The AI model did not provide a response (e.g., safety block).".to_string(),
                )
                .into());
            }
            Step::Rejected(kind) => {
                let code = match kind {
                    RejectionKind::PermissionDenied => 403,
                    RejectionKind::Transient => 500,
                    RejectionKind::Other => 400,
                };
                return Err(OracleError::from_api_error(Some(code), None, Some("scripted")).into());
            }
        }

        Ok(GeneratedImage {
            image: Self::image_for_call(n),
            caption: Some(format!("Preview {n}")),
            usage: self.usage,
        })
    }
}

// ── Fit oracle ───────────────────────────────────────────────────

/// Recommends the middle size of the chart with its neighbours as
/// alternatives. Charts with fewer than three sizes fail.
#[derive(Debug, Default)]
pub struct ScriptedFitOracle {
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedFitOracle {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            delay: Some(delay),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FitOracle for ScriptedFitOracle {
    async fn recommend(
        &self,
        _measurements: &Measurements,
        chart: &SizeChart,
    ) -> fitroom_core::error::Result<FitRecommendation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let sizes: Vec<&String> = chart.keys().collect();
        if sizes.len() < 3 {
            return Err(OracleError::Parse(format!(
                "cannot recommend from a {}-size chart",
                sizes.len()
            ))
            .into());
        }
        let mid = sizes.len() / 2;
        Ok(FitRecommendation {
            recommended_size: sizes[mid].clone(),
            projected_fit: "True to Size".to_string(),
            confidence_score: 0.85,
            alternatives: vec![
                SizeOption {
                    size: sizes[mid - 1].clone(),
                    fit: "Snug".to_string(),
                },
                SizeOption {
                    size: sizes[mid + 1].clone(),
                    fit: "Relaxed".to_string(),
                },
            ],
        })
    }
}

// ── Image fetcher ────────────────────────────────────────────────

/// Serves `https://cdn.test/...` URLs from memory. URLs containing
/// "broken" fail with HTTP 404. Every fetch is recorded.
#[derive(Debug, Default)]
pub struct FixtureFetcher {
    fetched: Mutex<Vec<String>>,
    overrides: Mutex<HashMap<String, ImageData>>,
}

impl FixtureFetcher {
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn serve(&self, url: &str, image: ImageData) {
        self.overrides.lock().unwrap().insert(url.to_string(), image);
    }
}

#[async_trait::async_trait]
impl ImageFetcher for FixtureFetcher {
    async fn fetch(&self, url: &str) -> Result<ImageData, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if url.contains("broken") {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: 404,
            });
        }
        if let Some(image) = self.overrides.lock().unwrap().get(url) {
            return Ok(image.clone());
        }
        Ok(ImageData::new(url.as_bytes().to_vec(), "image/png"))
    }
}

// ── Fixtures ─────────────────────────────────────────────────────

fn chart(sizes: &[&str]) -> SizeChart {
    let mut chart = SizeChart::new();
    for size in sizes {
        chart.insert(
            (*size).to_string(),
            SizeMeasurements {
                chest: Some("38-40".to_string()),
                ..SizeMeasurements::default()
            },
        );
    }
    chart
}

fn garment(id: &str, slot: Slot, garment_type: &str, sizes: &[&str]) -> Garment {
    Garment {
        id: id.to_string(),
        name: format!("Test {garment_type}"),
        brand: "Acme".to_string(),
        body_placement: slot,
        garment_type: garment_type.to_string(),
        color: "navy".to_string(),
        image_url: format!("https://cdn.test/{id}-front.png"),
        back_image_url: Some(format!("https://cdn.test/{id}-back.png")),
        side_image_url: None,
        size_chart: chart(sizes),
        description: Some(format!("A plain {garment_type}")),
    }
}

/// Upper garment "101" with sizes S, M, L, XL.
pub fn tee() -> Garment {
    garment("101", Slot::Upper, "t-shirt", &["S", "M", "L", "XL"])
}

/// Lower garment "202" with waist sizes 30 to 36.
pub fn jeans() -> Garment {
    garment("202", Slot::Lower, "jeans", &["30", "32", "34", "36"])
}

/// Lower garment "203" whose chart is too short to recommend from.
pub fn shorts() -> Garment {
    garment("203", Slot::Lower, "shorts", &["S", "M"])
}

/// Upper garment "104" whose back image always fails to load.
pub fn broken_back_hoodie() -> Garment {
    let mut hoodie = garment("104", Slot::Upper, "hoodie", &["S", "M", "L"]);
    hoodie.back_image_url = Some("https://cdn.test/broken/104-back.png".to_string());
    hoodie
}

pub fn sample_catalog() -> StaticCatalog {
    StaticCatalog::new(vec![tee(), jeans(), shorts(), broken_back_hoodie()])
}

pub fn model_photo() -> ImageData {
    ImageData::new(b"model-photo".to_vec(), "image/jpeg")
}

pub fn measurements() -> Measurements {
    Measurements {
        height: 70.0,
        weight: 165.0,
        chest: 40.0,
        waist: 32.0,
    }
}

// ── Harness ──────────────────────────────────────────────────────

/// A session wired to scripted collaborators, with handles to each.
pub struct Harness {
    pub session: TryOnSession,
    pub image_oracle: Arc<ScriptedImageOracle>,
    pub fit_oracle: Arc<ScriptedFitOracle>,
    pub fetcher: Arc<FixtureFetcher>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    /// Default retry policy (2 attempts, 500 ms apart) over `script`.
    pub fn new(script: Vec<Step>) -> Self {
        Self::with_parts(
            ScriptedImageOracle::new(script),
            ScriptedFitOracle::default(),
            RetryPolicy::default(),
        )
    }

    pub fn with_parts(
        image_oracle: ScriptedImageOracle,
        fit_oracle: ScriptedFitOracle,
        retry: RetryPolicy,
    ) -> Self {
        let image_oracle = Arc::new(image_oracle);
        let fit_oracle = Arc::new(fit_oracle);
        let fetcher = Arc::new(FixtureFetcher::default());
        let store = Arc::new(MemoryStore::new());

        let session = TryOnSession::builder(
            model_photo(),
            Arc::clone(&image_oracle) as Arc<dyn ImageOracle>,
            Arc::clone(&fit_oracle) as Arc<dyn FitOracle>,
        )
        .catalog(Arc::new(sample_catalog()))
        .fetcher(Arc::clone(&fetcher) as Arc<dyn ImageFetcher>)
        .ledger(CostLedger::new(Arc::clone(&store) as _))
        .measurements(measurements())
        .options(SessionOptions {
            retry,
            session_id: "test-session".to_string(),
            ..SessionOptions::default()
        })
        .build();

        Self {
            session,
            image_oracle,
            fit_oracle,
            fetcher,
            store,
        }
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("session", &self.session)
            .field("image_calls", &self.image_oracle.calls())
            .finish_non_exhaustive()
    }
}
