//! Try-on orchestration.
//!
//! A [`TryOnSession`] holds the user's selections and walks this state
//! machine on every size or pose change:
//!
//! ```text
//! NoSelection -> AwaitingSizes -> Ready -> Success | Failed
//! ```
//!
//! In `Ready` the selection's [`CacheKey`] is looked up. A hit succeeds with
//! no cost. A miss resolves both garment images in parallel, builds the
//! request, calls the image oracle under the retry policy, prices and records
//! the call, writes the cache, then succeeds.
//!
//! Every change bumps a ticket. A generation that completes after its ticket
//! was superseded still writes the cache under its own key but never
//! updates the displayed phase. At most one generation runs per key; a second
//! request for the same key waits and then reads the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheKey, TryOnCache};
use crate::catalog::{DefaultSizeChartPolicy, FirstCatalogMatch, GarmentCatalog, StaticCatalog};
use crate::config::FitroomConfig;
use crate::error::{FitroomError, ValidationError};
use crate::ledger::{CostLedger, CostMetadata};
use crate::oracle::gemini::caption_or_default;
use crate::oracle::{FitOracle, GenerationRequest, ImageOracle, RetryPolicy};
use crate::pricing::RateTable;
use crate::progress::{NoopReporter, ProgressReporter};
use crate::prompt::{self, SlotInput};
use crate::recommend::{RecommendationCoordinator, RecommendationRound, SlotState};
use crate::resolver::{GarmentImageResolver, HttpImageFetcher, ImageFetcher};
use crate::store::MemoryStore;
use crate::types::{
    Garment, ImageData, Measurements, Pose, Resolution, SavedOutfit, SizeChoice, Slot, TryOnResult,
};
use crate::wardrobe::{OutfitPiece, Wardrobe};

// ── Public state ────────────────────────────────────────────────────

/// What the user picked for one slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotSelection {
    pub garment: Option<Garment>,
    /// Uploaded photo backing a custom garment.
    pub custom_image: Option<ImageData>,
    pub choice: Option<SizeChoice>,
}

impl SlotSelection {
    fn key_part(&self) -> Option<(&str, &str)> {
        let garment = self.garment.as_ref()?;
        let choice = self.choice.as_ref()?;
        Some((garment.id.as_str(), choice.size.as_str()))
    }

    fn has_size(&self) -> bool {
        self.choice.as_ref().is_some_and(|c| !c.size.trim().is_empty())
    }
}

/// User-visible generation failure. A retry is always offered; `retryable`
/// says whether repeating the same request could plausibly help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnFailure {
    pub message: String,
    pub retryable: bool,
}

impl TryOnFailure {
    fn from_error(error: &FitroomError) -> Self {
        let message = match error {
            FitroomError::Oracle(e) => e.to_string(),
            other => other.to_string(),
        };
        Self {
            message,
            retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TryOnPhase {
    /// Neither slot has a garment.
    NoSelection,
    /// Selected slots still without a chosen size.
    AwaitingSizes { missing: Vec<Slot> },
    /// Cache lookup or generation pending for `key`.
    Ready { key: CacheKey },
    Success {
        key: CacheKey,
        result: Arc<TryOnResult>,
        from_cache: bool,
    },
    Failed {
        key: CacheKey,
        failure: TryOnFailure,
        /// Most recent success, labelled with the key it was generated for.
        last_success: Option<(CacheKey, Arc<TryOnResult>)>,
    },
}

impl TryOnPhase {
    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            Self::Ready { key } | Self::Success { key, .. } | Self::Failed { key, .. } => Some(key),
            Self::NoSelection | Self::AwaitingSizes { .. } => None,
        }
    }

    /// The result for the current selection, if it has been rendered.
    pub fn result(&self) -> Option<&Arc<TryOnResult>> {
        match self {
            Self::Success { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Result of a render request.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    /// The request still matched the selection; this is the new phase.
    Current(TryOnPhase),
    /// The selection changed while the request ran. A successful result was
    /// cached under `key` but not displayed.
    Superseded { key: CacheKey, succeeded: bool },
}

impl RenderOutcome {
    pub fn phase(&self) -> Option<&TryOnPhase> {
        match self {
            Self::Current(phase) => Some(phase),
            Self::Superseded { .. } => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded { .. })
    }
}

// ── Options and builder ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub retry: RetryPolicy,
    pub rates: RateTable,
    /// `None` keeps every preview for the lifetime of the session.
    pub cache_capacity: Option<usize>,
    pub brand_id: Option<String>,
    pub session_id: String,
    pub pose: Pose,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            rates: RateTable::builtin(),
            cache_capacity: None,
            brand_id: None,
            session_id: uuid::Uuid::new_v4().to_string(),
            pose: Pose::front(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &FitroomConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config.retry),
            rates: config.rate_table(),
            cache_capacity: config.cache.capacity,
            pose: config.poses.first().cloned().unwrap_or_else(Pose::front),
            ..Self::default()
        }
    }
}

pub struct TryOnSessionBuilder {
    model_photo: ImageData,
    image_oracle: Arc<dyn ImageOracle>,
    fit_oracle: Arc<dyn FitOracle>,
    catalog: Arc<dyn GarmentCatalog>,
    policy: Arc<dyn DefaultSizeChartPolicy>,
    fetcher: Option<Arc<dyn ImageFetcher>>,
    ledger: Option<CostLedger>,
    progress: Arc<dyn ProgressReporter>,
    measurements: Option<Measurements>,
    options: SessionOptions,
}

impl TryOnSessionBuilder {
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn GarmentCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    #[must_use]
    pub fn size_chart_policy(mut self, policy: Arc<dyn DefaultSizeChartPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn ledger(mut self, ledger: CostLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    #[must_use]
    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }

    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> TryOnSession {
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpImageFetcher::default()));
        let ledger = self
            .ledger
            .unwrap_or_else(|| CostLedger::new(Arc::new(MemoryStore::new())));
        let cache = match self.options.cache_capacity {
            Some(capacity) => TryOnCache::with_capacity(capacity),
            None => TryOnCache::unbounded(),
        };

        TryOnSession {
            image_oracle: self.image_oracle,
            resolver: GarmentImageResolver::new(fetcher),
            recommender: RecommendationCoordinator::new(self.fit_oracle, self.catalog, self.policy),
            cache,
            ledger,
            progress: self.progress,
            retry: self.options.retry,
            rates: self.options.rates,
            brand_id: self.options.brand_id,
            session_id: self.options.session_id,
            state: Mutex::new(SessionState {
                model_photo: self.model_photo,
                measurements: self.measurements,
                selections: Default::default(),
                pose: self.options.pose,
                phase: TryOnPhase::NoSelection,
                last_success: None,
                ticket: 0,
                photo_epoch: 0,
            }),
            in_flight: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────

struct SessionState {
    model_photo: ImageData,
    measurements: Option<Measurements>,
    selections: [SlotSelection; 2],
    pose: Pose,
    phase: TryOnPhase,
    last_success: Option<(CacheKey, Arc<TryOnResult>)>,
    /// Ticket of the request allowed to update `phase`.
    ticket: u64,
    /// Bumped on every model photo change. Cache keys do not encode the
    /// photo, so only generations from the current epoch may be cached.
    photo_epoch: u64,
}

impl SessionState {
    /// Phase before any lookup, or `None` when a key can be composed.
    fn pending_phase(&self) -> Option<TryOnPhase> {
        let selected: Vec<Slot> = Slot::ALL
            .into_iter()
            .filter(|slot| self.selections[slot.index()].garment.is_some())
            .collect();
        if selected.is_empty() {
            return Some(TryOnPhase::NoSelection);
        }
        let missing: Vec<Slot> = selected
            .into_iter()
            .filter(|slot| !self.selections[slot.index()].has_size())
            .collect();
        if !missing.is_empty() {
            return Some(TryOnPhase::AwaitingSizes { missing });
        }
        None
    }

    fn key(&self) -> Option<CacheKey> {
        CacheKey::compose(
            &self.pose.name,
            self.selections[Slot::Upper.index()].key_part(),
            self.selections[Slot::Lower.index()].key_part(),
        )
    }

    fn idle_phase(&self) -> TryOnPhase {
        match (self.pending_phase(), self.key()) {
            (Some(phase), _) => phase,
            (None, Some(key)) => TryOnPhase::Ready { key },
            (None, None) => TryOnPhase::NoSelection,
        }
    }
}

/// Snapshot of everything a generation needs, taken under the state lock.
struct GenerationPlan {
    key: CacheKey,
    ticket: u64,
    photo_epoch: u64,
    model_photo: ImageData,
    measurements: Option<Measurements>,
    upper: SlotSelection,
    lower: SlotSelection,
    pose: Pose,
}

pub struct TryOnSession {
    image_oracle: Arc<dyn ImageOracle>,
    resolver: GarmentImageResolver,
    recommender: RecommendationCoordinator,
    cache: TryOnCache,
    ledger: CostLedger,
    progress: Arc<dyn ProgressReporter>,
    retry: RetryPolicy,
    rates: RateTable,
    brand_id: Option<String>,
    session_id: String,
    state: Mutex<SessionState>,
    in_flight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    tickets: AtomicU64,
}

impl std::fmt::Debug for TryOnSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TryOnSession")
            .field("session_id", &self.session_id)
            .field("model", &self.image_oracle.model_id())
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}

impl TryOnSession {
    pub fn builder(
        model_photo: ImageData,
        image_oracle: Arc<dyn ImageOracle>,
        fit_oracle: Arc<dyn FitOracle>,
    ) -> TryOnSessionBuilder {
        TryOnSessionBuilder {
            model_photo,
            image_oracle,
            fit_oracle,
            catalog: Arc::new(StaticCatalog::default()),
            policy: Arc::new(FirstCatalogMatch),
            fetcher: None,
            ledger: None,
            progress: Arc::new(NoopReporter),
            measurements: None,
            options: SessionOptions::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session mutex poisoned")
    }

    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop the displayed result and stop any in-flight request from
    /// claiming the display.
    fn invalidate(&self, state: &mut SessionState) {
        state.ticket = self.next_ticket();
        state.phase = state.idle_phase();
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn phase(&self) -> TryOnPhase {
        self.lock().phase.clone()
    }

    /// What the user currently sees: the current result, or after a failure
    /// the last success with the key it belongs to.
    pub fn displayed(&self) -> Option<(CacheKey, Arc<TryOnResult>)> {
        match &self.lock().phase {
            TryOnPhase::Success { key, result, .. } => Some((key.clone(), Arc::clone(result))),
            TryOnPhase::Failed { last_success, .. } => last_success.clone(),
            _ => None,
        }
    }

    pub fn current_key(&self) -> Option<CacheKey> {
        self.lock().key()
    }

    pub fn pose(&self) -> Pose {
        self.lock().pose.clone()
    }

    pub fn selection(&self, slot: Slot) -> SlotSelection {
        self.lock().selections[slot.index()].clone()
    }

    pub fn measurements(&self) -> Option<Measurements> {
        self.lock().measurements
    }

    pub fn model_photo(&self) -> ImageData {
        self.lock().model_photo.clone()
    }

    pub fn recommendation(&self, slot: Slot) -> SlotState {
        self.recommender.state(slot)
    }

    pub fn cache(&self) -> &TryOnCache {
        &self.cache
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    // ── Selection changes ──────────────────────────────────────────

    /// Confirm measurements for the session.
    pub fn set_measurements(&self, measurements: Measurements) -> Result<(), ValidationError> {
        measurements.validate()?;
        self.lock().measurements = Some(measurements);
        Ok(())
    }

    /// Replace the model photo. Cached previews show the old photo, so the
    /// cache is cleared.
    pub fn set_model_photo(&self, photo: ImageData) {
        let mut state = self.lock();
        state.model_photo = photo;
        state.photo_epoch += 1;
        state.last_success = None;
        let dropped = self.cache.clear();
        if dropped > 0 {
            debug!(dropped, "Cleared try-on cache after model photo change");
        }
        self.invalidate(&mut state);
    }

    /// Put a garment in `slot` (or clear it). The slot's size choice and
    /// recommendation are reset.
    pub fn select_garment(
        &self,
        slot: Slot,
        garment: Option<Garment>,
        custom_image: Option<ImageData>,
    ) -> TryOnPhase {
        self.recommender.reset(slot);
        let mut state = self.lock();
        state.selections[slot.index()] = SlotSelection {
            garment,
            custom_image,
            choice: None,
        };
        self.invalidate(&mut state);
        state.phase.clone()
    }

    /// Fetch fit recommendations for the selected garments and seed each
    /// slot that has no size yet with its recommended size.
    #[instrument(skip_all)]
    pub async fn fetch_recommendations(&self) -> Result<RecommendationRound, ValidationError> {
        let (measurements, upper, lower) = {
            let state = self.lock();
            let measurements = state.measurements.ok_or_else(|| {
                ValidationError::IncompleteMeasurements("measurements have not been provided".to_string())
            })?;
            (
                measurements,
                state.selections[Slot::Upper.index()].garment.clone(),
                state.selections[Slot::Lower.index()].garment.clone(),
            )
        };

        let round = self
            .recommender
            .recommend(&measurements, upper.as_ref(), lower.as_ref())
            .await?;

        let mut state = self.lock();
        let mut seeded = false;
        for slot in Slot::ALL {
            let Some(rec) = round.get(slot).recommendation() else { continue };
            let selection = &mut state.selections[slot.index()];
            let same_garment = match (&selection.garment, slot) {
                (Some(g), Slot::Upper) => upper.as_ref().is_some_and(|u| u.id == g.id),
                (Some(g), Slot::Lower) => lower.as_ref().is_some_and(|l| l.id == g.id),
                (None, _) => false,
            };
            if same_garment && selection.choice.is_none() {
                selection.choice = Some(rec.default_choice());
                seeded = true;
            }
        }
        if seeded {
            self.invalidate(&mut state);
        }
        Ok(round)
    }

    /// Pick the size to preview for `slot`, then render.
    pub async fn choose_size(&self, slot: Slot, choice: SizeChoice) -> RenderOutcome {
        if !self.set_size(slot, choice) {
            return RenderOutcome::Current(self.phase());
        }
        self.render().await
    }

    /// Pick the size for `slot` without rendering. Returns `false` when the
    /// slot is empty.
    pub fn set_size(&self, slot: Slot, choice: SizeChoice) -> bool {
        let mut state = self.lock();
        if state.selections[slot.index()].garment.is_none() {
            warn!(slot = %slot, "Ignoring size choice for an empty slot");
            return false;
        }
        state.selections[slot.index()].choice = Some(choice);
        self.invalidate(&mut state);
        true
    }

    /// Switch pose, then render.
    pub async fn set_pose(&self, pose: Pose) -> RenderOutcome {
        {
            let mut state = self.lock();
            state.pose = pose;
            self.invalidate(&mut state);
        }
        self.render().await
    }

    // ── Rendering ──────────────────────────────────────────────────

    /// Show the preview for the current selection, from cache or generated.
    pub async fn render(&self) -> RenderOutcome {
        self.run(false).await
    }

    /// Generate the current selection again, ignoring and then overwriting
    /// any cached preview.
    pub async fn regenerate(&self) -> RenderOutcome {
        self.run(true).await
    }

    #[instrument(skip_all, fields(force = force))]
    async fn run(&self, force: bool) -> RenderOutcome {
        let plan = {
            let mut state = self.lock();
            if let Some(phase) = state.pending_phase() {
                state.ticket = self.next_ticket();
                state.phase = phase.clone();
                return RenderOutcome::Current(phase);
            }
            let Some(key) = state.key() else {
                state.phase = TryOnPhase::NoSelection;
                return RenderOutcome::Current(TryOnPhase::NoSelection);
            };

            let ticket = self.next_ticket();
            state.ticket = ticket;

            if !force {
                if let Some(hit) = self.cache.get(&key) {
                    return RenderOutcome::Current(commit_success(&mut state, key, hit, true));
                }
            }

            state.phase = TryOnPhase::Ready { key: key.clone() };
            GenerationPlan {
                key,
                ticket,
                photo_epoch: state.photo_epoch,
                model_photo: state.model_photo.clone(),
                measurements: state.measurements,
                upper: state.selections[Slot::Upper.index()].clone(),
                lower: state.selections[Slot::Lower.index()].clone(),
                pose: state.pose.clone(),
            }
        };

        let gate = self.gate(&plan.key);
        let outcome = {
            let _in_flight = gate.lock().await;
            // Another request for this key may have finished while we waited.
            let reuse = !force && self.lock().photo_epoch == plan.photo_epoch;
            match reuse.then(|| self.cache.peek(&plan.key)).flatten() {
                Some(hit) => Ok((hit, true)),
                None => self.generate(&plan).await.map(|result| (result, false)),
            }
        };
        self.release_gate(&plan.key, gate);

        self.commit(plan.ticket, plan.key, outcome)
    }

    fn gate(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
        Arc::clone(in_flight.entry(key.clone()).or_default())
    }

    fn release_gate(&self, key: &CacheKey, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
        drop(gate);
        // Clones are only taken under this lock, so a count of one means idle.
        if in_flight.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            in_flight.remove(key);
        }
    }

    async fn generate(&self, plan: &GenerationPlan) -> crate::error::Result<Arc<TryOnResult>> {
        self.progress.stage("Resolving garment images");
        let back_view = plan.pose.back_view;
        let (upper_image, lower_image) = tokio::join!(
            self.resolve_slot(&plan.upper, back_view),
            self.resolve_slot(&plan.lower, back_view),
        );

        let request = prompt::build_try_on_request(
            &plan.model_photo,
            plan.measurements.as_ref(),
            slot_input(&plan.upper, upper_image),
            slot_input(&plan.lower, lower_image),
            &plan.pose,
        )?;
        debug!(
            key = %plan.key,
            images = request.image_count(),
            template = request.template_version,
            "Built try-on request"
        );

        let result = self.call_image_oracle("try-on", &request).await?;
        {
            // Checked under the state lock so a concurrent photo change
            // cannot clear the cache between the check and the write.
            let state = self.lock();
            if state.photo_epoch != plan.photo_epoch {
                debug!(key = %plan.key, "Not caching a preview of the previous model photo");
                return Ok(result);
            }
            self.cache.put(plan.key.clone(), Arc::clone(&result));
        }
        info!(
            key = %plan.key,
            cost_usd = result.cost.cost_usd,
            resolution = result.resolution.as_str(),
            "Generated try-on preview"
        );
        Ok(result)
    }

    async fn resolve_slot(&self, selection: &SlotSelection, back_view: bool) -> Option<ImageData> {
        if selection.choice.is_none() {
            return None;
        }
        let garment = selection.garment.as_ref()?;
        self.resolver
            .resolve(garment, selection.custom_image.as_ref(), back_view)
            .await
    }

    /// Generate with retries, then price and record the call.
    async fn call_image_oracle(
        &self,
        label: &str,
        request: &GenerationRequest,
    ) -> crate::error::Result<Arc<TryOnResult>> {
        self.progress.stage("Generating preview");
        let oracle = &self.image_oracle;
        let generated = self
            .retry
            .run(label, |_| oracle.generate(request))
            .await;
        self.progress.finish();
        let generated = generated?;

        let cost = self.rates.price(self.image_oracle.model_id(), generated.usage);
        let resolution = Resolution::estimate(&generated.image);
        self.ledger
            .record(
                &cost,
                CostMetadata {
                    brand_id: self.brand_id.clone(),
                    session_id: Some(self.session_id.clone()),
                    images_in: request.image_count(),
                    images_out: 1,
                    resolution: Some(resolution),
                },
            )
            .await;

        Ok(Arc::new(TryOnResult {
            caption: caption_or_default(generated.caption.as_deref()),
            image: generated.image,
            cost,
            resolution,
        }))
    }

    fn commit(
        &self,
        ticket: u64,
        key: CacheKey,
        outcome: crate::error::Result<(Arc<TryOnResult>, bool)>,
    ) -> RenderOutcome {
        let mut state = self.lock();
        if state.ticket != ticket {
            debug!(key = %key, "Discarding stale try-on result from the display");
            return RenderOutcome::Superseded {
                key,
                succeeded: outcome.is_ok(),
            };
        }
        match outcome {
            Ok((result, from_cache)) => {
                RenderOutcome::Current(commit_success(&mut state, key, result, from_cache))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Try-on generation failed");
                let phase = TryOnPhase::Failed {
                    key,
                    failure: TryOnFailure::from_error(&e),
                    last_success: state.last_success.clone(),
                };
                state.phase = phase.clone();
                RenderOutcome::Current(phase)
            }
        }
    }

    // ── Supplementary operations ───────────────────────────────────

    /// Turn an uploaded photo into a clean model photo (neutral pose, studio
    /// background, identity preserved) and use it for this session.
    #[instrument(skip_all)]
    pub async fn prepare_model_photo(&self, photo: &ImageData) -> crate::error::Result<ImageData> {
        let request = prompt::build_model_photo_request(photo);
        let result = self.call_image_oracle("model-photo", &request).await?;
        self.set_model_photo(result.image.clone());
        Ok(result.image.clone())
    }

    /// Save the preview currently shown for the current selection.
    pub async fn save_outfit(&self, wardrobe: &Wardrobe) -> Option<SavedOutfit> {
        let (result, upper, lower) = {
            let state = self.lock();
            let result = Arc::clone(state.phase.result()?);
            (
                result,
                state.selections[Slot::Upper.index()].clone(),
                state.selections[Slot::Lower.index()].clone(),
            )
        };
        wardrobe
            .save(&result.image, outfit_piece(&upper), outfit_piece(&lower))
            .await
    }
}

fn commit_success(
    state: &mut SessionState,
    key: CacheKey,
    result: Arc<TryOnResult>,
    from_cache: bool,
) -> TryOnPhase {
    state.last_success = Some((key.clone(), Arc::clone(&result)));
    state.phase = TryOnPhase::Success {
        key,
        result,
        from_cache,
    };
    state.phase.clone()
}

fn slot_input(selection: &SlotSelection, reference: Option<ImageData>) -> Option<SlotInput<'_>> {
    Some(SlotInput {
        garment: selection.garment.as_ref()?,
        reference,
        choice: selection.choice.as_ref()?,
    })
}

fn outfit_piece(selection: &SlotSelection) -> Option<OutfitPiece<'_>> {
    Some(OutfitPiece {
        garment: selection.garment.as_ref()?,
        size: selection.choice.as_ref()?.size.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32};

    use super::*;
    use crate::error::OracleError;
    use crate::oracle::GeneratedImage;
    use crate::pricing::TokenUsage;
    use crate::types::{FitRecommendation, SizeChart};

    struct CountingOracle {
        calls: AtomicU32,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ImageOracle for CountingOracle {
        fn model_id(&self) -> &str {
            "gemini-3-pro-image-preview"
        }

        async fn generate(&self, request: &GenerationRequest) -> crate::error::Result<GeneratedImage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(OracleError::EmptyResponse("The AI failed to generate an image preview.".into()).into());
            }
            Ok(GeneratedImage {
                image: ImageData::new(format!("render-{n}-{}", request.images.len()).into_bytes(), "image/png"),
                caption: None,
                usage: TokenUsage::new(1000, 1000, None),
            })
        }
    }

    struct NoFit;

    #[async_trait::async_trait]
    impl FitOracle for NoFit {
        async fn recommend(&self, _m: &Measurements, _c: &SizeChart) -> crate::error::Result<FitRecommendation> {
            Err(OracleError::Unavailable("not needed".into()).into())
        }
    }

    struct NoFetch;

    #[async_trait::async_trait]
    impl ImageFetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<ImageData, crate::error::FetchError> {
            Err(crate::error::FetchError::Http { url: url.to_string(), status: 404 })
        }
    }

    fn session() -> (TryOnSession, Arc<CountingOracle>) {
        let oracle = Arc::new(CountingOracle {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        });
        let session = TryOnSession::builder(
            ImageData::new(b"me".to_vec(), "image/jpeg"),
            Arc::clone(&oracle) as Arc<dyn ImageOracle>,
            Arc::new(NoFit),
        )
        .fetcher(Arc::new(NoFetch))
        .options(SessionOptions {
            retry: RetryPolicy::new(2, std::time::Duration::ZERO),
            ..SessionOptions::default()
        })
        .build();
        (session, oracle)
    }

    fn shirt() -> Garment {
        let mut g = Garment::custom(Slot::Upper, "shirt", "white");
        g.id = "11".into();
        g
    }

    #[tokio::test]
    async fn phases_progress_from_no_selection() {
        let (session, oracle) = session();
        assert_eq!(session.render().await, RenderOutcome::Current(TryOnPhase::NoSelection));

        let phase = session.select_garment(Slot::Upper, Some(shirt()), None);
        assert_eq!(phase, TryOnPhase::AwaitingSizes { missing: vec![Slot::Upper] });
        assert!(session.render().await.phase().is_some_and(|p| !p.is_success()));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);

        let outcome = session.choose_size(Slot::Upper, SizeChoice::new("M", "True to Size")).await;
        let phase = outcome.phase().unwrap();
        assert!(phase.is_success());
        assert_eq!(phase.key().unwrap().as_str(), "pose-Front_upper-11-M");
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_render_is_free() {
        let (session, oracle) = session();
        session.select_garment(Slot::Upper, Some(shirt()), None);
        session.choose_size(Slot::Upper, SizeChoice::new("M", "True to Size")).await;
        let outcome = session.render().await;

        assert!(matches!(outcome.phase(), Some(TryOnPhase::Success { from_cache: true, .. })));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.ledger().records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn regenerate_overwrites_the_entry() {
        let (session, oracle) = session();
        session.select_garment(Slot::Upper, Some(shirt()), None);
        let first = session.choose_size(Slot::Upper, SizeChoice::new("M", "Fit")).await;
        let second = session.regenerate().await;

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
        let first = first.phase().and_then(TryOnPhase::result).unwrap().clone();
        let second = second.phase().and_then(TryOnPhase::result).unwrap().clone();
        assert_ne!(first.image, second.image);
        let key = session.current_key().unwrap();
        assert_eq!(session.cache().peek(&key).unwrap().image, second.image);
        assert_eq!(session.cache().len(), 1);
    }

    #[tokio::test]
    async fn failure_keeps_last_success() {
        let (session, oracle) = session();
        session.select_garment(Slot::Upper, Some(shirt()), None);
        session.choose_size(Slot::Upper, SizeChoice::new("M", "Fit")).await;
        let good_key = session.current_key().unwrap();

        oracle.fail.store(true, Ordering::SeqCst);
        let outcome = session.choose_size(Slot::Upper, SizeChoice::new("L", "Loose")).await;
        match outcome.phase().unwrap() {
            TryOnPhase::Failed { key, failure, last_success } => {
                assert_eq!(key.as_str(), "pose-Front_upper-11-L");
                assert_eq!(failure.message, "The AI failed to generate an image preview.");
                assert!(failure.retryable);
                assert_eq!(last_success.as_ref().map(|(k, _)| k), Some(&good_key));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // One success, then two failed attempts.
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.cache().keys(), vec![good_key.clone()]);
        assert_eq!(session.displayed().map(|(k, _)| k), Some(good_key));
    }

    #[tokio::test]
    async fn size_change_clears_the_display() {
        let (session, _) = session();
        session.select_garment(Slot::Upper, Some(shirt()), None);
        session.choose_size(Slot::Upper, SizeChoice::new("M", "Fit")).await;
        assert!(session.displayed().is_some());

        session.select_garment(Slot::Upper, Some(shirt()), None);
        assert!(session.displayed().is_none());
        assert!(matches!(session.phase(), TryOnPhase::AwaitingSizes { .. }));
    }

    #[tokio::test]
    async fn model_photo_preparation_is_priced_and_resets_cache() {
        let (session, oracle) = session();
        session.select_garment(Slot::Upper, Some(shirt()), None);
        session.choose_size(Slot::Upper, SizeChoice::new("M", "Fit")).await;
        assert_eq!(session.cache().len(), 1);

        let prepared = session
            .prepare_model_photo(&ImageData::new(b"raw".to_vec(), "image/jpeg"))
            .await
            .unwrap();
        assert_eq!(session.model_photo(), prepared);
        assert!(session.cache().is_empty());
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
        assert_eq!(session.ledger().records().await.unwrap().len(), 2);
        assert!(matches!(session.phase(), TryOnPhase::Ready { .. }));
    }
}
