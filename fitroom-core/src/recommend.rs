//! Per-slot fit recommendations.
//!
//! Upper and lower are fetched concurrently and independently: one slot can
//! fail while the other succeeds, and neither waits on or cancels the other.
//! A slot already holding a recommendation for the same garment is not
//! fetched again.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::catalog::{DefaultSizeChartPolicy, GarmentCatalog};
use crate::error::{FitroomError, ValidationError};
use crate::oracle::{FitOracle, MeasurementOracle};
use crate::types::{FitRecommendation, Garment, ImageData, Measurements, SizeChart, Slot};

/// Recommendation state of one slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    Loading,
    Ready(FitRecommendation),
    Failed(String),
}

impl SlotState {
    pub fn recommendation(&self) -> Option<&FitRecommendation> {
        match self {
            Self::Ready(rec) => Some(rec),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SlotEntry {
    garment_id: Option<String>,
    state: SlotState,
}

/// Both slots after a recommendation round.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecommendationRound {
    pub upper: SlotState,
    pub lower: SlotState,
}

impl RecommendationRound {
    pub fn get(&self, slot: Slot) -> &SlotState {
        match slot {
            Slot::Upper => &self.upper,
            Slot::Lower => &self.lower,
        }
    }
}

pub struct RecommendationCoordinator {
    oracle: Arc<dyn FitOracle>,
    catalog: Arc<dyn GarmentCatalog>,
    policy: Arc<dyn DefaultSizeChartPolicy>,
    slots: Mutex<[SlotEntry; 2]>,
}

impl std::fmt::Debug for RecommendationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationCoordinator")
            .field("policy", &self.policy.name())
            .finish_non_exhaustive()
    }
}

impl RecommendationCoordinator {
    pub fn new(
        oracle: Arc<dyn FitOracle>,
        catalog: Arc<dyn GarmentCatalog>,
        policy: Arc<dyn DefaultSizeChartPolicy>,
    ) -> Self {
        Self {
            oracle,
            catalog,
            policy,
            slots: Mutex::new(Default::default()),
        }
    }

    pub fn state(&self, slot: Slot) -> SlotState {
        self.slots.lock().expect("recommendation mutex poisoned")[slot.index()]
            .state
            .clone()
    }

    /// Forget the slot's recommendation, e.g. after the garment changes.
    pub fn reset(&self, slot: Slot) {
        self.slots.lock().expect("recommendation mutex poisoned")[slot.index()] =
            SlotEntry::default();
    }

    /// Fetch recommendations for the selected garments. Slots without a
    /// garment are left `Idle`. Invalid measurements reject the whole round
    /// before any oracle call.
    pub async fn recommend(
        &self,
        measurements: &Measurements,
        upper: Option<&Garment>,
        lower: Option<&Garment>,
    ) -> Result<RecommendationRound, ValidationError> {
        measurements.validate()?;

        let (upper, lower) = tokio::join!(
            self.recommend_slot(Slot::Upper, measurements, upper),
            self.recommend_slot(Slot::Lower, measurements, lower),
        );
        Ok(RecommendationRound { upper, lower })
    }

    async fn recommend_slot(
        &self,
        slot: Slot,
        measurements: &Measurements,
        garment: Option<&Garment>,
    ) -> SlotState {
        let Some(garment) = garment else {
            self.reset(slot);
            return SlotState::Idle;
        };

        {
            let mut slots = self.slots.lock().expect("recommendation mutex poisoned");
            let entry = &mut slots[slot.index()];
            if entry.garment_id.as_deref() == Some(garment.id.as_str()) {
                if let SlotState::Ready(_) = entry.state {
                    return entry.state.clone();
                }
            }
            *entry = SlotEntry {
                garment_id: Some(garment.id.clone()),
                state: SlotState::Loading,
            };
        }

        let state = match self.fetch(slot, measurements, garment).await {
            Ok(rec) => {
                info!(
                    slot = %slot,
                    garment = %garment.id,
                    size = %rec.recommended_size,
                    confidence = rec.confidence_score,
                    "Fit recommendation ready"
                );
                SlotState::Ready(rec)
            }
            Err(e) => {
                warn!(slot = %slot, garment = %garment.id, error = %e, "Fit recommendation failed");
                SlotState::Failed(e.to_string())
            }
        };

        let mut slots = self.slots.lock().expect("recommendation mutex poisoned");
        let entry = &mut slots[slot.index()];
        // The garment may have changed while the fetch was in flight.
        if entry.garment_id.as_deref() == Some(garment.id.as_str()) {
            entry.state = state.clone();
        }
        state
    }

    async fn fetch(
        &self,
        slot: Slot,
        measurements: &Measurements,
        garment: &Garment,
    ) -> crate::error::Result<FitRecommendation> {
        let chart = self.chart_for(slot, garment).await?;
        let rec = self.oracle.recommend(measurements, &chart).await?;
        Ok(rec.validate()?)
    }

    async fn chart_for(&self, slot: Slot, garment: &Garment) -> crate::error::Result<SizeChart> {
        if !garment.is_custom() {
            if garment.size_chart.is_empty() {
                return Err(ValidationError::NoSizeChart(slot).into());
            }
            return Ok(garment.size_chart.clone());
        }
        let catalog = self.catalog.list_garments().await?;
        self.policy
            .chart_for(garment.body_placement, &catalog)
            .ok_or_else(|| FitroomError::from(ValidationError::NoSizeChart(slot)))
    }
}

/// Estimate measurements from a photo. One attempt; any failure means
/// "fall back to manual entry" and yields `None`.
pub async fn estimate_measurements(
    oracle: &dyn MeasurementOracle,
    photo: &ImageData,
) -> Option<Measurements> {
    let estimated = match oracle.estimate(photo).await {
        Ok(m) => m.rounded(),
        Err(e) => {
            warn!(error = %e, "Measurement estimation failed");
            return None;
        }
    };
    match estimated.validate() {
        Ok(()) => Some(estimated),
        Err(e) => {
            warn!(error = %e, "Measurement estimate rejected");
            None
        }
    }
}
