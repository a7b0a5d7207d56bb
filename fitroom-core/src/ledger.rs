//! Append-only ledger of generation costs with derived statistics.
//!
//! Recording is best-effort telemetry: a failing store is logged and the
//! caller carries on.
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pricing::CostEvent;
use crate::store::FitroomStore;
use crate::types::{CostRecord, Resolution};

/// Default trailing window of retained records.
pub const DEFAULT_LEDGER_CAPACITY: usize = 1000;

/// Context attached to a cost event when it is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostMetadata {
    pub brand_id: Option<String>,
    pub session_id: Option<String>,
    pub images_in: u32,
    pub images_out: u32,
    pub resolution: Option<Resolution>,
}

impl Default for CostMetadata {
    fn default() -> Self {
        Self {
            brand_id: None,
            session_id: None,
            images_in: 1,
            images_out: 1,
            resolution: None,
        }
    }
}

/// Per-model aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub count: u64,
    pub total_cost: f64,
}

/// Aggregates over the retained records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    pub total_cost: f64,
    pub total_try_ons: u64,
    pub avg_cost: f64,
    pub total_tokens: u64,
    pub cost_by_model: BTreeMap<String, ModelCost>,
    pub cost_24h: f64,
    pub cost_7d: f64,
    pub cost_30d: f64,
}

impl CostStats {
    /// Compute statistics as of `now`. Each time window is filtered
    /// independently from the full record set.
    pub fn compute(records: &[CostRecord], now: DateTime<Utc>) -> Self {
        let window_sum = |window: Duration| -> f64 {
            records
                .iter()
                .filter(|r| now.signed_duration_since(r.timestamp) < window)
                .map(|r| r.cost_usd)
                .sum()
        };

        let total_cost: f64 = records.iter().map(|r| r.cost_usd).sum();
        let total_try_ons = records.len() as u64;
        let avg_cost = if total_try_ons > 0 {
            total_cost / total_try_ons as f64
        } else {
            0.0
        };

        let mut cost_by_model: BTreeMap<String, ModelCost> = BTreeMap::new();
        for r in records {
            let entry = cost_by_model.entry(r.model.clone()).or_default();
            entry.count += 1;
            entry.total_cost += r.cost_usd;
        }

        Self {
            total_cost,
            total_try_ons,
            avg_cost,
            total_tokens: records.iter().map(|r| r.total_tokens).sum(),
            cost_by_model,
            cost_24h: window_sum(Duration::hours(24)),
            cost_7d: window_sum(Duration::days(7)),
            cost_30d: window_sum(Duration::days(30)),
        }
    }
}

/// Cost ledger over a persistence collaborator.
#[derive(Debug, Clone)]
pub struct CostLedger {
    store: Arc<dyn FitroomStore>,
    capacity: usize,
}

impl CostLedger {
    pub fn new(store: Arc<dyn FitroomStore>) -> Self {
        Self::with_capacity(store, DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn FitroomStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Build the record for `event` and append it. Returns the record when it
    /// was persisted; persistence failures are logged and yield `None`.
    pub async fn record(&self, event: &CostEvent, metadata: CostMetadata) -> Option<CostRecord> {
        let record = CostRecord {
            id: format!(
                "cost_{}_{}",
                Utc::now().timestamp_millis(),
                &uuid::Uuid::new_v4().simple().to_string()[..9]
            ),
            timestamp: Utc::now(),
            brand_id: metadata.brand_id,
            session_id: metadata.session_id,
            model: event.model.clone(),
            input_tokens: event.input_tokens,
            output_tokens: event.output_tokens,
            total_tokens: event.total_tokens,
            images_in: metadata.images_in,
            images_out: metadata.images_out,
            resolution: metadata.resolution,
            cost_usd: event.cost_usd,
        };

        info!(
            model = %record.model,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            total_tokens = record.total_tokens,
            images_in = record.images_in,
            images_out = record.images_out,
            resolution = record.resolution.map_or("unknown", Resolution::as_str),
            cost_usd = record.cost_usd,
            "Recorded generation cost"
        );

        match self.store.append_cost_record(&record, self.capacity).await {
            Ok(()) => Some(record),
            Err(e) => {
                warn!(error = %e, "Failed to store cost record");
                None
            }
        }
    }

    /// Retained records, oldest first.
    pub async fn records(&self) -> crate::error::Result<Vec<CostRecord>> {
        self.store.cost_records().await
    }

    pub async fn stats(&self) -> crate::error::Result<CostStats> {
        self.stats_at(Utc::now()).await
    }

    pub async fn stats_at(&self, now: DateTime<Utc>) -> crate::error::Result<CostStats> {
        let records = self.store.cost_records().await?;
        Ok(CostStats::compute(&records, now))
    }

    /// Empty the ledger. Returns the number of records removed.
    pub async fn clear(&self) -> crate::error::Result<u64> {
        self.store.clear_cost_records().await
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::pricing::{RateTable, TokenUsage};
    use crate::store::MemoryStore;

    fn event(model: &str, input: u64, output: u64) -> CostEvent {
        RateTable::builtin().price(model, TokenUsage::new(input, output, None))
    }

    fn aged(hours: i64, cost: f64, model: &str) -> CostRecord {
        CostRecord {
            id: format!("cost_{hours}"),
            timestamp: Utc::now() - Duration::hours(hours),
            brand_id: None,
            session_id: None,
            model: model.to_string(),
            input_tokens: 10,
            output_tokens: 20,
            total_tokens: 30,
            images_in: 2,
            images_out: 1,
            resolution: Some(Resolution::TwoK),
            cost_usd: cost,
        }
    }

    #[tokio::test]
    async fn record_appends_and_reports() {
        let ledger = CostLedger::new(Arc::new(MemoryStore::new()));
        let record = ledger
            .record(
                &event("gemini-3-pro-image-preview", 1000, 1000),
                CostMetadata {
                    images_in: 3,
                    ..CostMetadata::default()
                },
            )
            .await
            .expect("recorded");
        assert!(record.id.starts_with("cost_"));
        assert_eq!(record.images_in, 3);

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total_try_ons, 1);
        assert!((stats.total_cost - 0.12125).abs() < 1e-12);
        assert!((stats.cost_24h - 0.12125).abs() < 1e-12);
        assert_eq!(stats.total_tokens, 2000);
    }

    #[tokio::test]
    async fn ledger_keeps_most_recent_window() {
        let ledger = CostLedger::new(Arc::new(MemoryStore::new()));
        let mut ids = Vec::new();
        for n in 0..1050u64 {
            let record = ledger
                .record(
                    &event("gemini-2.5-flash-image", n, n),
                    CostMetadata::default(),
                )
                .await
                .unwrap();
            ids.push(record.id);
        }
        let kept: Vec<_> = ledger
            .records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(kept.len(), 1000);
        assert_eq!(kept, ids[50..].to_vec());
    }

    #[tokio::test]
    async fn unavailable_store_fails_silently() {
        let ledger = CostLedger::new(Arc::new(MemoryStore::unavailable()));
        let recorded = ledger
            .record(&event("gemini-2.5-flash", 1, 1), CostMetadata::default())
            .await;
        assert!(recorded.is_none());
        assert!(ledger.stats().await.is_err());
    }

    #[tokio::test]
    async fn clear_empties_the_ledger() {
        let ledger = CostLedger::with_capacity(Arc::new(MemoryStore::new()), 5);
        for _ in 0..3 {
            ledger
                .record(&event("gemini-2.5-flash", 1, 1), CostMetadata::default())
                .await;
        }
        assert_eq!(ledger.clear().await.unwrap(), 3);
        assert_eq!(ledger.stats().await.unwrap(), CostStats::default());
    }

    #[test]
    fn windows_are_filtered_independently() {
        let now = Utc::now();
        let records = vec![
            aged(1, 1.0, "a"),
            aged(48, 2.0, "a"),
            aged(24 * 10, 4.0, "b"),
            aged(24 * 40, 8.0, "b"),
        ];
        let stats = CostStats::compute(&records, now);
        assert!((stats.total_cost - 15.0).abs() < 1e-9);
        assert!((stats.cost_24h - 1.0).abs() < 1e-9);
        assert!((stats.cost_7d - 3.0).abs() < 1e-9);
        assert!((stats.cost_30d - 7.0).abs() < 1e-9);
        assert!((stats.avg_cost - 3.75).abs() < 1e-9);
        assert_eq!(stats.cost_by_model["a"].count, 2);
        assert!((stats.cost_by_model["b"].total_cost - 12.0).abs() < 1e-9);
    }

    #[test]
    fn empty_ledger_has_zero_average() {
        let stats = CostStats::compute(&[], Utc::now());
        assert_eq!(stats.total_try_ons, 0);
        assert!(stats.avg_cost.abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn total_is_sum_of_recomputed_costs(
            calls in prop::collection::vec((0u64..5_000_000, 0u64..5_000, 0usize..3), 0..40)
        ) {
            let table = RateTable::builtin();
            let models = ["gemini-3-pro-image-preview", "gemini-2.5-flash-image", "gemini-2.5-flash"];
            let now = Utc::now();
            let records: Vec<CostRecord> = calls
                .iter()
                .enumerate()
                .map(|(i, (input, output, m))| {
                    let ev = table.price(models[*m], TokenUsage::new(*input, *output, None));
                    CostRecord {
                        id: format!("cost_{i}"),
                        timestamp: now,
                        brand_id: None,
                        session_id: None,
                        model: ev.model,
                        input_tokens: ev.input_tokens,
                        output_tokens: ev.output_tokens,
                        total_tokens: ev.total_tokens,
                        images_in: 1,
                        images_out: 1,
                        resolution: None,
                        cost_usd: ev.cost_usd,
                    }
                })
                .collect();

            let stats = CostStats::compute(&records, now);
            let recomputed: f64 = records
                .iter()
                .map(|r| table.calculate_cost(&r.model, r.input_tokens, r.output_tokens))
                .sum();
            prop_assert!((stats.total_cost - recomputed).abs() < 1e-6);
            for r in &records {
                let again = table.calculate_cost(&r.model, r.input_tokens, r.output_tokens);
                prop_assert!((r.cost_usd - again).abs() < 1e-12);
            }
        }
    }
}
