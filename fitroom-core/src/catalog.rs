//! Read-only garment catalog and the default size-chart policy for custom
//! garments.

use std::path::Path;

use tracing::debug;

use crate::error::StoreError;
use crate::types::{Garment, SizeChart, Slot};

/// Source of catalog garments.
#[async_trait::async_trait]
pub trait GarmentCatalog: Send + Sync {
    async fn list_garments(&self) -> crate::error::Result<Vec<Garment>>;
}

/// Garments placed on `slot`, in catalog order.
pub fn by_placement(garments: &[Garment], slot: Slot) -> Vec<&Garment> {
    garments.iter().filter(|g| g.body_placement == slot).collect()
}

/// Garments of `brand`, compared case-insensitively.
pub fn by_brand<'a>(garments: &'a [Garment], brand: &str) -> Vec<&'a Garment> {
    garments
        .iter()
        .filter(|g| g.brand.eq_ignore_ascii_case(brand))
        .collect()
}

/// Distinct non-empty brand names, sorted.
pub fn brands(garments: &[Garment]) -> Vec<String> {
    let mut names: Vec<String> = garments
        .iter()
        .map(|g| g.brand.trim())
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// In-memory catalog, optionally loaded from a JSON array of garments.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    garments: Vec<Garment>,
}

impl StaticCatalog {
    pub fn new(garments: Vec<Garment>) -> Self {
        Self { garments }
    }

    pub fn from_json(raw: &str) -> crate::error::Result<Self> {
        let garments: Vec<Garment> = serde_json::from_str(raw).map_err(StoreError::Serialization)?;
        Ok(Self::new(garments))
    }

    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(StoreError::Io)?;
        let catalog = Self::from_json(&raw)?;
        debug!(path = %path.display(), garments = catalog.garments.len(), "Loaded catalog");
        Ok(catalog)
    }

    pub fn garments(&self) -> &[Garment] {
        &self.garments
    }

    pub fn find(&self, id: &str) -> Option<&Garment> {
        self.garments.iter().find(|g| g.id == id)
    }
}

#[async_trait::async_trait]
impl GarmentCatalog for StaticCatalog {
    async fn list_garments(&self) -> crate::error::Result<Vec<Garment>> {
        Ok(self.garments.clone())
    }
}

// ── Default size chart ─────────────────────────────────────────────

/// Chooses a stand-in size chart for a garment that has none of its own
/// (a custom upload). The chart is an approximation, not a fit guarantee.
pub trait DefaultSizeChartPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn chart_for(&self, placement: Slot, catalog: &[Garment]) -> Option<SizeChart>;
}

/// Borrow the chart of the first catalog garment with the same placement.
/// Custom entries and garments without a chart are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCatalogMatch;

impl DefaultSizeChartPolicy for FirstCatalogMatch {
    fn name(&self) -> &'static str {
        "first-catalog-match"
    }

    fn chart_for(&self, placement: Slot, catalog: &[Garment]) -> Option<SizeChart> {
        by_placement(catalog, placement)
            .into_iter()
            .find(|g| !g.is_custom() && !g.size_chart.is_empty())
            .map(|g| {
                debug!(placement = %placement, donor = %g.id, "Borrowing size chart");
                g.size_chart.clone()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SizeMeasurements;

    fn garment(id: &str, brand: &str, slot: Slot, sizes: &[&str]) -> Garment {
        let mut g = Garment::custom(slot, "shirt", "blue");
        g.id = id.to_string();
        g.brand = brand.to_string();
        for size in sizes {
            g.size_chart.insert((*size).to_string(), SizeMeasurements::default());
        }
        g
    }

    fn sample() -> Vec<Garment> {
        vec![
            garment("1", "Acme", Slot::Lower, &["30", "32"]),
            garment("2", "acme", Slot::Upper, &[]),
            garment("3", "Northwind", Slot::Upper, &["S", "M", "L"]),
            garment("4", "Northwind", Slot::Upper, &["XS"]),
        ]
    }

    #[test]
    fn filters_by_placement_and_brand() {
        let garments = sample();
        let upper: Vec<_> = by_placement(&garments, Slot::Upper).iter().map(|g| g.id.as_str()).collect();
        assert_eq!(upper, vec!["2", "3", "4"]);
        let acme: Vec<_> = by_brand(&garments, "ACME").iter().map(|g| g.id.as_str()).collect();
        assert_eq!(acme, vec!["1", "2"]);
        assert_eq!(brands(&garments), vec!["Acme", "Northwind", "acme"]);
    }

    #[test]
    fn first_match_skips_empty_charts() {
        let chart = FirstCatalogMatch.chart_for(Slot::Upper, &sample()).unwrap();
        assert_eq!(chart.keys().collect::<Vec<_>>(), vec!["S", "M", "L"]);

        let lower_only = vec![garment("1", "Acme", Slot::Lower, &["30"])];
        assert!(FirstCatalogMatch.chart_for(Slot::Upper, &lower_only).is_none());
    }

    #[tokio::test]
    async fn json_catalog_round_trip() {
        let raw = serde_json::to_string(&sample()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, raw).unwrap();

        let catalog = StaticCatalog::load(&path).unwrap();
        assert_eq!(catalog.list_garments().await.unwrap().len(), 4);
        assert_eq!(catalog.find("3").unwrap().brand, "Northwind");
        assert!(catalog.find("99").is_none());
        assert!(StaticCatalog::from_json("{not json").is_err());
    }
}
