use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use fitroom_core::catalog::{FirstCatalogMatch, StaticCatalog};
use fitroom_core::oracle::GeminiClient;
use fitroom_core::recommend::{RecommendationCoordinator, SlotState};
use fitroom_core::types::{Garment, Measurements, Slot};

use super::Globals;

/// Body measurements given on the command line (inches and pounds).
#[derive(Args, Debug, Clone, Default)]
pub struct MeasurementArgs {
    /// Height in inches
    #[arg(long)]
    pub height: Option<f64>,
    /// Weight in pounds
    #[arg(long)]
    pub weight: Option<f64>,
    /// Chest in inches
    #[arg(long)]
    pub chest: Option<f64>,
    /// Waist in inches
    #[arg(long)]
    pub waist: Option<f64>,
}

impl MeasurementArgs {
    /// All four values, or `None` when any is missing.
    pub fn measurements(&self) -> Option<Measurements> {
        Some(Measurements {
            height: self.height?,
            weight: self.weight?,
            chest: self.chest?,
            waist: self.waist?,
        })
    }

    pub fn any(&self) -> bool {
        self.height.is_some() || self.weight.is_some() || self.chest.is_some() || self.waist.is_some()
    }
}

#[derive(Args, Debug)]
pub struct RecommendArgs {
    /// JSON file with the garment catalog
    #[arg(long)]
    pub catalog: PathBuf,

    /// Catalog id of the upper garment
    #[arg(long)]
    pub upper: Option<String>,

    /// Catalog id of the lower garment
    #[arg(long)]
    pub lower: Option<String>,

    /// Treat the upper garment as your own item of this type (e.g. "shirt")
    #[arg(long, conflicts_with = "upper")]
    pub custom_upper: Option<String>,

    /// Treat the lower garment as your own item of this type (e.g. "jeans")
    #[arg(long, conflicts_with = "lower")]
    pub custom_lower: Option<String>,

    #[command(flatten)]
    pub measurements: MeasurementArgs,

    /// Print the recommendations as JSON
    #[arg(long)]
    pub json: bool,
}

/// Look up a catalog garment by id or build a custom one.
pub fn pick_garment(
    catalog: &StaticCatalog,
    slot: Slot,
    id: Option<&str>,
    custom_type: Option<&str>,
    custom_color: &str,
) -> anyhow::Result<Option<Garment>> {
    if let Some(garment_type) = custom_type {
        return Ok(Some(Garment::custom(slot, garment_type, custom_color)));
    }
    let Some(id) = id else { return Ok(None) };
    let garment = catalog
        .find(id)
        .with_context(|| format!("No garment with id {id} in the catalog"))?;
    if garment.body_placement != slot {
        anyhow::bail!("Garment {id} is worn on the {} body, not the {slot} body", garment.body_placement);
    }
    Ok(Some(garment.clone()))
}

pub async fn run(args: RecommendArgs, globals: &Globals) -> anyhow::Result<()> {
    let config = super::load_config(&globals.config)?;
    let Some(measurements) = args.measurements.measurements() else {
        anyhow::bail!("--height, --weight, --chest and --waist are all required");
    };

    let catalog = StaticCatalog::load(&args.catalog)
        .with_context(|| format!("Cannot load catalog: {}", args.catalog.display()))?;
    let upper = pick_garment(&catalog, Slot::Upper, args.upper.as_deref(), args.custom_upper.as_deref(), "")?;
    let lower = pick_garment(&catalog, Slot::Lower, args.lower.as_deref(), args.custom_lower.as_deref(), "")?;
    if upper.is_none() && lower.is_none() {
        anyhow::bail!("Select at least one garment with --upper, --lower, --custom-upper or --custom-lower");
    }

    let client = GeminiClient::from_config(&config.oracle)?;
    let coordinator = RecommendationCoordinator::new(
        Arc::new(client),
        Arc::new(catalog),
        Arc::new(FirstCatalogMatch),
    );
    let round = coordinator
        .recommend(&measurements, upper.as_ref(), lower.as_ref())
        .await?;

    if args.json {
        let body: serde_json::Map<String, serde_json::Value> = Slot::ALL
            .into_iter()
            .filter_map(|slot| {
                let value = match round.get(slot) {
                    SlotState::Ready(rec) => serde_json::to_value(rec).ok()?,
                    SlotState::Failed(message) => serde_json::json!({ "error": message }),
                    SlotState::Idle | SlotState::Loading => return None,
                };
                Some((slot.as_str().to_string(), value))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    for slot in Slot::ALL {
        match round.get(slot) {
            SlotState::Ready(rec) => {
                println!(
                    "  {slot:<6} {} ({}, {:.0}% confidence)",
                    rec.recommended_size,
                    rec.projected_fit,
                    rec.confidence_score * 100.0
                );
                for alt in &rec.alternatives {
                    println!("         also: {} ({})", alt.size, alt.fit);
                }
            }
            SlotState::Failed(message) => println!("  {slot:<6} failed: {message}"),
            SlotState::Idle | SlotState::Loading => {}
        }
    }
    Ok(())
}
