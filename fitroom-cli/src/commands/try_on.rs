use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use tracing::info;

use fitroom_core::catalog::StaticCatalog;
use fitroom_core::config::FitroomConfig;
use fitroom_core::error::{ConfigError, ValidationError};
use fitroom_core::ledger::CostLedger;
use fitroom_core::oracle::GeminiClient;
use fitroom_core::progress::{NoopReporter, ProgressReporter, SpinnerReporter};
use fitroom_core::session::{RenderOutcome, SessionOptions, TryOnPhase, TryOnSession};
use fitroom_core::types::{ImageData, Pose, SizeChoice, Slot, TryOnResult};
use fitroom_core::wardrobe::Wardrobe;

use super::recommend::{MeasurementArgs, pick_garment};
use super::{Globals, format_usd};

#[derive(Args, Debug)]
pub struct TryOnArgs {
    /// Photo of the person to dress
    #[arg(long)]
    pub photo: PathBuf,

    /// Clean up the photo into a studio model photo first
    #[arg(long)]
    pub prepare: bool,

    /// JSON file with the garment catalog
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Catalog id of the upper garment
    #[arg(long)]
    pub upper: Option<String>,

    /// Photo of your own upper garment
    #[arg(long, conflicts_with = "upper")]
    pub upper_image: Option<PathBuf>,

    /// Garment type of your own upper garment
    #[arg(long, default_value = "top")]
    pub upper_type: String,

    /// Color of your own upper garment
    #[arg(long, default_value = "")]
    pub upper_color: String,

    /// Size to preview for the upper garment
    #[arg(long)]
    pub upper_size: Option<String>,

    /// Fit label for the upper garment
    #[arg(long, default_value = "True to Size")]
    pub upper_fit: String,

    /// Catalog id of the lower garment
    #[arg(long)]
    pub lower: Option<String>,

    /// Photo of your own lower garment
    #[arg(long, conflicts_with = "lower")]
    pub lower_image: Option<PathBuf>,

    /// Garment type of your own lower garment
    #[arg(long, default_value = "pants")]
    pub lower_type: String,

    /// Color of your own lower garment
    #[arg(long, default_value = "")]
    pub lower_color: String,

    /// Size to preview for the lower garment
    #[arg(long)]
    pub lower_size: Option<String>,

    /// Fit label for the lower garment
    #[arg(long, default_value = "True to Size")]
    pub lower_fit: String,

    /// Measurements used to recommend sizes that were not given
    #[command(flatten)]
    pub measurements: MeasurementArgs,

    /// Pose to render; repeat for several (default: first configured pose)
    #[arg(long = "pose")]
    pub poses: Vec<String>,

    /// Brand id recorded with each cost event
    #[arg(long)]
    pub brand: Option<String>,

    /// Directory for the rendered previews
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Save the last successful preview to the wardrobe
    #[arg(long)]
    pub save: bool,
}

/// Garment, optional custom photo and optional explicit size for one slot.
struct SlotPlan {
    slot: Slot,
    garment: Option<fitroom_core::types::Garment>,
    custom_image: Option<ImageData>,
    choice: Option<SizeChoice>,
}

fn resolve_poses(config: &FitroomConfig, names: &[String]) -> Result<Vec<Pose>, ConfigError> {
    if names.is_empty() {
        return Ok(config.poses.first().cloned().into_iter().collect());
    }
    names
        .iter()
        .map(|name| {
            config
                .pose(name)
                .cloned()
                .ok_or_else(|| ConfigError::Invalid(format!("unknown pose: {name}")))
        })
        .collect()
}

fn slot_plans(args: &TryOnArgs, catalog: &StaticCatalog) -> anyhow::Result<[SlotPlan; 2]> {
    let upper_custom = args.upper_image.as_deref().map(super::read_image).transpose()?;
    let lower_custom = args.lower_image.as_deref().map(super::read_image).transpose()?;

    let upper = pick_garment(
        catalog,
        Slot::Upper,
        args.upper.as_deref(),
        upper_custom.as_ref().map(|_| args.upper_type.as_str()),
        &args.upper_color,
    )?;
    let lower = pick_garment(
        catalog,
        Slot::Lower,
        args.lower.as_deref(),
        lower_custom.as_ref().map(|_| args.lower_type.as_str()),
        &args.lower_color,
    )?;

    Ok([
        SlotPlan {
            slot: Slot::Upper,
            garment: upper,
            custom_image: upper_custom,
            choice: args.upper_size.as_deref().map(|s| SizeChoice::new(s, &args.upper_fit)),
        },
        SlotPlan {
            slot: Slot::Lower,
            garment: lower,
            custom_image: lower_custom,
            choice: args.lower_size.as_deref().map(|s| SizeChoice::new(s, &args.lower_fit)),
        },
    ])
}

fn write_preview(out_dir: &Path, key: &str, result: &TryOnResult) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Cannot create output directory: {}", out_dir.display()))?;
    let path = out_dir.join(format!("fitroom-{key}.{}", result.image.extension()));
    std::fs::write(&path, &result.image.bytes)
        .with_context(|| format!("Cannot write preview: {}", path.display()))?;
    Ok(path)
}

#[allow(clippy::too_many_lines)]
pub async fn run(args: TryOnArgs, globals: &Globals) -> anyhow::Result<()> {
    let config = super::load_config(&globals.config)?;
    let poses = resolve_poses(&config, &args.poses)?;

    let catalog = match &args.catalog {
        Some(path) => StaticCatalog::load(path)
            .with_context(|| format!("Cannot load catalog: {}", path.display()))?,
        None => StaticCatalog::default(),
    };
    let plans = slot_plans(&args, &catalog)?;
    if plans.iter().all(|p| p.garment.is_none()) {
        return Err(ValidationError::NoGarmentSelected.into());
    }

    let client = Arc::new(GeminiClient::from_config(&config.oracle)?);
    let photo = super::read_image(&args.photo)?;
    let store = super::open_store(&globals.db)?;
    let ledger = CostLedger::with_capacity(store.clone(), config.ledger.capacity);
    let progress: Arc<dyn ProgressReporter> = if globals.quiet {
        Arc::new(NoopReporter)
    } else {
        Arc::new(SpinnerReporter::new())
    };

    let mut options = SessionOptions::from_config(&config);
    options.brand_id = args.brand.clone();
    if let Some(first) = poses.first() {
        options.pose = first.clone();
    }

    let session = TryOnSession::builder(photo.clone(), client.clone(), client)
        .catalog(Arc::new(catalog))
        .ledger(ledger)
        .progress(Arc::clone(&progress))
        .options(options)
        .build();

    if let Some(measurements) = args.measurements.measurements() {
        session.set_measurements(measurements)?;
    } else if args.measurements.any() {
        return Err(ValidationError::IncompleteMeasurements(
            "give all of --height, --weight, --chest and --waist".to_string(),
        )
        .into());
    }

    if args.prepare {
        session
            .prepare_model_photo(&photo)
            .await
            .context("Model photo preparation failed")?;
        progress.message("Prepared model photo");
    }

    for plan in &plans {
        session.select_garment(plan.slot, plan.garment.clone(), plan.custom_image.clone());
    }

    let needs_recommendation = plans
        .iter()
        .any(|p| p.garment.is_some() && p.choice.is_none());
    if needs_recommendation && session.measurements().is_some() {
        let round = session.fetch_recommendations().await?;
        for slot in Slot::ALL {
            if let Some(rec) = round.get(slot).recommendation() {
                progress.message(&format!(
                    "Recommended {slot} size: {} ({})",
                    rec.recommended_size, rec.projected_fit
                ));
            }
        }
    }

    // Explicit sizes are seeded without rendering; the pose loop renders once.
    for plan in &plans {
        if let Some(choice) = &plan.choice {
            session.set_size(plan.slot, choice.clone());
        }
    }

    let mut failure = None;
    let mut spent = 0.0;
    for (index, pose) in poses.into_iter().enumerate() {
        info!(pose = %pose.name, "Rendering preview");
        let outcome = if index == 0 {
            session.render().await
        } else {
            session.set_pose(pose).await
        };
        let phase = match outcome {
            RenderOutcome::Current(phase) => phase,
            RenderOutcome::Superseded { key, .. } => {
                info!(%key, "Preview superseded by a newer selection");
                continue;
            }
        };
        match phase {
            TryOnPhase::NoSelection => return Err(ValidationError::NoGarmentSelected.into()),
            TryOnPhase::AwaitingSizes { missing } => {
                let slot = missing.first().copied().unwrap_or(Slot::Upper);
                return Err(ValidationError::MissingSize(slot).into());
            }
            TryOnPhase::Ready { .. } => {}
            TryOnPhase::Success {
                key,
                result,
                from_cache,
            } => {
                let path = write_preview(&args.out_dir, key.as_str(), &result)?;
                if !from_cache {
                    spent += result.cost.cost_usd;
                }
                if !globals.quiet {
                    println!("{}", result.caption);
                    println!(
                        "  {} -> {} ({}, {})",
                        key,
                        path.display(),
                        result.resolution.as_str(),
                        if from_cache {
                            "cached".to_string()
                        } else {
                            format_usd(result.cost.cost_usd)
                        }
                    );
                }
            }
            TryOnPhase::Failed { key, failure: f, .. } => {
                eprintln!("  {key}: {}", f.message);
                failure = Some(f);
            }
        }
    }

    if args.save {
        match session.save_outfit(&Wardrobe::new(store)).await {
            Some(outfit) if !globals.quiet => println!("Saved outfit {}", outfit.id),
            Some(_) => {}
            None => eprintln!("Nothing to save: the last preview did not succeed"),
        }
    }

    if !globals.quiet {
        println!("Spent {} this run", format_usd(spent));
    }

    match failure {
        Some(f) => anyhow::bail!("AI service error: {}", f.message),
        None => Ok(()),
    }
}
