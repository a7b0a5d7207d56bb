use std::path::PathBuf;

use clap::Args;

use fitroom_core::error::{FitroomError, OracleError};
use fitroom_core::oracle::GeminiClient;
use fitroom_core::recommend::estimate_measurements;

use super::Globals;

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Full-body photo of the person
    pub photo: PathBuf,

    /// Print the measurements as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: EstimateArgs, globals: &Globals) -> anyhow::Result<()> {
    let config = super::load_config(&globals.config)?;
    let client = GeminiClient::from_config(&config.oracle)?;
    let photo = super::read_image(&args.photo)?;

    let Some(measurements) = estimate_measurements(&client, &photo).await else {
        return Err(FitroomError::from(OracleError::EmptyResponse(
            "Could not estimate measurements from this photo. Enter them manually with \
             --height, --weight, --chest and --waist."
                .to_string(),
        ))
        .into());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&measurements)?);
    } else {
        println!("  Height: {} in", measurements.height);
        println!("  Weight: {} lb", measurements.weight);
        println!("  Chest:  {} in", measurements.chest);
        println!("  Waist:  {} in", measurements.waist);
    }
    Ok(())
}
