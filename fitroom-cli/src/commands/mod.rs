pub mod costs;
pub mod estimate;
pub mod init;
pub mod recommend;
pub mod try_on;
pub mod wardrobe;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;

use fitroom_core::config::FitroomConfig;
use fitroom_core::store::SqliteStore;
use fitroom_core::types::ImageData;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default fitroom.toml
    Init(init::InitArgs),
    /// Estimate body measurements from a full-body photo
    Estimate(estimate::EstimateArgs),
    /// Recommend sizes for catalog garments
    Recommend(recommend::RecommendArgs),
    /// Render try-on previews for a garment selection
    TryOn(try_on::TryOnArgs),
    /// Show or clear recorded generation costs
    Costs(costs::CostsArgs),
    /// List or delete saved outfits
    Wardrobe(wardrobe::WardrobeArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Globals {
    pub config: PathBuf,
    pub db: PathBuf,
    pub quiet: bool,
}

pub async fn run(cmd: Command, globals: Globals) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args, &globals),
        Command::Estimate(args) => estimate::run(args, &globals).await,
        Command::Recommend(args) => recommend::run(args, &globals).await,
        Command::TryOn(args) => try_on::run(args, &globals).await,
        Command::Costs(args) => costs::run(args, &globals).await,
        Command::Wardrobe(args) => wardrobe::run(args, &globals).await,
    }
}

/// Load the config file, or defaults when it does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<FitroomConfig> {
    FitroomConfig::load_or_default(path)
        .with_context(|| format!("Cannot load config from {}", path.display()))
}

pub fn open_store(path: &Path) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(path)
        .with_context(|| format!("Cannot open database: {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Read an image file, inferring the MIME type from its extension.
pub fn read_image(path: &Path) -> anyhow::Result<ImageData> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Cannot read image: {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    };
    Ok(ImageData::new(bytes, mime))
}

/// Format a USD amount with enough precision for per-call costs.
pub fn format_usd(amount: f64) -> String {
    if amount != 0.0 && amount.abs() < 0.01 {
        format!("${amount:.5}")
    } else {
        format!("${amount:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_formatting() {
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(12.5), "$12.50");
        assert_eq!(format_usd(0.00125), "$0.00125");
    }

    #[test]
    fn image_mime_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me.PNG");
        std::fs::write(&path, b"png-bytes").unwrap();
        let image = read_image(&path).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, b"png-bytes");
    }
}
