use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};

use fitroom_core::types::SavedOutfit;
use fitroom_core::wardrobe::Wardrobe;

use super::Globals;

#[derive(Args, Debug)]
pub struct WardrobeArgs {
    #[command(subcommand)]
    pub action: Option<WardrobeAction>,
}

#[derive(Subcommand, Debug)]
pub enum WardrobeAction {
    /// List saved outfits, newest first (default)
    List,
    /// Write a saved outfit's image to a file
    Export {
        id: String,
        /// Destination file
        path: PathBuf,
    },
    /// Delete a saved outfit
    Delete { id: String },
}

fn describe(outfit: &SavedOutfit) -> String {
    let piece = |garment: Option<&fitroom_core::types::Garment>, size: Option<&str>| {
        garment.map(|g| format!("{} ({})", g.name, size.unwrap_or("?")))
    };
    [
        piece(outfit.upper_garment.as_ref(), outfit.upper_garment_size.as_deref()),
        piece(outfit.lower_garment.as_ref(), outfit.lower_garment_size.as_deref()),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" + ")
}

pub async fn run(args: WardrobeArgs, globals: &Globals) -> anyhow::Result<()> {
    let wardrobe = Wardrobe::new(super::open_store(&globals.db)?);

    match args.action.unwrap_or(WardrobeAction::List) {
        WardrobeAction::List => {
            let outfits = wardrobe.list().await;
            if outfits.is_empty() {
                println!("No saved outfits.");
            }
            for outfit in &outfits {
                println!(
                    "  {}  {}  {}",
                    outfit.id,
                    outfit.created_at.format("%Y-%m-%d %H:%M"),
                    describe(outfit)
                );
            }
        }
        WardrobeAction::Export { id, path } => {
            let outfit = wardrobe
                .list()
                .await
                .into_iter()
                .find(|o| o.id == id)
                .with_context(|| format!("No saved outfit with id {id}"))?;
            std::fs::write(&path, &outfit.generated_image.bytes)
                .with_context(|| format!("Cannot write image: {}", path.display()))?;
            if !globals.quiet {
                println!("Wrote {}", path.display());
            }
        }
        WardrobeAction::Delete { id } => {
            if !wardrobe.delete(&id).await {
                anyhow::bail!("No saved outfit with id {id}");
            }
            if !globals.quiet {
                println!("Deleted {id}");
            }
        }
    }
    Ok(())
}
