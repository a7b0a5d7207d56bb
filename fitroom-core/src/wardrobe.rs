// Saved outfits. Best-effort like the cost ledger: store failures are logged.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::store::FitroomStore;
use crate::types::{Garment, ImageData, SavedOutfit};

/// One slot of an outfit being saved.
#[derive(Debug, Clone, Copy)]
pub struct OutfitPiece<'a> {
    pub garment: &'a Garment,
    pub size: &'a str,
}

#[derive(Debug, Clone)]
pub struct Wardrobe {
    store: Arc<dyn FitroomStore>,
}

impl Wardrobe {
    pub fn new(store: Arc<dyn FitroomStore>) -> Self {
        Self { store }
    }

    /// Save a generated image with the garments and sizes it shows.
    pub async fn save(
        &self,
        image: &ImageData,
        upper: Option<OutfitPiece<'_>>,
        lower: Option<OutfitPiece<'_>>,
    ) -> Option<SavedOutfit> {
        let created_at = Utc::now();
        let outfit = SavedOutfit {
            id: format!(
                "outfit_{}_{}",
                created_at.timestamp_millis(),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            generated_image: image.clone(),
            upper_garment: upper.map(|p| p.garment.clone()),
            upper_garment_size: upper.map(|p| p.size.to_string()),
            lower_garment: lower.map(|p| p.garment.clone()),
            lower_garment_size: lower.map(|p| p.size.to_string()),
            created_at,
        };
        match self.store.insert_outfit(&outfit).await {
            Ok(()) => {
                info!(id = %outfit.id, "Saved outfit");
                Some(outfit)
            }
            Err(e) => {
                warn!(error = %e, "Failed to save outfit");
                None
            }
        }
    }

    /// Saved outfits, newest first. Empty when the store is unavailable.
    pub async fn list(&self) -> Vec<SavedOutfit> {
        self.store.outfits().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read saved outfits");
            Vec::new()
        })
    }

    /// Delete by id. Returns whether an outfit was removed.
    pub async fn delete(&self, id: &str) -> bool {
        self.store.delete_outfit(id).await.unwrap_or_else(|e| {
            warn!(id, error = %e, "Failed to delete outfit");
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use crate::types::Slot;

    #[tokio::test]
    async fn save_list_delete() {
        let wardrobe = Wardrobe::new(Arc::new(SqliteStore::in_memory().unwrap()));
        let shirt = Garment::custom(Slot::Upper, "shirt", "white");
        let image = ImageData::new(b"preview".to_vec(), "image/png");

        let first = wardrobe
            .save(&image, Some(OutfitPiece { garment: &shirt, size: "M" }), None)
            .await
            .unwrap();
        assert_eq!(first.upper_garment_size.as_deref(), Some("M"));
        assert!(first.lower_garment.is_none());

        let listed = wardrobe.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].generated_image, image);

        assert!(wardrobe.delete(&first.id).await);
        assert!(wardrobe.list().await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_is_swallowed() {
        let wardrobe = Wardrobe::new(Arc::new(MemoryStore::unavailable()));
        let image = ImageData::new(b"x".to_vec(), "image/png");
        assert!(wardrobe.save(&image, None, None).await.is_none());
        assert!(wardrobe.list().await.is_empty());
        assert!(!wardrobe.delete("anything").await);
    }
}
