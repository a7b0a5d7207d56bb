use crate::types::{CostRecord, SavedOutfit};

/// Persistence for the two best-effort collections: cost records and saved outfits.
///
/// Callers treat every failure as non-fatal; the try-on flow works without it.
#[async_trait::async_trait]
pub trait FitroomStore: Send + Sync + std::fmt::Debug {
    // ── Cost records ───────────────────────────────────────────────

    /// Append a record, then drop the oldest rows so at most `keep` remain.
    async fn append_cost_record(&self, record: &CostRecord, keep: usize)
    -> crate::error::Result<()>;

    /// All retained records, oldest first.
    async fn cost_records(&self) -> crate::error::Result<Vec<CostRecord>>;

    /// Remove every cost record. Returns the number removed.
    async fn clear_cost_records(&self) -> crate::error::Result<u64>;

    // ── Saved outfits ──────────────────────────────────────────────

    /// Insert a saved outfit.
    async fn insert_outfit(&self, outfit: &SavedOutfit) -> crate::error::Result<()>;

    /// All saved outfits, newest first.
    async fn outfits(&self) -> crate::error::Result<Vec<SavedOutfit>>;

    /// Delete one outfit by id. Returns whether it existed.
    async fn delete_outfit(&self, id: &str) -> crate::error::Result<bool>;
}
