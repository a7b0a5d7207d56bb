use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::StoreError;
use crate::types::{CostRecord, SavedOutfit};

use super::FitroomStore;

/// Session-only store. Can be switched into a failing mode to exercise
/// best-effort persistence paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    costs: Mutex<Vec<CostRecord>>,
    outfits: Mutex<Vec<SavedOutfit>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation fails.
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_unavailable(true);
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> crate::error::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("store unavailable")).into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl FitroomStore for MemoryStore {
    async fn append_cost_record(
        &self,
        record: &CostRecord,
        keep: usize,
    ) -> crate::error::Result<()> {
        self.check()?;
        let mut costs = self.costs.lock().expect("memory store mutex poisoned");
        costs.push(record.clone());
        if costs.len() > keep {
            let excess = costs.len() - keep;
            costs.drain(..excess);
        }
        Ok(())
    }

    async fn cost_records(&self) -> crate::error::Result<Vec<CostRecord>> {
        self.check()?;
        Ok(self
            .costs
            .lock()
            .expect("memory store mutex poisoned")
            .clone())
    }

    async fn clear_cost_records(&self) -> crate::error::Result<u64> {
        self.check()?;
        let mut costs = self.costs.lock().expect("memory store mutex poisoned");
        let removed = costs.len() as u64;
        costs.clear();
        Ok(removed)
    }

    async fn insert_outfit(&self, outfit: &SavedOutfit) -> crate::error::Result<()> {
        self.check()?;
        self.outfits
            .lock()
            .expect("memory store mutex poisoned")
            .insert(0, outfit.clone());
        Ok(())
    }

    async fn outfits(&self) -> crate::error::Result<Vec<SavedOutfit>> {
        self.check()?;
        Ok(self
            .outfits
            .lock()
            .expect("memory store mutex poisoned")
            .clone())
    }

    async fn delete_outfit(&self, id: &str) -> crate::error::Result<bool> {
        self.check()?;
        let mut outfits = self.outfits.lock().expect("memory store mutex poisoned");
        let before = outfits.len();
        outfits.retain(|o| o.id != id);
        Ok(outfits.len() != before)
    }
}
