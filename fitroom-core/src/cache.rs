// Session cache of generated previews, keyed by pose and per-slot garment/size.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use tracing::debug;

use crate::types::TryOnResult;

/// Composite identity of one rendered preview.
///
/// Always `pose-<pose>` followed by at least one `_upper-<id>-<size>` or
/// `_lower-<id>-<size>` segment; a bare pose is never a valid key.
///
/// `%` and `_` are percent-escaped in every part, and `-` in sizes, so
/// distinct selections never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compose the key for a selection. Each slot is `(garment_id, size)` and
    /// contributes only when both parts are non-empty. Returns `None` when
    /// neither slot contributes.
    pub fn compose(
        pose: &str,
        upper: Option<(&str, &str)>,
        lower: Option<(&str, &str)>,
    ) -> Option<Self> {
        let mut key = format!("pose-{}", escape(pose, false));
        let prefix_len = key.len();
        for (label, slot) in [("upper", upper), ("lower", lower)] {
            if let Some((id, size)) = slot {
                if !id.is_empty() && !size.is_empty() {
                    key.push_str(&format!("_{label}-{}-{}", escape(id, false), escape(size, true)));
                }
            }
        }
        (key.len() > prefix_len).then_some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape(part: &str, dash: bool) -> Cow<'_, str> {
    let reserved = |c: char| c == '%' || c == '_' || (dash && c == '-');
    if !part.contains(reserved) {
        return Cow::Borrowed(part);
    }
    let mut out = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            '-' if dash => out.push_str("%2D"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: IndexMap<CacheKey, Arc<TryOnResult>>,
    hits: u64,
    misses: u64,
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe map from [`CacheKey`] to generated results.
///
/// Unbounded by default. With a capacity, the least recently used entry is
/// evicted when a new key would exceed it.
#[derive(Debug)]
pub struct TryOnCache {
    inner: Mutex<CacheInner>,
    capacity: Option<usize>,
}

impl Default for TryOnCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl TryOnCache {
    pub fn unbounded() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<TryOnResult>> {
        let mut inner = self.inner.lock().expect("try-on cache mutex poisoned");
        let found = inner.entries.get(key).cloned();
        if self.capacity.is_some() {
            // Most recently used lives at the back.
            if let Some(index) = inner.entries.get_index_of(key) {
                let last = inner.entries.len() - 1;
                inner.entries.move_index(index, last);
            }
        }
        if found.is_some() {
            inner.hits += 1;
            debug!(key = %key, "Try-on cache hit");
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Insert or overwrite the entry for `key`.
    pub fn put(&self, key: CacheKey, result: Arc<TryOnResult>) {
        let mut inner = self.inner.lock().expect("try-on cache mutex poisoned");
        inner.entries.shift_remove(&key);
        if let Some(capacity) = self.capacity {
            while inner.entries.len() >= capacity {
                if let Some((evicted, _)) = inner.entries.shift_remove_index(0) {
                    debug!(key = %evicted, "Evicted least recently used preview");
                }
            }
        }
        inner.entries.insert(key, result);
    }

    /// Look up without touching recency or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<TryOnResult>> {
        self.inner
            .lock()
            .expect("try-on cache mutex poisoned")
            .entries
            .get(key)
            .cloned()
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock().expect("try-on cache mutex poisoned");
        let removed = inner.entries.len();
        inner.entries.clear();
        removed
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .expect("try-on cache mutex poisoned")
            .entries
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("try-on cache mutex poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion (or recency) order.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner
            .lock()
            .expect("try-on cache mutex poisoned")
            .entries
            .keys()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("try-on cache mutex poisoned");
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}
