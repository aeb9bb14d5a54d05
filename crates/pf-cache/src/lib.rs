#![forbid(unsafe_code)]

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use pf_columnar::Column;
use pf_expr::EvaluationResult;
use pf_grid::GridField;
use pf_types::{FrameId, GridSpec, OutputMode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Everything that determines an evaluated field. Two requests with equal
/// keys produce identical values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub frame: FrameId,
    pub signature: String,
    pub output: OutputMode,
    /// Grid used for spatial calls under point output; `None` when the
    /// formula has no spatial calls.
    pub spatial: Option<GridSpec>,
    pub constant_version: u64,
}

impl CacheKey {
    #[must_use]
    pub fn new(
        frame: FrameId,
        signature: impl Into<String>,
        output: OutputMode,
        spatial: Option<GridSpec>,
        constant_version: u64,
    ) -> Self {
        Self {
            frame,
            signature: signature.into(),
            output,
            spatial,
            constant_version,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@v{}",
            self.frame, self.signature, self.constant_version
        )
    }
}

/// Sizing information the cache needs from a stored value.
pub trait CachedField {
    /// Point count or grid node count, checked against the expected shape.
    fn field_len(&self) -> usize;
    fn byte_size(&self) -> usize;
}

impl CachedField for EvaluationResult {
    fn field_len(&self) -> usize {
        self.len()
    }

    fn byte_size(&self) -> usize {
        EvaluationResult::byte_size(self)
    }
}

impl CachedField for Column {
    fn field_len(&self) -> usize {
        self.len()
    }

    fn byte_size(&self) -> usize {
        Column::byte_size(self)
    }
}

impl CachedField for GridField {
    fn field_len(&self) -> usize {
        self.values().len()
    }

    fn byte_size(&self) -> usize {
        GridField::byte_size(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub shape_mismatches: u64,
    pub entries: usize,
    pub bytes: usize,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheInner<V> {
    entries: LruCache<CacheKey, Arc<V>>,
    bytes: usize,
}

impl<V: CachedField> CacheInner<V> {
    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.pop(key) {
            Some(value) => {
                self.bytes = self.bytes.saturating_sub(value.byte_size());
                true
            }
            None => false,
        }
    }
}

/// Bounded LRU map from [`CacheKey`] to evaluated fields.
///
/// The lock is held only for lookups and inserts; `compute` closures run
/// unlocked, so concurrent misses on one key may both compute. The first
/// result inserted is kept and returned to both callers. A result whose
/// computation overlapped an invalidation is returned but never inserted.
pub struct FieldCache<V = EvaluationResult> {
    inner: Mutex<CacheInner<V>>,
    byte_budget: Option<usize>,
    /// Bumped under the lock by every invalidation.
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    shape_mismatches: AtomicU64,
}

impl<V> fmt::Debug for FieldCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("FieldCache")
            .field("entries", &inner.entries.len())
            .field("capacity", &inner.entries.cap())
            .field("bytes", &inner.bytes)
            .field("byte_budget", &self.byte_budget)
            .finish_non_exhaustive()
    }
}

impl<V: CachedField> FieldCache<V> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize, byte_budget: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                bytes: 0,
            }),
            byte_budget,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            shape_mismatches: AtomicU64::new(0),
        }
    }

    /// Cached value for `key`, without computing on a miss. Shape is checked
    /// like in [`FieldCache::get_or_compute`].
    pub fn get(&self, key: &CacheKey, expected_len: usize) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get(key).map(Arc::clone)?;
        if found.field_len() == expected_len {
            Some(found)
        } else {
            self.shape_mismatches.fetch_add(1, Ordering::Relaxed);
            inner.remove(key);
            None
        }
    }

    /// Invalidation counter. Take it before reading the inputs of a field and
    /// pass it to [`FieldCache::get_or_compute_since`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Return the cached value for `key`, or run `compute` and cache what it
    /// returns. Errors from `compute` are passed through and not cached.
    pub fn get_or_compute<E>(
        &self,
        key: &CacheKey,
        expected_len: usize,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        self.get_or_compute_since(self.generation(), key, expected_len, compute)
    }

    /// Like [`FieldCache::get_or_compute`], but the computed value is only
    /// inserted if no invalidation happened since `generation` was taken.
    pub fn get_or_compute_since<E>(
        &self,
        generation: u64,
        key: &CacheKey,
        expected_len: usize,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(found) = self.get(key, expected_len) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "field cache hit");
            return Ok(found);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "field cache miss");

        let computed = Arc::new(compute()?);

        let mut inner = self.inner.lock();
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(key = %key, "cache invalidated during compute; not cached");
            return Ok(computed);
        }
        if let Some(existing) = inner.entries.get(key) {
            if existing.field_len() == expected_len {
                return Ok(Arc::clone(existing));
            }
        }
        inner.remove(key);

        let size = computed.byte_size();
        if self.byte_budget.is_some_and(|budget| size > budget) {
            debug!(key = %key, size, "field larger than the cache byte budget; not cached");
            return Ok(computed);
        }

        if let Some((evicted_key, evicted)) = inner.entries.push(key.clone(), Arc::clone(&computed))
        {
            inner.bytes = inner.bytes.saturating_sub(evicted.byte_size());
            if evicted_key != *key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        inner.bytes += size;

        if let Some(budget) = self.byte_budget {
            while inner.bytes > budget {
                let Some((_, evicted)) = inner.entries.pop_lru() else {
                    break;
                };
                inner.bytes = inner.bytes.saturating_sub(evicted.byte_size());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(computed)
    }

    /// Drop every entry computed for `frame`.
    pub fn invalidate_frame(&self, frame: FrameId) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.frame == frame)
            .map(|(key, _)| key.clone())
            .collect();
        self.generation.fetch_add(1, Ordering::AcqRel);
        stale.iter().filter(|key| inner.remove(key)).count()
    }

    /// Drop entries computed under a constant version older than `version`.
    pub fn invalidate_before(&self, version: u64) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.constant_version < version)
            .map(|(key, _)| key.clone())
            .collect();
        self.generation.fetch_add(1, Ordering::AcqRel);
        stale.iter().filter(|key| inner.remove(key)).count()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        inner.entries.clear();
        inner.bytes = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            shape_mismatches: self.shape_mismatches.load(Ordering::Relaxed),
            entries: inner.entries.len(),
            bytes: inner.bytes,
        }
    }
}
