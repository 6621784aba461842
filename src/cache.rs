use crate::error::Result;
use crate::utils::l2_normalize;
use lru::LruCache;
use ndarray::Array1;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Normalized text embeddings keyed by the exact query string.
///
/// Bounded LRU. Values are shared, so every hit for a query hands out the
/// same vector that was stored on the first miss.
pub struct TextEmbeddingCache {
    entries: Mutex<LruCache<String, Arc<Array1<f32>>>>,
}

impl TextEmbeddingCache {
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<Array1<f32>>>> {
        // Entries are only ever inserted whole, a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached embedding for `query`, computing and storing it on a miss.
    ///
    /// `compute` runs without the cache lock held. Its error is returned and
    /// nothing is stored.
    pub fn get_or_insert_with<F>(&self, query: &str, compute: F) -> Result<Arc<Array1<f32>>>
    where
        F: FnOnce(&str) -> Result<Array1<f32>>,
    {
        if let Some(hit) = self.get(query) {
            tracing::debug!("Text embedding cache hit for '{query}'");
            return Ok(hit);
        }

        let embedding = Arc::new(l2_normalize(compute(query)?));
        let mut entries = self.lock();
        // Another caller may have filled the slot while we computed; keep theirs.
        if let Some(existing) = entries.get(query) {
            return Ok(Arc::clone(existing));
        }
        entries.put(query.to_owned(), Arc::clone(&embedding));
        Ok(embedding)
    }

    #[must_use]
    pub fn get(&self, query: &str) -> Option<Arc<Array1<f32>>> {
        self.lock().get(query).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}
