//! LRU cache of decoded frames.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::Serialize;

use crate::catalog::FrameAddress;
use crate::DecodedFrame;

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheSnapshot {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to decode.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

impl CacheSnapshot {
    /// Fraction of lookups that hit, 0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheStats {
    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Decoded-frame cache shared between the UI thread and decode workers.
///
/// Frames are stored behind `Arc` so a hit never copies pixel data.
pub struct FrameCache {
    entries: Mutex<LruCache<FrameAddress, Arc<DecodedFrame>>>,
    stats: CacheStats,
}

impl FrameCache {
    /// Create a cache holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    /// Look up a frame, marking it most recently used.
    pub fn get(&self, address: &FrameAddress) -> Option<Arc<DecodedFrame>> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(address) {
            Some(frame) => {
                self.stats.hit();
                Some(Arc::clone(frame))
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    /// Store a frame, evicting the least recently used entry when full.
    pub fn insert(&self, address: FrameAddress, frame: Arc<DecodedFrame>) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some((evicted, _)) = entries.push(address.clone(), frame) {
                if evicted != address {
                    self.stats.eviction();
                    log::trace!("Evicted {} from frame cache", evicted);
                }
            }
        }
    }

    /// Whether a frame is cached, without touching recency.
    pub fn contains(&self, address: &FrameAddress) -> bool {
        self.entries
            .lock()
            .map(|e| e.contains(address))
            .unwrap_or(false)
    }

    /// Number of cached frames.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of frames.
    pub fn capacity(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.cap().get())
            .unwrap_or(0)
    }

    /// Drop every cached frame.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Cache statistics.
    pub fn stats(&self) -> CacheSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelSamples;

    fn frame(value: u8) -> Arc<DecodedFrame> {
        Arc::new(DecodedFrame::grayscale(1, 1, PixelSamples::U8(vec![value])).unwrap())
    }

    #[test]
    fn test_lru_eviction() {
        let cache = FrameCache::new(2);
        cache.insert("a".into(), frame(1));
        cache.insert("b".into(), frame(2));
        // touch a so b becomes least recently used
        assert!(cache.get(&"a".into()).is_some());
        cache.insert("c".into(), frame(3));

        assert!(cache.contains(&"a".into()));
        assert!(!cache.contains(&"b".into()));
        assert!(cache.contains(&"c".into()));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_stats() {
        let cache = FrameCache::new(4);
        assert!(cache.get(&"x".into()).is_none());
        cache.insert("x".into(), frame(9));
        assert!(cache.get(&"x".into()).is_some());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_replacing_entry_is_not_eviction() {
        let cache = FrameCache::new(1);
        cache.insert("x".into(), frame(1));
        cache.insert("x".into(), frame(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get(&"x".into()).unwrap().samples, PixelSamples::U8(vec![2]));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        assert_eq!(FrameCache::new(0).capacity(), 1);
    }
}
