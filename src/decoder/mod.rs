//! Frame decoder: fetch, decode and cache.
//!
//! [`FrameDecoder`] is the synchronous core; [`DecodeWorker`] runs it off the
//! UI thread with per-request cancellation.

mod cache;
mod fetch;
mod worker;

pub use cache::{CacheSnapshot, CacheStats, FrameCache};
pub use fetch::{FrameFetcher, FsFetcher, MemoryFetcher};
pub use worker::{CancelToken, DecodeOutcome, DecodeRequest, DecodeWorker};

use std::sync::Arc;

use crate::catalog::FrameAddress;
use crate::codec::CodecRegistry;
use crate::error::Result;
use crate::DecodedFrame;

/// Fetches encoded bytes and decodes them through the codec registry.
///
/// Cached frames hold raw samples only; rescale is applied by the mapper.
pub struct FrameDecoder {
    fetcher: Arc<dyn FrameFetcher>,
    registry: CodecRegistry,
    cache: FrameCache,
}

impl FrameDecoder {
    /// Create a decoder with the built-in codecs.
    pub fn new(fetcher: Arc<dyn FrameFetcher>, cache_capacity: usize) -> Self {
        Self {
            fetcher,
            registry: CodecRegistry::with_defaults(),
            cache: FrameCache::new(cache_capacity),
        }
    }

    /// Replace the codec registry.
    pub fn with_registry(mut self, registry: CodecRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Decode the frame behind an address, consulting the cache first.
    ///
    /// The returned frame is an independent copy owned by the caller.
    pub fn decode(&self, address: &FrameAddress) -> Result<DecodedFrame> {
        if let Some(frame) = self.cached(address) {
            return Ok(frame.as_ref().clone());
        }
        let bytes = self.fetch(address)?;
        Ok(self.decode_bytes(address, &bytes)?.as_ref().clone())
    }

    /// Cached frame for an address.
    pub fn cached(&self, address: &FrameAddress) -> Option<Arc<DecodedFrame>> {
        let frame = self.cache.get(address);
        if frame.is_some() {
            log::debug!("Frame cache hit: {}", address);
        }
        frame
    }

    /// Fetch the encoded bytes of a frame.
    pub fn fetch(&self, address: &FrameAddress) -> Result<Vec<u8>> {
        self.fetcher.fetch(address)
    }

    /// Decode already fetched bytes and cache the result.
    pub fn decode_bytes(&self, address: &FrameAddress, bytes: &[u8]) -> Result<Arc<DecodedFrame>> {
        let frame = Arc::new(self.registry.decode(bytes)?);
        log::debug!(
            "Decoded {} ({}x{} {})",
            address,
            frame.width,
            frame.height,
            frame.samples.kind()
        );
        self.cache.insert(address.clone(), Arc::clone(&frame));
        Ok(frame)
    }

    /// Codec registry in use.
    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    /// The decode cache.
    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }
}
