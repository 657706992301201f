//! Tile fetch/compute engine.
//!
//! [`TileEngine`] is the cache/compute collaborator the pipeline fetches
//! tiles through: given an opened pyramid, a level and a linear tile index,
//! it returns the tile either uncompressed or pre-encoded in the desired
//! format. [`CachingTileEngine`] is the standard implementation: a shared
//! byte-bounded cache in front of the pyramid's raw tile decoding, with
//! at-most-one-compute-per-key across concurrent callers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use crate::error::TileError;
use crate::image::PyramidImage;
use crate::protocol::TileFormat;

use super::cache::{TileCache, TileKey, DEFAULT_TILE_CACHE_CAPACITY};
use super::compressor::{compressor_for, DEFAULT_JPEG_QUALITY};
use super::pipeline::level_dpi;
use super::raw::{Encoding, RawTile};

// =============================================================================
// Fetch Parameters
// =============================================================================

/// Mirroring applied to a fetched tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flip {
    #[default]
    None,
    Horizontal,
    Vertical,
}

/// Per-request parameters that select a tile variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchParams {
    /// View-sequence angle (multi-view images; 0 for flat pyramids)
    pub angle: i32,

    /// Mirroring requested for the view
    pub flip: Flip,

    /// Quality layers to decode (codec-specific, 0 = all)
    pub quality_layers: i32,

    /// JPEG quality used when the engine pre-encodes
    pub jpeg_quality: u8,

    /// Embed the source ICC profile when pre-encoding
    pub embed_icc: bool,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            angle: 0,
            flip: Flip::None,
            quality_layers: 0,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            embed_icc: true,
        }
    }
}

// =============================================================================
// TileEngine Trait
// =============================================================================

/// Fetches tiles on behalf of the pipeline, computing them on cache miss.
///
/// Safe for concurrent callers; a miss may block the caller while the tile
/// is computed.
#[async_trait]
pub trait TileEngine: Send + Sync {
    /// Fetch one tile.
    ///
    /// When `desired` is [`Encoding::Uncompressed`] the returned tile holds
    /// raw samples for pixel-level post-processing. Otherwise the engine may
    /// return the tile already encoded in that format; the returned
    /// encoding tag says which happened.
    async fn fetch(
        &self,
        image: &dyn PyramidImage,
        level: usize,
        tile_index: u32,
        params: &FetchParams,
        desired: Encoding,
    ) -> Result<RawTile, TileError>;
}

// =============================================================================
// Caching Engine
// =============================================================================

/// The standard [`TileEngine`]: shared cache + singleflight compute.
pub struct CachingTileEngine {
    cache: TileCache,

    /// In-flight computes, keyed like the cache
    in_flight: Mutex<HashMap<TileKey, Arc<InFlightFetch>>>,
}

struct InFlightFetch {
    notify: Notify,
    result: Mutex<Option<Result<RawTile, TileError>>>,
}

impl CachingTileEngine {
    /// Create an engine with the default cache capacity.
    pub fn new() -> Self {
        Self::with_cache_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create an engine whose cache holds at most `capacity` bytes.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            cache: TileCache::with_capacity(capacity),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Cache statistics: `(current_size, capacity, entry_count)`.
    pub async fn cache_stats(&self) -> (usize, usize, usize) {
        (
            self.cache.size().await,
            self.cache.capacity(),
            self.cache.len().await,
        )
    }

    /// Drop every cached tile.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Decode the tile and encode it when a pre-encoded variant was asked
    /// for.
    ///
    /// Pre-encoded tiles carry the same level DPI and ICC metadata the
    /// pipeline's own encode path would attach, so cached and freshly
    /// computed tiles are indistinguishable to clients.
    fn compute(
        image: &dyn PyramidImage,
        level: usize,
        tile_index: u32,
        params: &FetchParams,
        desired: Encoding,
    ) -> Result<RawTile, TileError> {
        let mut tile = image.read_tile(level, tile_index)?;

        let format = match desired {
            Encoding::Uncompressed => return Ok(tile),
            Encoding::Jpeg => TileFormat::Jpeg,
            Encoding::Png => TileFormat::Png,
        };

        let mut compressor = compressor_for(format, params.jpeg_quality);
        let dpi = level_dpi(image, level);
        if dpi.x > 0.0 || dpi.y > 0.0 {
            compressor.set_resolution(dpi);
        }
        if params.embed_icc {
            if let Some(profile) = image.metadata("icc") {
                compressor.set_icc_profile(profile.to_vec());
            }
        }
        compressor.compress(&mut tile)?;
        Ok(tile)
    }
}

impl Default for CachingTileEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TileEngine for CachingTileEngine {
    async fn fetch(
        &self,
        image: &dyn PyramidImage,
        level: usize,
        tile_index: u32,
        params: &FetchParams,
        desired: Encoding,
    ) -> Result<RawTile, TileError> {
        let key = TileKey::new(image.identifier(), level as u32, tile_index, params, desired);

        if let Some(tile) = self.cache.get(&key).await {
            trace!(image = image.identifier(), level, tile_index, "tile cache hit");
            return Ok(tile);
        }

        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;

                if let Some(state) = in_flight.get(&key) {
                    state.clone()
                } else {
                    // We're the leader for computing this tile
                    let state = Arc::new(InFlightFetch {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(key.clone(), state.clone());
                    drop(in_flight);

                    let result = Self::compute(image, level, tile_index, params, desired);

                    {
                        let mut result_guard = state.result.lock().await;
                        *result_guard = Some(result.clone());
                    }

                    if let Ok(ref tile) = result {
                        self.cache.put(key.clone(), tile.clone()).await;
                    }

                    {
                        let mut in_flight = self.in_flight.lock().await;
                        in_flight.remove(&key);
                    }
                    state.notify.notify_waiters();

                    return result;
                }
            };

            // Register for the wakeup before checking the result, so a
            // leader finishing in between cannot strand us
            let mut notified = std::pin::pin!(state.notify.notified());
            notified.as_mut().enable();
            {
                let result_guard = state.result.lock().await;
                if let Some(ref result) = *result_guard {
                    return result.clone();
                }
            }
            notified.await;

            let result_guard = state.result.lock().await;
            if let Some(ref result) = *result_guard {
                return result.clone();
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::memory::PyramidLevel;
    use crate::image::{ColourSpace, MemoryPyramid};

    fn test_pyramid() -> MemoryPyramid {
        MemoryPyramid::from_levels(
            "engine.tif",
            vec![PyramidLevel {
                width: 300,
                height: 300,
                data: vec![100; 300 * 300 * 3],
            }],
            256,
            ColourSpace::Srgb,
            3,
            8,
        )
    }

    #[tokio::test]
    async fn test_fetch_uncompressed() {
        let engine = CachingTileEngine::new();
        let image = test_pyramid();

        let tile = engine
            .fetch(&image, 0, 0, &FetchParams::default(), Encoding::Uncompressed)
            .await
            .unwrap();

        assert_eq!(tile.encoding, Encoding::Uncompressed);
        assert_eq!((tile.width, tile.height), (256, 256));
        assert_eq!(tile.data.len(), tile.expected_len());
    }

    #[tokio::test]
    async fn test_fetch_pre_encoded_jpeg() {
        let engine = CachingTileEngine::new();
        let image = test_pyramid();

        let tile = engine
            .fetch(&image, 0, 0, &FetchParams::default(), Encoding::Jpeg)
            .await
            .unwrap();

        assert_eq!(tile.encoding, Encoding::Jpeg);
        assert_eq!(&tile.data[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_fetch_caches_result() {
        let engine = CachingTileEngine::new();
        let image = test_pyramid();

        engine
            .fetch(&image, 0, 0, &FetchParams::default(), Encoding::Jpeg)
            .await
            .unwrap();
        let (size, _, count) = engine.cache_stats().await;
        assert_eq!(count, 1);
        assert!(size > 0);

        // Same variant again does not add an entry
        engine
            .fetch(&image, 0, 0, &FetchParams::default(), Encoding::Jpeg)
            .await
            .unwrap();
        let (_, _, count) = engine.cache_stats().await;
        assert_eq!(count, 1);

        // A different desired encoding is a distinct variant
        engine
            .fetch(&image, 0, 0, &FetchParams::default(), Encoding::Uncompressed)
            .await
            .unwrap();
        let (_, _, count) = engine.cache_stats().await;
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_fetch_out_of_range_fails() {
        let engine = CachingTileEngine::new();
        let image = test_pyramid();

        // 300x300 at tile 256 is a 2x2 grid
        let result = engine
            .fetch(&image, 0, 4, &FetchParams::default(), Encoding::Jpeg)
            .await;
        assert!(matches!(
            result,
            Err(TileError::TileOutOfBounds { num_tiles: 4, .. })
        ));

        let result = engine
            .fetch(&image, 3, 0, &FetchParams::default(), Encoding::Jpeg)
            .await;
        assert!(matches!(result, Err(TileError::InvalidLevel { .. })));
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let engine = CachingTileEngine::new();
        let image = test_pyramid();

        let _ = engine
            .fetch(&image, 0, 99, &FetchParams::default(), Encoding::Jpeg)
            .await;
        let (_, _, count) = engine.cache_stats().await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_collapse() {
        let engine = Arc::new(CachingTileEngine::new());
        let image = Arc::new(test_pyramid());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let image = image.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .fetch(
                        image.as_ref(),
                        0,
                        0,
                        &FetchParams::default(),
                        Encoding::Jpeg,
                    )
                    .await
            }));
        }

        let mut payloads = Vec::new();
        for handle in handles {
            payloads.push(handle.await.unwrap().unwrap().data);
        }
        // Every caller sees the same bytes and the cache holds one entry
        assert!(payloads.windows(2).all(|w| w[0] == w[1]));
        let (_, _, count) = engine.cache_stats().await;
        assert_eq!(count, 1);
    }
}
