//! Cache for fetched tiles.
//!
//! Stores [`RawTile`] buffers (pre-encoded or raw) under a composite key and
//! evicts least-recently-used entries when the total cached byte size
//! exceeds capacity.

use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;

use super::engine::{FetchParams, Flip};
use super::raw::{Encoding, RawTile};

/// Default cache capacity: 100MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries (bounds LRU bookkeeping)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Composite key identifying one fetched tile variant.
///
/// Every parameter that changes the fetched bytes participates: the view
/// angle, flip, quality layers and desired encoding all produce distinct
/// cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Image identifier
    pub image: Arc<str>,

    /// Pyramid level, finest-first
    pub level: u32,

    /// Linear tile index within the level
    pub tile: u32,

    /// View-sequence angle
    pub angle: i32,

    /// Mirroring applied at fetch time
    pub flip: Flip,

    /// Quality layers decoded (codec-specific, 0 = all)
    pub layers: i32,

    /// Encoding the tile was fetched in
    pub encoding: Encoding,

    /// JPEG quality when `encoding` is JPEG
    pub quality: u8,

    /// Whether an ICC profile was embedded at encode time
    pub icc: bool,
}

impl TileKey {
    /// Build the key for a fetch request.
    pub fn new(
        image: impl Into<Arc<str>>,
        level: u32,
        tile: u32,
        params: &FetchParams,
        encoding: Encoding,
    ) -> Self {
        Self {
            image: image.into(),
            level,
            tile,
            angle: params.angle,
            flip: params.flip,
            layers: params.quality_layers,
            encoding,
            quality: params.jpeg_quality,
            icc: params.embed_icc,
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// LRU tile cache with byte-size-based eviction.
///
/// Thread-safe; shared across concurrent requests via `Arc`.
pub struct TileCache {
    cache: RwLock<LruCache<TileKey, RawTile>>,

    /// Maximum total size in bytes
    max_size: usize,

    /// Current total size in bytes
    current_size: RwLock<usize>,
}

impl TileCache {
    /// Create a cache with the default capacity (100MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache bounded to `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            cache: RwLock::new(LruCache::new(
                std::num::NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap(),
            )),
            max_size,
            current_size: RwLock::new(0),
        }
    }

    /// Get a tile, marking it recently used.
    pub async fn get(&self, key: &TileKey) -> Option<RawTile> {
        let mut cache = self.cache.write().await;
        cache.get(key).cloned()
    }

    /// Store a tile, evicting LRU entries past capacity.
    pub async fn put(&self, key: TileKey, tile: RawTile) {
        let tile_size = tile.data.len();
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        if let Some(old) = cache.peek(&key) {
            *current_size = current_size.saturating_sub(old.data.len());
        }

        cache.put(key, tile);
        *current_size += tile_size;

        while *current_size > self.max_size {
            if let Some((_, evicted)) = cache.pop_lru() {
                *current_size = current_size.saturating_sub(evicted.data.len());
            } else {
                break;
            }
        }
    }

    /// Clear all entries.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;
        cache.clear();
        *current_size = 0;
    }

    /// Number of cached tiles.
    pub async fn len(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        let cache = self.cache.read().await;
        cache.is_empty()
    }

    /// Current total size of cached tile data in bytes.
    pub async fn size(&self) -> usize {
        *self.current_size.read().await
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
