//! Source resolution and opened-image caching.
//!
//! The registry provides:
//! - Identifier sanitization (URL decoding, traversal stripping)
//! - Existence checks against backing storage
//! - LRU caching of opened pyramids to avoid re-decoding
//! - Singleflight so concurrent requests for the same source open it once
//!
//! # Example
//!
//! ```ignore
//! use tilemux::image::{FsImageSource, ImageRegistry};
//!
//! let source = FsImageSource::new("/data/images").with_suffix(".tif");
//! let registry = ImageRegistry::new(source);
//!
//! if registry.exists("slides/a.tif").await {
//!     let image = registry.get("slides/a.tif").await?;
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::SourceError;

use super::memory::DEFAULT_TILE_WIDTH;
use super::{MemoryPyramid, PyramidImage};

/// Default capacity of the opened-image cache.
const DEFAULT_IMAGE_CACHE_CAPACITY: usize = 100;

// =============================================================================
// Identifier Sanitization
// =============================================================================

/// Sanitize a client-supplied source identifier.
///
/// URL-decodes the identifier and strips every `../` traversal segment so
/// the result can be joined under a storage root.
pub fn sanitize_identifier(identifier: &str) -> String {
    let mut decoded = urlencoding::decode(identifier)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| identifier.to_string());

    while let Some(pos) = decoded.find("../") {
        decoded.replace_range(pos..pos + 3, "");
    }

    decoded
}

// =============================================================================
// ImageSource Trait
// =============================================================================

/// Trait for opening pyramid images by identifier.
///
/// Implementations own identifier-to-storage resolution; the registry only
/// sees opaque identifiers.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// The pyramid type this source opens.
    type Image: PyramidImage + 'static;

    /// Whether the identifier resolves to an existing source.
    async fn exists(&self, identifier: &str) -> bool;

    /// Open the identified source as a pyramid.
    async fn open(&self, identifier: &str) -> Result<Self::Image, SourceError>;
}

// =============================================================================
// Filesystem Source
// =============================================================================

/// Image source backed by a directory tree.
///
/// Identifiers are sanitized, then resolved as
/// `<root>/<identifier><suffix>`. Files are decoded with the `image` crate
/// and expanded into a [`MemoryPyramid`].
pub struct FsImageSource {
    root: PathBuf,
    suffix: String,
    tile_width: u32,
}

impl FsImageSource {
    /// Create a source rooted at `root` with no identifier suffix.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            suffix: String::new(),
            tile_width: DEFAULT_TILE_WIDTH,
        }
    }

    /// Append a fixed suffix to every resolved identifier.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Tile grid edge length used for opened pyramids.
    pub fn with_tile_width(mut self, tile_width: u32) -> Self {
        self.tile_width = tile_width;
        self
    }

    /// Resolve an identifier to its backing path.
    pub fn resolve(&self, identifier: &str) -> PathBuf {
        let sanitized = sanitize_identifier(identifier);
        self.root.join(format!("{}{}", sanitized, self.suffix))
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    type Image = MemoryPyramid;

    async fn exists(&self, identifier: &str) -> bool {
        let path = self.resolve(identifier);
        tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn open(&self, identifier: &str) -> Result<Self::Image, SourceError> {
        let path = self.resolve(identifier);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(identifier.to_string())
            } else {
                SourceError::Io {
                    path: display_path(&path),
                    message: e.to_string(),
                }
            }
        })?;

        let decoded = image::load_from_memory(&bytes).map_err(|e| SourceError::Unreadable {
            path: display_path(&path),
            message: e.to_string(),
        })?;

        Ok(MemoryPyramid::from_base_image(
            identifier,
            decoded,
            self.tile_width,
        ))
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

// =============================================================================
// ImageRegistry
// =============================================================================

/// Registry of opened pyramid images.
///
/// Opening a gigapixel source is expensive, so opened images are cached with
/// LRU eviction and concurrent opens of the same identifier are collapsed
/// into one (singleflight).
pub struct ImageRegistry<S: ImageSource> {
    source: S,

    cache: RwLock<LruCache<String, Arc<S::Image>>>,

    /// In-flight opens, keyed by identifier
    in_flight: Mutex<HashMap<String, Arc<InFlightOpen<S::Image>>>>,
}

struct InFlightOpen<I> {
    notify: Notify,
    result: Mutex<Option<Result<Arc<I>, SourceError>>>,
}

impl<S: ImageSource> ImageRegistry<S> {
    /// Create a registry with the default cache capacity.
    pub fn new(source: S) -> Self {
        Self::with_capacity(source, DEFAULT_IMAGE_CACHE_CAPACITY)
    }

    /// Create a registry holding at most `capacity` opened images.
    pub fn with_capacity(source: S, capacity: usize) -> Self {
        Self {
            source,
            cache: RwLock::new(LruCache::new(
                std::num::NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Whether the identifier resolves to an existing source.
    pub async fn exists(&self, identifier: &str) -> bool {
        self.source.exists(identifier).await
    }

    /// Get an image, opening and caching it on first access.
    pub async fn get(&self, identifier: &str) -> Result<Arc<S::Image>, SourceError> {
        {
            let mut cache = self.cache.write().await;
            if let Some(image) = cache.get(identifier) {
                return Ok(image.clone());
            }
        }

        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;

                if let Some(state) = in_flight.get(identifier) {
                    state.clone()
                } else {
                    // We're the leader for opening this image
                    let state = Arc::new(InFlightOpen {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(identifier.to_string(), state.clone());
                    drop(in_flight);

                    let result = self.source.open(identifier).await.map(Arc::new);

                    {
                        let mut result_guard = state.result.lock().await;
                        *result_guard = Some(result.clone());
                    }

                    if let Ok(ref image) = result {
                        let mut cache = self.cache.write().await;
                        cache.put(identifier.to_string(), image.clone());
                    }

                    {
                        let mut in_flight = self.in_flight.lock().await;
                        in_flight.remove(identifier);
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

    /// Drop a cached image, forcing a reopen on next access.
    pub async fn invalidate(&self, identifier: &str) {
        let mut cache = self.cache.write().await;
        cache.pop(identifier);
    }

    /// Number of currently cached images.
    pub async fn cached_count(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ColourSpace;
    use crate::image::memory::PyramidLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sanitize_strips_traversal() {
        assert_eq!(sanitize_identifier("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_identifier("a/../b.tif"), "a/b.tif");
        assert_eq!(sanitize_identifier("plain.tif"), "plain.tif");
        // Re-formed traversals are stripped again
        assert_eq!(sanitize_identifier("..././b.tif"), "b.tif");
    }

    #[test]
    fn test_sanitize_url_decodes() {
        assert_eq!(sanitize_identifier("a%20b.tif"), "a b.tif");
        assert_eq!(sanitize_identifier("%2e%2e%2fsecret.tif"), "secret.tif");
    }

    #[test]
    fn test_fs_source_resolution() {
        let source = FsImageSource::new("/data").with_suffix(".tif");
        assert_eq!(
            source.resolve("slides/a"),
            PathBuf::from("/data/slides/a.tif")
        );
        assert_eq!(
            source.resolve("../slides/a"),
            PathBuf::from("/data/slides/a.tif")
        );
    }

    struct CountingSource {
        opens: AtomicUsize,
    }

    fn tiny_pyramid(identifier: &str) -> MemoryPyramid {
        MemoryPyramid::from_levels(
            identifier,
            vec![PyramidLevel {
                width: 4,
                height: 4,
                data: vec![0; 4 * 4 * 3],
            }],
            256,
            ColourSpace::Srgb,
            3,
            8,
        )
    }

    #[async_trait]
    impl ImageSource for CountingSource {
        type Image = MemoryPyramid;

        async fn exists(&self, identifier: &str) -> bool {
            !identifier.contains("missing")
        }

        async fn open(&self, identifier: &str) -> Result<Self::Image, SourceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if identifier.contains("missing") {
                return Err(SourceError::NotFound(identifier.to_string()));
            }
            Ok(tiny_pyramid(identifier))
        }
    }

    fn counting_registry() -> ImageRegistry<CountingSource> {
        ImageRegistry::new(CountingSource {
            opens: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_registry_caches_opens() {
        let registry = counting_registry();

        registry.get("a.tif").await.unwrap();
        registry.get("a.tif").await.unwrap();
        assert_eq!(registry.source.opens.load(Ordering::SeqCst), 1);

        registry.get("b.tif").await.unwrap();
        assert_eq!(registry.source.opens.load(Ordering::SeqCst), 2);
        assert_eq!(registry.cached_count().await, 2);
    }

    #[tokio::test]
    async fn test_registry_does_not_cache_failures() {
        let registry = counting_registry();

        assert!(registry.get("missing.tif").await.is_err());
        assert!(registry.get("missing.tif").await.is_err());
        // Failed opens are retried, not cached
        assert_eq!(registry.source.opens.load(Ordering::SeqCst), 2);
        assert_eq!(registry.cached_count().await, 0);
    }

    #[tokio::test]
    async fn test_registry_invalidate() {
        let registry = counting_registry();

        registry.get("a.tif").await.unwrap();
        registry.invalidate("a.tif").await;
        assert_eq!(registry.cached_count().await, 0);

        registry.get("a.tif").await.unwrap();
        assert_eq!(registry.source.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_registry_eviction() {
        let registry = ImageRegistry::with_capacity(
            CountingSource {
                opens: AtomicUsize::new(0),
            },
            2,
        );

        registry.get("a.tif").await.unwrap();
        registry.get("b.tif").await.unwrap();
        registry.get("c.tif").await.unwrap();
        assert_eq!(registry.cached_count().await, 2);

        // "a" was evicted and must be reopened
        registry.get("a.tif").await.unwrap();
        assert_eq!(registry.source.opens.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_concurrent_opens_collapse() {
        use std::sync::atomic::AtomicBool;
        use tokio::time::{sleep, Duration};

        struct SlowSource {
            opens: AtomicUsize,
            opening: AtomicBool,
        }

        #[async_trait]
        impl ImageSource for SlowSource {
            type Image = MemoryPyramid;

            async fn exists(&self, _identifier: &str) -> bool {
                true
            }

            async fn open(&self, identifier: &str) -> Result<Self::Image, SourceError> {
                let was_opening = self.opening.swap(true, Ordering::SeqCst);
                assert!(!was_opening, "concurrent opens for the same identifier");
                self.opens.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                self.opening.store(false, Ordering::SeqCst);
                Ok(tiny_pyramid(identifier))
            }
        }

        let registry = Arc::new(ImageRegistry::new(SlowSource {
            opens: AtomicUsize::new(0),
            opening: AtomicBool::new(false),
        }));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.get("a.tif").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(registry.source.opens.load(Ordering::SeqCst), 1);
    }
}
