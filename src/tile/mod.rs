//! Tile fetch, transform and encode layer.
//!
//! One tile of one source flows through this module on its way into a
//! composite response:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      render_tile()                         │
//! │  1. Compression strategy   3. Conditional transforms       │
//! │  2. Level DPI + ICC        4. Encode (if still raw)        │
//! └───────────┬───────────────────────────┬────────────────────┘
//!             │                           │
//!             ▼                           ▼
//!   ┌───────────────────┐      ┌────────────────────┐
//!   │ CachingTileEngine │      │ Jpeg/PngCompressor │
//!   │  (TileCache +     │      │  (image crate +    │
//!   │   singleflight)   │      │   metadata splice) │
//!   └───────────────────┘      └────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`render_tile`]: the per-source pipeline
//! - [`TileEngine`] / [`CachingTileEngine`]: cached fetch-or-compute
//! - [`TileCache`] / [`TileKey`]: size-bounded LRU over tile variants
//! - [`Compressor`] implementations per wire format
//! - [`transform`]: in-place pixel operations
//! - [`RawTile`] / [`CompressedTile`]: buffer types

pub mod cache;
pub mod compressor;
pub mod engine;
pub mod pipeline;
pub mod raw;
pub mod transform;

pub use cache::{TileCache, TileKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use compressor::{
    clamp_quality, compressor_for, is_valid_quality, Compressor, JpegCompressor, PngCompressor,
    DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use engine::{CachingTileEngine, FetchParams, Flip, TileEngine};
pub use pipeline::{
    level_dpi, render_tile, requires_raw_pixels, ColourOverride, PipelineOptions, ViewParams,
};
pub use raw::{CompressedTile, Encoding, RawTile};
