//! Pyramid image abstraction.
//!
//! This module defines the boundary the compositing core consumes:
//!
//! - [`PyramidImage`] - geometry, sample layout and metadata of one opened
//!   multi-resolution image, plus raw tile decoding
//! - [`MemoryPyramid`](memory::MemoryPyramid) - concrete pyramid backed by
//!   in-memory sample buffers
//! - [`ImageSource`](registry::ImageSource) / [`ImageRegistry`](registry::ImageRegistry) -
//!   opening sources by identifier, with LRU caching and singleflight
//!
//! Levels are indexed finest-first: level 0 is the full-resolution image and
//! each subsequent level halves width and height. The wire protocol counts
//! resolutions the other way round; see
//! [`protocol::deepzoom`](crate::protocol::deepzoom) for the conversion.

pub mod memory;
pub mod registry;

use crate::error::TileError;
use crate::tile::RawTile;

pub use memory::MemoryPyramid;
pub use registry::{sanitize_identifier, FsImageSource, ImageRegistry, ImageSource};

// =============================================================================
// Sample Properties
// =============================================================================

/// Colour space of an image's stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourSpace {
    /// Standard RGB
    Srgb,
    /// CIE L*a*b*, as stored by some scanner formats
    Cielab,
    /// Single-channel luminance
    Greyscale,
}

/// Unit of a physical resolution value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpiUnits {
    /// No meaningful physical unit
    Unitless,
    /// Pixels per inch
    PerInch,
    /// Pixels per centimetre
    PerCm,
}

/// Physical resolution of the full-resolution level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dpi {
    pub x: f32,
    pub y: f32,
    pub units: DpiUnits,
}

impl Dpi {
    /// Placeholder resolution for images that carry none.
    pub fn unknown() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            units: DpiUnits::Unitless,
        }
    }
}

// =============================================================================
// PyramidImage Trait
// =============================================================================

/// One opened pyramidal image.
///
/// Implementations expose per-level geometry and decode raw tiles; they do
/// not encode, transform or cache — those concerns sit above this boundary.
pub trait PyramidImage: Send + Sync {
    /// Stable identifier of this image, used in cache keys.
    fn identifier(&self) -> &str;

    /// Number of stored resolution levels.
    fn num_levels(&self) -> usize;

    /// Width in pixels of the given level, finest-first indexing.
    fn width(&self, level: usize) -> Option<u32>;

    /// Height in pixels of the given level, finest-first indexing.
    fn height(&self, level: usize) -> Option<u32>;

    /// Edge length of the square tile grid.
    fn tile_width(&self) -> u32;

    /// Colour space of the stored samples.
    fn colour_space(&self) -> ColourSpace;

    /// Samples per pixel.
    fn channel_count(&self) -> u8;

    /// Bits per sample (8 or 16).
    fn bits_per_channel(&self) -> u8;

    /// Physical resolution of the full-resolution level.
    fn dpi(&self) -> Dpi;

    /// Opaque metadata by key (e.g. an `icc` profile).
    fn metadata(&self, key: &str) -> Option<&[u8]>;

    /// Decode the raw samples of one tile.
    ///
    /// `tile_index` is the linear index `y * tiles_per_row + x` within the
    /// level. Out-of-range levels or indices must fail, never wrap.
    fn read_tile(&self, level: usize, tile_index: u32) -> Result<RawTile, TileError>;

    /// Width of the full-resolution image.
    fn full_width(&self) -> u32 {
        self.width(0).unwrap_or(0)
    }

    /// Height of the full-resolution image.
    fn full_height(&self) -> u32 {
        self.height(0).unwrap_or(0)
    }

    /// Total number of tiles in the given level's grid.
    fn tile_count(&self, level: usize) -> Option<u32> {
        let width = self.width(level)?;
        let height = self.height(level)?;
        let tw = self.tile_width();
        Some(width.div_ceil(tw).max(1) * height.div_ceil(tw).max(1))
    }
}
