//! In-memory pyramid backed by decoded sample buffers.
//!
//! [`MemoryPyramid`] holds every level's samples in memory. Levels are either
//! supplied directly (exotic layouts, tests) or derived from a single base
//! image by repeated halving until the coarsest level fits inside one tile.

use std::collections::HashMap;

use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::TileError;
use crate::tile::RawTile;

use super::{ColourSpace, Dpi, PyramidImage};

/// Default edge length of the square tile grid.
pub const DEFAULT_TILE_WIDTH: u32 = 256;

/// Samples of one stored resolution level.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    /// Level width in pixels
    pub width: u32,

    /// Level height in pixels
    pub height: u32,

    /// Interleaved samples, row-major, `channels * bits_per_channel / 8`
    /// bytes per pixel
    pub data: Vec<u8>,
}

/// A pyramidal image whose levels live in memory.
pub struct MemoryPyramid {
    identifier: String,
    levels: Vec<PyramidLevel>,
    tile_width: u32,
    colour_space: ColourSpace,
    channels: u8,
    bits_per_channel: u8,
    dpi: Dpi,
    metadata: HashMap<String, Vec<u8>>,
}

impl MemoryPyramid {
    /// Build a pyramid from a decoded base image.
    ///
    /// The base becomes level 0; further levels halve width and height
    /// (bilinear resampling) until both dimensions fit inside one tile.
    pub fn from_base_image(
        identifier: impl Into<String>,
        base: DynamicImage,
        tile_width: u32,
    ) -> Self {
        let rgb = base.to_rgb8();
        let (full_width, full_height) = rgb.dimensions();

        let mut levels = vec![PyramidLevel {
            width: full_width,
            height: full_height,
            data: rgb.clone().into_raw(),
        }];

        let mut current = DynamicImage::ImageRgb8(rgb);
        let (mut width, mut height) = (full_width, full_height);
        while width > tile_width || height > tile_width {
            width = (width / 2).max(1);
            height = (height / 2).max(1);
            current = current.resize_exact(width, height, FilterType::Triangle);
            levels.push(PyramidLevel {
                width,
                height,
                data: current.to_rgb8().into_raw(),
            });
        }

        Self {
            identifier: identifier.into(),
            levels,
            tile_width,
            colour_space: ColourSpace::Srgb,
            channels: 3,
            bits_per_channel: 8,
            dpi: Dpi::unknown(),
            metadata: HashMap::new(),
        }
    }

    /// Build a pyramid from pre-computed levels.
    ///
    /// `levels` is finest-first; every level's `data` length must match
    /// `width * height * channels * bits_per_channel / 8`.
    pub fn from_levels(
        identifier: impl Into<String>,
        levels: Vec<PyramidLevel>,
        tile_width: u32,
        colour_space: ColourSpace,
        channels: u8,
        bits_per_channel: u8,
    ) -> Self {
        debug_assert!(levels.iter().all(|level| {
            level.data.len()
                == level.width as usize
                    * level.height as usize
                    * channels as usize
                    * (bits_per_channel as usize / 8)
        }));

        Self {
            identifier: identifier.into(),
            levels,
            tile_width,
            colour_space,
            channels,
            bits_per_channel,
            dpi: Dpi::unknown(),
            metadata: HashMap::new(),
        }
    }

    /// Set the physical resolution of the full-resolution level.
    pub fn with_dpi(mut self, dpi: Dpi) -> Self {
        self.dpi = dpi;
        self
    }

    /// Attach an opaque metadata entry (e.g. an `icc` profile).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl PyramidImage for MemoryPyramid {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn width(&self, level: usize) -> Option<u32> {
        self.levels.get(level).map(|l| l.width)
    }

    fn height(&self, level: usize) -> Option<u32> {
        self.levels.get(level).map(|l| l.height)
    }

    fn tile_width(&self) -> u32 {
        self.tile_width
    }

    fn colour_space(&self) -> ColourSpace {
        self.colour_space
    }

    fn channel_count(&self) -> u8 {
        self.channels
    }

    fn bits_per_channel(&self) -> u8 {
        self.bits_per_channel
    }

    fn dpi(&self) -> Dpi {
        self.dpi
    }

    fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.metadata.get(key).map(Vec::as_slice)
    }

    fn read_tile(&self, level: usize, tile_index: u32) -> Result<RawTile, TileError> {
        let stored = self.levels.get(level).ok_or(TileError::InvalidLevel {
            level,
            num_levels: self.levels.len(),
        })?;

        let tiles_x = stored.width.div_ceil(self.tile_width).max(1);
        let tiles_y = stored.height.div_ceil(self.tile_width).max(1);
        let num_tiles = tiles_x * tiles_y;
        if tile_index >= num_tiles {
            return Err(TileError::TileOutOfBounds {
                level,
                tile: tile_index,
                num_tiles,
            });
        }

        let tile_col = tile_index % tiles_x;
        let tile_row = tile_index / tiles_x;
        let origin_x = tile_col * self.tile_width;
        let origin_y = tile_row * self.tile_width;

        // Edge tiles are clipped to the level bounds, never padded.
        let tile_w = self.tile_width.min(stored.width - origin_x);
        let tile_h = self.tile_width.min(stored.height - origin_y);

        let bytes_per_pixel = self.channels as usize * (self.bits_per_channel as usize / 8);
        let level_stride = stored.width as usize * bytes_per_pixel;
        let row_bytes = tile_w as usize * bytes_per_pixel;

        let mut data = Vec::with_capacity(tile_h as usize * row_bytes);
        for row in 0..tile_h as usize {
            let start =
                (origin_y as usize + row) * level_stride + origin_x as usize * bytes_per_pixel;
            data.extend_from_slice(&stored.data[start..start + row_bytes]);
        }

        Ok(RawTile::uncompressed(
            tile_w,
            tile_h,
            self.channels,
            self.bits_per_channel,
            data,
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Level whose pixel bytes encode their own (x, y) position.
    fn coordinate_level(width: u32, height: u32) -> PyramidLevel {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(0);
            }
        }
        PyramidLevel {
            width,
            height,
            data,
        }
    }

    fn two_level_pyramid() -> MemoryPyramid {
        MemoryPyramid::from_levels(
            "test",
            vec![coordinate_level(600, 500), coordinate_level(300, 250)],
            256,
            ColourSpace::Srgb,
            3,
            8,
        )
    }

    #[test]
    fn test_geometry_accessors() {
        let pyramid = two_level_pyramid();
        assert_eq!(pyramid.num_levels(), 2);
        assert_eq!(pyramid.width(0), Some(600));
        assert_eq!(pyramid.height(1), Some(250));
        assert_eq!(pyramid.width(2), None);
        assert_eq!(pyramid.full_width(), 600);
        assert_eq!(pyramid.full_height(), 500);
        // 600x500 at tile 256: 3x2 grid
        assert_eq!(pyramid.tile_count(0), Some(6));
        assert_eq!(pyramid.tile_count(1), Some(2));
    }

    #[test]
    fn test_read_interior_tile() {
        let pyramid = two_level_pyramid();
        let tile = pyramid.read_tile(0, 0).unwrap();
        assert_eq!((tile.width, tile.height), (256, 256));
        assert_eq!(tile.channels, 3);
        assert_eq!(tile.data.len(), tile.expected_len());
        // Top-left pixel of tile 0 is level pixel (0, 0)
        assert_eq!(&tile.data[..3], &[0, 0, 0]);
        // Pixel (10, 4) within the tile is level pixel (10, 4)
        let offset = (4 * 256 + 10) * 3;
        assert_eq!(&tile.data[offset..offset + 3], &[10, 4, 0]);
    }

    #[test]
    fn test_read_edge_tile_is_clipped() {
        let pyramid = two_level_pyramid();
        // Tile (2, 1) in the 3x2 grid: index 5, clipped to 88x244
        let tile = pyramid.read_tile(0, 5).unwrap();
        assert_eq!(tile.width, 600 - 2 * 256);
        assert_eq!(tile.height, 500 - 256);
        // Its first pixel is level pixel (512, 256)
        assert_eq!(&tile.data[..3], &[(512 % 256) as u8, 0, 0]);
    }

    #[test]
    fn test_read_tile_out_of_range() {
        let pyramid = two_level_pyramid();
        assert!(matches!(
            pyramid.read_tile(0, 6),
            Err(TileError::TileOutOfBounds { num_tiles: 6, .. })
        ));
        assert!(matches!(
            pyramid.read_tile(5, 0),
            Err(TileError::InvalidLevel { num_levels: 2, .. })
        ));
    }

    #[test]
    fn test_from_base_image_builds_levels() {
        let base = DynamicImage::new_rgb8(1000, 600);
        let pyramid = MemoryPyramid::from_base_image("base", base, 256);

        // 1000x600 -> 500x300 -> 250x150: coarsest fits one 256 tile
        assert_eq!(pyramid.num_levels(), 3);
        assert_eq!(pyramid.width(0), Some(1000));
        assert_eq!(pyramid.width(1), Some(500));
        assert_eq!((pyramid.width(2), pyramid.height(2)), (Some(250), Some(150)));
        assert_eq!(pyramid.colour_space(), ColourSpace::Srgb);
        assert_eq!(pyramid.channel_count(), 3);
        assert_eq!(pyramid.bits_per_channel(), 8);
    }

    #[test]
    fn test_sixteen_bit_tile_bytes() {
        let level = PyramidLevel {
            width: 4,
            height: 2,
            data: vec![0xAB; 4 * 2 * 2],
        };
        let pyramid = MemoryPyramid::from_levels(
            "deep",
            vec![level],
            256,
            ColourSpace::Greyscale,
            1,
            16,
        );
        let tile = pyramid.read_tile(0, 0).unwrap();
        assert_eq!(tile.bits_per_channel, 16);
        assert_eq!(tile.data.len(), 16);
    }

    #[test]
    fn test_metadata_and_dpi() {
        let pyramid = two_level_pyramid()
            .with_dpi(Dpi {
                x: 40_000.0,
                y: 40_000.0,
                units: super::super::DpiUnits::PerCm,
            })
            .with_metadata("icc", vec![1, 2, 3]);
        assert_eq!(pyramid.metadata("icc"), Some(&[1u8, 2, 3][..]));
        assert_eq!(pyramid.metadata("xmp"), None);
        assert_eq!(pyramid.dpi().x, 40_000.0);
    }
}
