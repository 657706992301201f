//! Per-source tile rendering pipeline.
//!
//! For one opened pyramid and resolved tile coordinates, the pipeline:
//!
//! 1. Decides whether the tile must be fetched uncompressed (any pending
//!    pixel-level work rules out pre-encoded bytes)
//! 2. Computes the effective physical resolution of the requested level and
//!    configures the compressor with it (plus the ICC profile, if any)
//! 3. Fetches the tile through the [`TileEngine`]
//! 4. Applies the conditional transforms in fixed order: colour conversion,
//!    band flattening, greyscale
//! 5. Encodes, unless the engine already served encoded bytes
//!
//! The output is a [`CompressedTile`] ready for composition.

use tracing::debug;

use crate::error::TileError;
use crate::image::{ColourSpace, Dpi, PyramidImage};
use crate::protocol::deepzoom::pyramid_level;
use crate::protocol::TileFormat;

use super::compressor::{compressor_for, DEFAULT_JPEG_QUALITY};
use super::engine::{FetchParams, Flip, TileEngine};
use super::raw::{CompressedTile, Encoding};
use super::transform;

// =============================================================================
// View Parameters
// =============================================================================

/// Requested output colour treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColourOverride {
    /// Keep the source colour space
    #[default]
    None,
    /// Single-channel luminance output
    Greyscale,
    /// Thresholded bilevel output
    Binary,
}

/// Per-request rendering overrides.
///
/// Defaults are neutral; the wire protocol only sets a subset (greyscale,
/// quality), the rest is reserved for embedding callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewParams {
    /// Output colour treatment
    pub colourspace: ColourOverride,

    /// Rotation in degrees
    pub rotation: f32,

    /// Mirroring
    pub flip: Flip,

    /// View-sequence angle
    pub angle: i32,

    /// Quality layers to decode (0 = all)
    pub quality_layers: i32,

    /// Histogram equalization requested
    pub equalization: bool,

    /// Floating-point pixel processing (contrast, gamma, ...) requested
    pub float_processing: bool,

    /// Embed the source ICC profile into encoded output
    pub embed_icc: bool,

    /// JPEG quality for encoding
    pub jpeg_quality: u8,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            colourspace: ColourOverride::None,
            rotation: 0.0,
            flip: Flip::None,
            angle: 0,
            quality_layers: 0,
            equalization: false,
            float_processing: false,
            embed_icc: true,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl ViewParams {
    fn fetch_params(&self) -> FetchParams {
        FetchParams {
            angle: self.angle,
            flip: self.flip,
            quality_layers: self.quality_layers,
            jpeg_quality: self.jpeg_quality,
            embed_icc: self.embed_icc,
        }
    }
}

/// Pipeline policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Channel count above which lossless output is flattened to 3 bands
    pub lossless_flatten_threshold: u8,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            lossless_flatten_threshold: 4,
        }
    }
}

// =============================================================================
// Compression Strategy
// =============================================================================

/// Whether the tile must be fetched as raw pixels.
///
/// True when any pending operation needs sample-level access, so an
/// already-encoded tile cannot be reused: deep bit depths, CIELAB sources,
/// alpha or extra spectral bands, a channel reduction implied by greyscale
/// output on plain RGB, float processing, equalization, rotation or flip.
pub fn requires_raw_pixels(image: &dyn PyramidImage, view: &ViewParams) -> bool {
    let wants_channel_reduction = matches!(
        view.colourspace,
        ColourOverride::Greyscale | ColourOverride::Binary
    ) && image.channel_count() == 3
        && image.bits_per_channel() == 8;

    image.bits_per_channel() > 8
        || image.colour_space() == ColourSpace::Cielab
        || image.channel_count() == 2
        || image.channel_count() > 3
        || wants_channel_reduction
        || view.float_processing
        || view.equalization
        || view.rotation != 0.0
        || view.flip != Flip::None
}

/// Effective physical resolution of a pyramid level.
///
/// The base DPI scales with the ratio of the level's pixel size to the
/// full-resolution size, so codecs that embed physical resolution stay
/// accurate per level.
pub fn level_dpi(image: &dyn PyramidImage, level: usize) -> Dpi {
    let base = image.dpi();
    let full_width = image.full_width().max(1) as f32;
    let full_height = image.full_height().max(1) as f32;
    let level_width = image.width(level).unwrap_or(0) as f32;
    let level_height = image.height(level).unwrap_or(0) as f32;

    Dpi {
        x: base.x * level_width / full_width,
        y: base.y * level_height / full_height,
        units: base.units,
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render one tile of one opened source.
///
/// `resolution` is the mapped server resolution (coarsest-first) and `tile`
/// the linear tile index; both already resolved against this source's
/// geometry. Negative values are a caller defect and fail with
/// [`TileError::InvalidCoordinates`].
pub async fn render_tile(
    engine: &dyn TileEngine,
    image: &dyn PyramidImage,
    resolution: i64,
    tile: i64,
    format: TileFormat,
    view: &ViewParams,
    options: &PipelineOptions,
) -> Result<CompressedTile, TileError> {
    if resolution < 0 || tile < 0 {
        return Err(TileError::InvalidCoordinates { resolution, tile });
    }

    let num_levels = image.num_levels();
    if resolution as usize >= num_levels {
        return Err(TileError::InvalidLevel {
            level: resolution as usize,
            num_levels,
        });
    }
    let level = pyramid_level(resolution as u32, num_levels);

    // Pre-encoded bytes are only usable when no pixel work is pending
    let desired = if requires_raw_pixels(image, view) {
        Encoding::Uncompressed
    } else {
        format_encoding(format)
    };

    let mut compressor = compressor_for(format, view.jpeg_quality);
    let dpi = level_dpi(image, level);
    if dpi.x > 0.0 || dpi.y > 0.0 {
        compressor.set_resolution(dpi);
    }

    if view.embed_icc {
        if let Some(profile) = image.metadata("icc") {
            debug!(bytes = profile.len(), "embedding ICC profile");
            compressor.set_icc_profile(profile.to_vec());
        }
    }

    let mut raw = engine
        .fetch(image, level, tile as u32, &view.fetch_params(), desired)
        .await?;

    if image.colour_space() == ColourSpace::Cielab {
        transform::lab_to_srgb(&mut raw)?;
    }

    // Reduce to 1 or 3 bands for alpha or multi-band tiles going to JPEG;
    // for PNG only strip past the policy threshold
    let channels = raw.channels;
    let flatten_for_lossy =
        format == TileFormat::Jpeg && (channels == 2 || channels > 3);
    let flatten_for_lossless =
        format == TileFormat::Png && channels > options.lossless_flatten_threshold;
    if flatten_for_lossy || flatten_for_lossless {
        let bands = if channels == 2 { 1 } else { 3 };
        transform::flatten(&mut raw, bands)?;
    }

    if image.colour_space() == ColourSpace::Srgb && view.colourspace == ColourOverride::Greyscale
    {
        transform::to_greyscale(&mut raw)?;
    }

    let compressed_len = if raw.encoding == Encoding::Uncompressed {
        compressor.compress(&mut raw)?
    } else {
        raw.data.len()
    };

    Ok(CompressedTile {
        tile: raw,
        compressed_len,
    })
}

fn format_encoding(format: TileFormat) -> Encoding {
    match format {
        TileFormat::Jpeg => Encoding::Jpeg,
        TileFormat::Png => Encoding::Png,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::memory::PyramidLevel;
    use crate::image::{DpiUnits, MemoryPyramid};
    use crate::tile::engine::CachingTileEngine;

    fn rgb_pyramid() -> MemoryPyramid {
        MemoryPyramid::from_levels(
            "rgb.tif",
            vec![
                PyramidLevel {
                    width: 512,
                    height: 512,
                    data: vec![200; 512 * 512 * 3],
                },
                PyramidLevel {
                    width: 256,
                    height: 256,
                    data: vec![200; 256 * 256 * 3],
                },
            ],
            256,
            ColourSpace::Srgb,
            3,
            8,
        )
    }

    fn view() -> ViewParams {
        ViewParams::default()
    }

    #[test]
    fn test_requires_raw_for_deep_and_lab() {
        let plain = rgb_pyramid();
        assert!(!requires_raw_pixels(&plain, &view()));

        let deep = MemoryPyramid::from_levels(
            "deep.tif",
            vec![PyramidLevel {
                width: 4,
                height: 4,
                data: vec![0; 4 * 4 * 3 * 2],
            }],
            256,
            ColourSpace::Srgb,
            3,
            16,
        );
        assert!(requires_raw_pixels(&deep, &view()));

        let lab = MemoryPyramid::from_levels(
            "lab.tif",
            vec![PyramidLevel {
                width: 4,
                height: 4,
                data: vec![0; 4 * 4 * 3],
            }],
            256,
            ColourSpace::Cielab,
            3,
            8,
        );
        assert!(requires_raw_pixels(&lab, &view()));
    }

    #[test]
    fn test_requires_raw_for_band_counts() {
        for channels in [2u8, 4, 5] {
            let image = MemoryPyramid::from_levels(
                "bands.tif",
                vec![PyramidLevel {
                    width: 2,
                    height: 2,
                    data: vec![0; 4 * channels as usize],
                }],
                256,
                ColourSpace::Srgb,
                channels,
                8,
            );
            assert!(requires_raw_pixels(&image, &view()), "channels={channels}");
        }
    }

    #[test]
    fn test_requires_raw_for_view_overrides() {
        let image = rgb_pyramid();

        let mut greyscale = view();
        greyscale.colourspace = ColourOverride::Greyscale;
        assert!(requires_raw_pixels(&image, &greyscale));

        let mut rotated = view();
        rotated.rotation = 90.0;
        assert!(requires_raw_pixels(&image, &rotated));

        let mut flipped = view();
        flipped.flip = Flip::Horizontal;
        assert!(requires_raw_pixels(&image, &flipped));

        let mut equalized = view();
        equalized.equalization = true;
        assert!(requires_raw_pixels(&image, &equalized));

        let mut float = view();
        float.float_processing = true;
        assert!(requires_raw_pixels(&image, &float));
    }

    #[test]
    fn test_level_dpi_scales_with_level() {
        let image = rgb_pyramid().with_dpi(Dpi {
            x: 1000.0,
            y: 1000.0,
            units: DpiUnits::PerInch,
        });
        let full = level_dpi(&image, 0);
        assert_eq!(full.x, 1000.0);
        let half = level_dpi(&image, 1);
        assert_eq!(half.x, 500.0);
        assert_eq!(half.units, DpiUnits::PerInch);
    }

    #[tokio::test]
    async fn test_render_plain_rgb_jpeg() {
        let engine = CachingTileEngine::new();
        let image = rgb_pyramid();

        // Server resolution 1 is the finest level of a 2-level pyramid
        let compressed =
            render_tile(&engine, &image, 1, 0, TileFormat::Jpeg, &view(), &PipelineOptions::default())
                .await
                .unwrap();

        assert_eq!(compressed.tile.encoding, Encoding::Jpeg);
        assert_eq!(compressed.compressed_len, compressed.tile.data.len());
        assert_eq!(&compressed.payload()[..2], &[0xFF, 0xD8]);
        assert_eq!((compressed.tile.width, compressed.tile.height), (256, 256));
    }

    #[tokio::test]
    async fn test_render_negative_coordinates_rejected() {
        let engine = CachingTileEngine::new();
        let image = rgb_pyramid();

        let result = render_tile(
            &engine,
            &image,
            -1,
            0,
            TileFormat::Jpeg,
            &view(),
            &PipelineOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(TileError::InvalidCoordinates { .. })));

        let result = render_tile(
            &engine,
            &image,
            0,
            -3,
            TileFormat::Jpeg,
            &view(),
            &PipelineOptions::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(TileError::InvalidCoordinates {
                resolution: 0,
                tile: -3
            })
        ));
    }

    #[tokio::test]
    async fn test_render_greyscale_override() {
        let engine = CachingTileEngine::new();
        let image = rgb_pyramid();
        let mut greyscale = view();
        greyscale.colourspace = ColourOverride::Greyscale;

        let compressed = render_tile(
            &engine,
            &image,
            0,
            0,
            TileFormat::Png,
            &greyscale,
            &PipelineOptions::default(),
        )
        .await
        .unwrap();

        // The override forced raw fetch, greyscale reduction, PNG encode
        assert_eq!(compressed.tile.channels, 1);
        assert_eq!(compressed.tile.encoding, Encoding::Png);
    }

    #[tokio::test]
    async fn test_render_cielab_source_converts() {
        let engine = CachingTileEngine::new();
        // A 2x2 CIELAB tile of L*=100 (white)
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[255, 0, 0]);
        }
        let image = MemoryPyramid::from_levels(
            "lab.tif",
            vec![PyramidLevel {
                width: 2,
                height: 2,
                data,
            }],
            256,
            ColourSpace::Cielab,
            3,
            8,
        );

        let compressed = render_tile(
            &engine,
            &image,
            0,
            0,
            TileFormat::Png,
            &view(),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();

        // Decode the PNG and check the white point survived
        let decoded = image::load_from_memory(compressed.payload()).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[tokio::test]
    async fn test_render_flattens_rgba_for_jpeg() {
        let engine = CachingTileEngine::new();
        let image = MemoryPyramid::from_levels(
            "rgba.tif",
            vec![PyramidLevel {
                width: 4,
                height: 4,
                data: vec![128; 4 * 4 * 4],
            }],
            256,
            ColourSpace::Srgb,
            4,
            8,
        );

        let compressed = render_tile(
            &engine,
            &image,
            0,
            0,
            TileFormat::Jpeg,
            &view(),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(compressed.tile.channels, 3);
        assert_eq!(compressed.tile.encoding, Encoding::Jpeg);
    }

    #[tokio::test]
    async fn test_render_keeps_rgba_for_png() {
        let engine = CachingTileEngine::new();
        let image = MemoryPyramid::from_levels(
            "rgba.tif",
            vec![PyramidLevel {
                width: 4,
                height: 4,
                data: vec![128; 4 * 4 * 4],
            }],
            256,
            ColourSpace::Srgb,
            4,
            8,
        );

        // 4 channels sit at the default threshold: no flattening for PNG
        let compressed = render_tile(
            &engine,
            &image,
            0,
            0,
            TileFormat::Png,
            &view(),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(compressed.tile.channels, 4);

        // A tightened policy flattens it
        let strict = PipelineOptions {
            lossless_flatten_threshold: 3,
        };
        let compressed = render_tile(&engine, &image, 0, 0, TileFormat::Png, &view(), &strict)
            .await
            .unwrap();
        assert_eq!(compressed.tile.channels, 3);
    }

    #[tokio::test]
    async fn test_render_grey_alpha_flattens_to_grey() {
        let engine = CachingTileEngine::new();
        let image = MemoryPyramid::from_levels(
            "la.tif",
            vec![PyramidLevel {
                width: 4,
                height: 4,
                data: vec![99; 4 * 4 * 2],
            }],
            256,
            ColourSpace::Greyscale,
            2,
            8,
        );

        let compressed = render_tile(
            &engine,
            &image,
            0,
            0,
            TileFormat::Jpeg,
            &view(),
            &PipelineOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(compressed.tile.channels, 1);
    }

    #[tokio::test]
    async fn test_render_resolution_past_pyramid_fails() {
        let engine = CachingTileEngine::new();
        let image = rgb_pyramid();

        let result = render_tile(
            &engine,
            &image,
            7,
            0,
            TileFormat::Jpeg,
            &view(),
            &PipelineOptions::default(),
        )
        .await;
        assert!(matches!(result, Err(TileError::InvalidLevel { .. })));
    }
}
