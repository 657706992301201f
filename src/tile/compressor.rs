//! Tile compressors.
//!
//! One compressor per wire format. A compressor is configured per request
//! (physical resolution, ICC profile) and then encodes uncompressed tiles in
//! place, returning the valid encoded byte length.
//!
//! The `image` crate produces the bitstreams; physical resolution and ICC
//! metadata are spliced into the encoded output directly (JFIF APP0 density,
//! APP2 `ICC_PROFILE` segments, PNG `pHYs` chunk), since the encoders do not
//! expose those knobs.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tracing::debug;

use crate::error::TileError;
use crate::image::{Dpi, DpiUnits};
use crate::protocol::TileFormat;

use super::raw::{Encoding, RawTile};
use super::transform::reduce_to_eight_bits;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Validate a JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality into the valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Encoder for one wire format.
pub trait Compressor: Send {
    /// Encode an uncompressed tile in place.
    ///
    /// On success `tile.data` holds the encoded bitstream and the returned
    /// length counts its valid bytes.
    fn compress(&self, tile: &mut RawTile) -> Result<usize, TileError>;

    /// MIME type of the produced bitstream.
    fn mime_type(&self) -> &'static str;

    /// Encoding tag of the produced bitstream.
    fn encoding(&self) -> Encoding;

    /// Set the physical resolution embedded in subsequent encodes.
    fn set_resolution(&mut self, dpi: Dpi);

    /// Attach an ICC profile to subsequent encodes.
    fn set_icc_profile(&mut self, profile: Vec<u8>);
}

/// Construct the compressor for a wire format.
pub fn compressor_for(format: TileFormat, jpeg_quality: u8) -> Box<dyn Compressor> {
    match format {
        TileFormat::Jpeg => Box::new(JpegCompressor::new(jpeg_quality)),
        TileFormat::Png => Box::new(PngCompressor::new()),
    }
}

// =============================================================================
// JPEG
// =============================================================================

/// JPEG compressor with configurable quality.
pub struct JpegCompressor {
    quality: u8,
    resolution: Option<Dpi>,
    icc: Option<Vec<u8>>,
}

impl JpegCompressor {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
            resolution: None,
            icc: None,
        }
    }
}

impl Compressor for JpegCompressor {
    fn compress(&self, tile: &mut RawTile) -> Result<usize, TileError> {
        if tile.bits_per_channel == 16 {
            reduce_to_eight_bits(tile);
        }

        let color_type = match tile.channels {
            1 => ExtendedColorType::L8,
            3 => ExtendedColorType::Rgb8,
            other => {
                return Err(TileError::Encode {
                    message: format!("JPEG cannot encode {other}-channel tiles"),
                })
            }
        };

        let mut output = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
        encoder
            .write_image(&tile.data, tile.width, tile.height, color_type)
            .map_err(|e| TileError::Encode {
                message: e.to_string(),
            })?;

        if let Some(dpi) = self.resolution {
            apply_jfif_density(&mut output, dpi);
        }
        if let Some(ref profile) = self.icc {
            insert_icc_segments(&mut output, profile);
        }

        let len = output.len();
        tile.data = output;
        tile.encoding = Encoding::Jpeg;
        Ok(len)
    }

    fn mime_type(&self) -> &'static str {
        "image/jpeg"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Jpeg
    }

    fn set_resolution(&mut self, dpi: Dpi) {
        self.resolution = Some(dpi);
    }

    fn set_icc_profile(&mut self, profile: Vec<u8>) {
        self.icc = Some(profile);
    }
}

// =============================================================================
// PNG
// =============================================================================

/// PNG compressor.
///
/// Physical resolution is embedded as a `pHYs` chunk. ICC profiles are not
/// embedded: `iCCP` requires a zlib-compressed payload.
pub struct PngCompressor {
    resolution: Option<Dpi>,
}

impl PngCompressor {
    pub fn new() -> Self {
        Self { resolution: None }
    }
}

impl Default for PngCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for PngCompressor {
    fn compress(&self, tile: &mut RawTile) -> Result<usize, TileError> {
        let color_type = match (tile.channels, tile.bits_per_channel) {
            (1, 8) => ExtendedColorType::L8,
            (2, 8) => ExtendedColorType::La8,
            (3, 8) => ExtendedColorType::Rgb8,
            (4, 8) => ExtendedColorType::Rgba8,
            (1, 16) => ExtendedColorType::L16,
            (2, 16) => ExtendedColorType::La16,
            (3, 16) => ExtendedColorType::Rgb16,
            (4, 16) => ExtendedColorType::Rgba16,
            (channels, bits) => {
                return Err(TileError::Encode {
                    message: format!("PNG cannot encode {channels} channels at {bits} bits"),
                })
            }
        };

        // PNG stores 16-bit samples big-endian
        let samples;
        let data: &[u8] = if tile.bits_per_channel == 16 {
            samples = to_big_endian(&tile.data);
            &samples
        } else {
            &tile.data
        };

        let mut output = Vec::new();
        let encoder = PngEncoder::new(&mut output);
        encoder
            .write_image(data, tile.width, tile.height, color_type)
            .map_err(|e| TileError::Encode {
                message: e.to_string(),
            })?;

        if let Some(dpi) = self.resolution {
            insert_phys_chunk(&mut output, dpi);
        }

        let len = output.len();
        tile.data = output;
        tile.encoding = Encoding::Png;
        Ok(len)
    }

    fn mime_type(&self) -> &'static str {
        "image/png"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Png
    }

    fn set_resolution(&mut self, dpi: Dpi) {
        self.resolution = Some(dpi);
    }

    fn set_icc_profile(&mut self, _profile: Vec<u8>) {
        debug!("ICC profile embedding is not supported for PNG output");
    }
}

fn to_big_endian(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for pair in data.chunks_exact(2) {
        let sample = u16::from_ne_bytes([pair[0], pair[1]]);
        out.extend_from_slice(&sample.to_be_bytes());
    }
    out
}

// =============================================================================
// JPEG Metadata Splicing
// =============================================================================

/// Write the density fields of the JFIF APP0 segment, inserting the segment
/// after SOI when the encoder did not emit one.
fn apply_jfif_density(jpeg: &mut Vec<u8>, dpi: Dpi) {
    let units = match dpi.units {
        DpiUnits::Unitless => 0u8,
        DpiUnits::PerInch => 1,
        DpiUnits::PerCm => 2,
    };
    let x = (dpi.x.round().max(0.0) as u32).min(u16::MAX as u32) as u16;
    let y = (dpi.y.round().max(0.0) as u32).min(u16::MAX as u32) as u16;

    let has_jfif = jpeg.len() >= 18
        && jpeg[2] == 0xFF
        && jpeg[3] == 0xE0
        && &jpeg[6..11] == b"JFIF\0";

    if has_jfif {
        jpeg[13] = units;
        jpeg[14..16].copy_from_slice(&x.to_be_bytes());
        jpeg[16..18].copy_from_slice(&y.to_be_bytes());
    } else {
        let mut segment = Vec::with_capacity(18);
        segment.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        segment.extend_from_slice(b"JFIF\0");
        segment.extend_from_slice(&[0x01, 0x01, units]);
        segment.extend_from_slice(&x.to_be_bytes());
        segment.extend_from_slice(&y.to_be_bytes());
        segment.extend_from_slice(&[0x00, 0x00]);
        jpeg.splice(2..2, segment);
    }
}

/// Largest ICC payload one APP2 segment can carry.
const ICC_SEGMENT_CAPACITY: usize = 65_519 - 14;

/// Insert the profile as APP2 `ICC_PROFILE` segments after APP0 (or SOI).
fn insert_icc_segments(jpeg: &mut Vec<u8>, profile: &[u8]) {
    if profile.is_empty() {
        return;
    }

    // Insertion point: past SOI, and past the APP0 segment when present
    let mut pos = 2;
    if jpeg.len() >= 6 && jpeg[2] == 0xFF && jpeg[3] == 0xE0 {
        let len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        pos = 4 + len;
    }

    let chunks: Vec<&[u8]> = profile.chunks(ICC_SEGMENT_CAPACITY).collect();
    let count = chunks.len().min(255) as u8;

    let mut segments = Vec::new();
    for (index, chunk) in chunks.iter().take(255).enumerate() {
        let payload_len = 2 + 12 + 2 + chunk.len();
        segments.extend_from_slice(&[0xFF, 0xE2]);
        segments.extend_from_slice(&(payload_len as u16).to_be_bytes());
        segments.extend_from_slice(b"ICC_PROFILE\0");
        segments.push(index as u8 + 1);
        segments.push(count);
        segments.extend_from_slice(chunk);
    }

    jpeg.splice(pos..pos, segments);
}

// =============================================================================
// PNG Metadata Splicing
// =============================================================================

/// Insert a `pHYs` chunk before the first IDAT chunk.
fn insert_phys_chunk(png: &mut Vec<u8>, dpi: Dpi) {
    let (x_ppm, y_ppm, unit) = match dpi.units {
        // 1 inch = 0.0254 m
        DpiUnits::PerInch => (
            (dpi.x as f64 / 0.0254).round() as u32,
            (dpi.y as f64 / 0.0254).round() as u32,
            1u8,
        ),
        DpiUnits::PerCm => (
            (dpi.x as f64 * 100.0).round() as u32,
            (dpi.y as f64 * 100.0).round() as u32,
            1u8,
        ),
        // Aspect ratio only
        DpiUnits::Unitless => (dpi.x.round() as u32, dpi.y.round() as u32, 0u8),
    };

    let mut chunk_body = Vec::with_capacity(13);
    chunk_body.extend_from_slice(b"pHYs");
    chunk_body.extend_from_slice(&x_ppm.to_be_bytes());
    chunk_body.extend_from_slice(&y_ppm.to_be_bytes());
    chunk_body.push(unit);

    let mut chunk = Vec::with_capacity(21);
    chunk.extend_from_slice(&9u32.to_be_bytes());
    chunk.extend_from_slice(&chunk_body);
    chunk.extend_from_slice(&crc32(&chunk_body).to_be_bytes());

    if let Some(pos) = find_png_chunk(png, b"IDAT") {
        png.splice(pos..pos, chunk);
    }
}

/// Offset of the length field of the first chunk with the given type.
fn find_png_chunk(png: &[u8], chunk_type: &[u8; 4]) -> Option<usize> {
    let mut pos = 8; // past the PNG signature
    while pos + 8 <= png.len() {
        let len = u32::from_be_bytes([png[pos], png[pos + 1], png[pos + 2], png[pos + 3]]) as usize;
        if &png[pos + 4..pos + 8] == chunk_type {
            return Some(pos);
        }
        pos += 12 + len;
    }
    None
}

// =============================================================================
// CRC-32
// =============================================================================

/// CRC-32 (IEEE 802.3), as used by PNG chunks and zip entries.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

// =============================================================================
// Tests
// =============================================================================
