//! In-place pixel transforms.
//!
//! These are the pure pixel operations the pipeline applies between fetching
//! an uncompressed tile and encoding it. Each mutates the tile buffer in
//! place; ordering is the pipeline's responsibility (colour conversion before
//! band reduction before greyscale).

use crate::error::TileError;

use super::raw::{Encoding, RawTile};

/// Convert a CIE L*a*b* tile to sRGB in place.
///
/// Samples are expected in the TIFF encoding: L* scaled to `0..=255`, a* and
/// b* as signed 8-bit values. 16-bit tiles are reduced to 8 bits first.
/// D65 white point.
pub fn lab_to_srgb(tile: &mut RawTile) -> Result<(), TileError> {
    ensure_uncompressed(tile, "CIELAB conversion")?;
    if tile.channels != 3 {
        return Err(TileError::Decode {
            message: format!(
                "CIELAB conversion expects 3 channels, tile has {}",
                tile.channels
            ),
        });
    }

    if tile.bits_per_channel == 16 {
        reduce_to_eight_bits(tile);
    }

    for pixel in tile.data.chunks_exact_mut(3) {
        let l = pixel[0] as f64 * 100.0 / 255.0;
        let a = (pixel[1] as i8) as f64;
        let b = (pixel[2] as i8) as f64;

        let [r, g, bl] = lab_pixel_to_srgb(l, a, b);
        pixel[0] = r;
        pixel[1] = g;
        pixel[2] = bl;
    }

    Ok(())
}

/// Reduce a tile to its first `target_bands` channels in place.
pub fn flatten(tile: &mut RawTile, target_bands: u8) -> Result<(), TileError> {
    ensure_uncompressed(tile, "band flattening")?;
    if target_bands == 0 || target_bands >= tile.channels {
        return Ok(());
    }

    let bytes_per_sample = tile.bits_per_channel as usize / 8;
    let src_stride = tile.channels as usize * bytes_per_sample;
    let dst_stride = target_bands as usize * bytes_per_sample;

    let mut write = 0;
    for read in (0..tile.data.len()).step_by(src_stride) {
        tile.data.copy_within(read..read + dst_stride, write);
        write += dst_stride;
    }
    tile.data.truncate(write);
    tile.channels = target_bands;

    Ok(())
}

/// Convert an RGB tile to single-channel luminance in place.
///
/// Uses the ITU-R BT.601 weights. Works on 8- and 16-bit samples.
pub fn to_greyscale(tile: &mut RawTile) -> Result<(), TileError> {
    ensure_uncompressed(tile, "greyscale conversion")?;
    if tile.channels < 3 {
        return Ok(());
    }

    match tile.bits_per_channel {
        8 => {
            let stride = tile.channels as usize;
            let mut write = 0;
            for read in (0..tile.data.len()).step_by(stride) {
                let r = tile.data[read] as f32;
                let g = tile.data[read + 1] as f32;
                let b = tile.data[read + 2] as f32;
                tile.data[write] = luminance(r, g, b).round().min(255.0) as u8;
                write += 1;
            }
            tile.data.truncate(write);
        }
        16 => {
            let stride = tile.channels as usize * 2;
            let mut write = 0;
            for read in (0..tile.data.len()).step_by(stride) {
                let r = u16::from_ne_bytes([tile.data[read], tile.data[read + 1]]) as f32;
                let g = u16::from_ne_bytes([tile.data[read + 2], tile.data[read + 3]]) as f32;
                let b = u16::from_ne_bytes([tile.data[read + 4], tile.data[read + 5]]) as f32;
                let y = luminance(r, g, b).round().min(65_535.0) as u16;
                let bytes = y.to_ne_bytes();
                tile.data[write] = bytes[0];
                tile.data[write + 1] = bytes[1];
                write += 2;
            }
            tile.data.truncate(write);
        }
        other => {
            return Err(TileError::Decode {
                message: format!("greyscale conversion unsupported for {other}-bit samples"),
            })
        }
    }

    tile.channels = 1;
    Ok(())
}

fn luminance(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

/// Reduce 16-bit samples to 8 bits in place by dropping the low byte.
pub(crate) fn reduce_to_eight_bits(tile: &mut RawTile) {
    let mut write = 0;
    for read in (0..tile.data.len()).step_by(2) {
        let sample = u16::from_ne_bytes([tile.data[read], tile.data[read + 1]]);
        tile.data[write] = (sample >> 8) as u8;
        write += 1;
    }
    tile.data.truncate(write);
    tile.bits_per_channel = 8;
}

fn ensure_uncompressed(tile: &RawTile, operation: &str) -> Result<(), TileError> {
    if tile.encoding != Encoding::Uncompressed {
        return Err(TileError::Decode {
            message: format!("{operation} requires an uncompressed tile"),
        });
    }
    Ok(())
}

fn lab_pixel_to_srgb(l: f64, a: f64, b: f64) -> [u8; 3] {
    // L*a*b* -> XYZ
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let x = 0.950_47 * f_inverse(fx);
    let y = f_inverse(fy);
    let z = 1.088_83 * f_inverse(fz);

    // XYZ -> linear sRGB
    let r = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let g = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let bl = 0.0557 * x - 0.2040 * y + 1.0570 * z;

    [gamma_encode(r), gamma_encode(g), gamma_encode(bl)]
}

fn f_inverse(t: f64) -> f64 {
    let cube = t * t * t;
    if cube > 0.008856 {
        cube
    } else {
        (t - 16.0 / 116.0) / 7.787
    }
}

fn gamma_encode(linear: f64) -> u8 {
    let clamped = linear.clamp(0.0, 1.0);
    let encoded = if clamped <= 0.0031308 {
        12.92 * clamped
    } else {
        1.055 * clamped.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0).round() as u8
}

// =============================================================================
// Tests
// =============================================================================
