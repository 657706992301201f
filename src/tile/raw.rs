//! Pixel buffer types shared across the tile pipeline.

/// Compression state of a tile buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Raw interleaved samples, no container
    Uncompressed,
    /// JPEG bitstream
    Jpeg,
    /// PNG bitstream
    Png,
}

impl Encoding {
    /// MIME type for HTTP responses.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Encoding::Uncompressed => "application/octet-stream",
            Encoding::Jpeg => "image/jpeg",
            Encoding::Png => "image/png",
        }
    }
}

/// A decoded (or still-encoded) tile buffer.
///
/// The buffer is exclusively owned by whichever pipeline stage currently
/// holds it; transforms mutate it in place and hand it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTile {
    /// Sample data, interleaved by channel when uncompressed
    pub data: Vec<u8>,

    /// Tile width in pixels
    pub width: u32,

    /// Tile height in pixels
    pub height: u32,

    /// Samples per pixel
    pub channels: u8,

    /// Bits per sample (8 or 16)
    pub bits_per_channel: u8,

    /// Compression state of `data`
    pub encoding: Encoding,
}

impl RawTile {
    /// Create an uncompressed tile from raw interleaved samples.
    pub fn uncompressed(
        width: u32,
        height: u32,
        channels: u8,
        bits_per_channel: u8,
        data: Vec<u8>,
    ) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            bits_per_channel,
            encoding: Encoding::Uncompressed,
        }
    }

    /// Number of pixels in the tile.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes one uncompressed pixel occupies.
    pub fn bytes_per_pixel(&self) -> usize {
        self.channels as usize * (self.bits_per_channel as usize / 8)
    }

    /// Expected byte length of the uncompressed sample buffer.
    pub fn expected_len(&self) -> usize {
        self.pixel_count() * self.bytes_per_pixel()
    }
}

/// A tile whose buffer holds `compressed_len` valid encoded bytes.
///
/// The buffer may still wrap raw samples if encoding was deferred; in that
/// case `compressed_len` covers the whole sample buffer.
#[derive(Debug, Clone)]
pub struct CompressedTile {
    /// The underlying tile buffer
    pub tile: RawTile,

    /// Number of valid encoded bytes at the front of `tile.data`
    pub compressed_len: usize,
}

impl CompressedTile {
    /// The valid encoded bytes.
    pub fn payload(&self) -> &[u8] {
        &self.tile.data[..self.compressed_len]
    }
}

// =============================================================================
// Tests
// =============================================================================
