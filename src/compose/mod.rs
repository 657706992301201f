//! Response composition.
//!
//! The compositor turns the ordered per-source results of a request into one
//! response payload. Three shapes exist:
//!
//! - **Metadata aggregate**: one XML descriptor element per source, missing
//!   sources emitting zero-size placeholders
//! - **Single binary**: one source's tile verbatim, or several sources
//!   joined vertically with solid-black placeholders for missing ones
//! - **Archive**: a zip bundle with one entry per source index, empty
//!   entries standing in for missing sources
//!
//! Positional correspondence is the invariant everywhere: element `i`,
//! stacked image `i` and archive entry `i` all refer to request source `i`.

pub mod archive;

use std::fmt::Write as _;

use bytes::Bytes;
use image::{GenericImage, RgbImage};
use tracing::debug;

use crate::error::RequestError;
use crate::protocol::{Packaging, TileFormat};
use crate::tile::{CompressedTile, Encoding};

use archive::ArchiveWriter;

/// XML namespace of the aggregate metadata document.
const METADATA_XMLNS: &str = "http://schemas.microsoft.com/deepzoom/2008";

// =============================================================================
// Inputs
// =============================================================================

/// Result of one source's trip through the tile pipeline.
#[derive(Debug, Clone)]
pub enum TileOutcome {
    /// The source was opened and its tile rendered
    Rendered(CompressedTile),
    /// The source failed the existence check
    Missing,
}

/// Geometry advertised for one source in the metadata aggregate.
///
/// Missing sources use [`ImageDescriptor::placeholder`], keeping index
/// alignment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
}

impl ImageDescriptor {
    /// Zero-size descriptor for a missing source.
    pub fn placeholder() -> Self {
        Self {
            width: 0,
            height: 0,
            tile_size: 0,
        }
    }
}

// =============================================================================
// Output
// =============================================================================

/// A fully composed response payload.
#[derive(Debug, Clone)]
pub enum CompositeResult {
    /// Text document (metadata aggregate)
    Document { mime: &'static str, body: String },
    /// Binary payload (tile, join or archive)
    Binary { mime: &'static str, body: Bytes },
}

impl CompositeResult {
    /// MIME type of the payload.
    pub fn mime_type(&self) -> &'static str {
        match self {
            CompositeResult::Document { mime, .. } => mime,
            CompositeResult::Binary { mime, .. } => mime,
        }
    }

    /// Exact payload length in bytes, known before any byte is written.
    pub fn len(&self) -> usize {
        match self {
            CompositeResult::Document { body, .. } => body.len(),
            CompositeResult::Binary { body, .. } => body.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume into the payload, cheaply for binary responses.
    pub fn into_payload(self) -> Bytes {
        match self {
            CompositeResult::Document { body, .. } => Bytes::from(body.into_bytes()),
            CompositeResult::Binary { body, .. } => body,
        }
    }

    /// Consume into owned payload bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.into_payload().to_vec()
    }
}

// =============================================================================
// Metadata Aggregate
// =============================================================================

/// Build the aggregate metadata document.
///
/// One `<Image>` element per descriptor, in order.
pub fn metadata_document(descriptors: &[ImageDescriptor]) -> CompositeResult {
    let mut body = format!("<ImageArray xmlns=\"{METADATA_XMLNS}\">");
    for descriptor in descriptors {
        let _ = write!(
            body,
            "<Image TileSize=\"{}\" Overlap=\"0\" Format=\"jpg\">\
             <Size Width=\"{}\" Height=\"{}\"/></Image>",
            descriptor.tile_size, descriptor.width, descriptor.height
        );
    }
    body.push_str("</ImageArray>");

    CompositeResult::Document {
        mime: "application/xml",
        body,
    }
}

// =============================================================================
// Tile Composition
// =============================================================================

/// Compose the ordered per-source tile outcomes into one payload.
///
/// The outcome order is the request's source order and is preserved: it
/// drives both stacking order and archive entry numbering.
pub fn compose_tiles(
    outcomes: &[TileOutcome],
    format: TileFormat,
    packaging: Packaging,
    jpeg_quality: u8,
) -> Result<CompositeResult, RequestError> {
    match packaging {
        Packaging::Archive => archive_bundle(outcomes, format),
        Packaging::Single => match outcomes {
            [TileOutcome::Rendered(tile)] => Ok(CompositeResult::Binary {
                mime: format.mime_type(),
                body: Bytes::copy_from_slice(tile.payload()),
            }),
            _ => {
                let body = join_vertically(outcomes, format, jpeg_quality)?;
                Ok(CompositeResult::Binary {
                    mime: format.mime_type(),
                    body: Bytes::from(body),
                })
            }
        },
    }
}

/// Stack all outcomes into one image, top to bottom in source order.
///
/// Missing sources contribute a solid-black image sized like the first
/// rendered tile; the joined image is encoded once in the target format.
fn join_vertically(
    outcomes: &[TileOutcome],
    format: TileFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, RequestError> {
    let template = outcomes
        .iter()
        .find_map(|outcome| match outcome {
            TileOutcome::Rendered(tile) => Some((tile.tile.width, tile.tile.height)),
            TileOutcome::Missing => None,
        })
        .ok_or(RequestError::AllSourcesMissing)?;

    let mut decoded: Vec<RgbImage> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            TileOutcome::Rendered(tile) => decoded.push(decode_tile(tile)?),
            TileOutcome::Missing => {
                debug!(width = template.0, height = template.1, "inserting blank placeholder tile");
                decoded.push(RgbImage::new(template.0, template.1));
            }
        }
    }

    let joined_width = decoded.iter().map(|img| img.width()).max().unwrap_or(1);
    let joined_height: u32 = decoded.iter().map(|img| img.height()).sum();

    let mut canvas = RgbImage::new(joined_width.max(1), joined_height.max(1));
    let mut cursor = 0u32;
    for img in &decoded {
        canvas
            .copy_from(img, 0, cursor)
            .map_err(|e| RequestError::Compose {
                message: e.to_string(),
            })?;
        cursor += img.height();
    }

    encode_joined(canvas, format, jpeg_quality)
}

fn decode_tile(tile: &CompressedTile) -> Result<RgbImage, RequestError> {
    match tile.tile.encoding {
        Encoding::Jpeg | Encoding::Png => image::load_from_memory(tile.payload())
            .map(|img| img.to_rgb8())
            .map_err(|e| RequestError::Compose {
                message: format!("failed to decode tile for joining: {e}"),
            }),
        Encoding::Uncompressed => Err(RequestError::Compose {
            message: "uncompressed tile reached the compositor".to_string(),
        }),
    }
}

fn encode_joined(
    canvas: RgbImage,
    format: TileFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, RequestError> {
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder};

    let (width, height) = canvas.dimensions();
    let data = canvas.into_raw();

    let mut output = Vec::new();
    let result = match format {
        TileFormat::Jpeg => JpegEncoder::new_with_quality(&mut output, jpeg_quality).write_image(
            &data,
            width,
            height,
            ExtendedColorType::Rgb8,
        ),
        TileFormat::Png => PngEncoder::new(&mut output).write_image(
            &data,
            width,
            height,
            ExtendedColorType::Rgb8,
        ),
    };
    result.map_err(|e| RequestError::Compose {
        message: format!("failed to encode joined image: {e}"),
    })?;

    Ok(output)
}

/// Bundle all outcomes into a zip archive.
///
/// Entry `i` is named `t<i>.<ext>`; missing sources write a zero-length
/// entry at their index so consumers can address entries positionally.
fn archive_bundle(
    outcomes: &[TileOutcome],
    format: TileFormat,
) -> Result<CompositeResult, RequestError> {
    let mut writer = ArchiveWriter::new();

    for (index, outcome) in outcomes.iter().enumerate() {
        let name = format!("t{index}.{}", format.extension());
        match outcome {
            TileOutcome::Rendered(tile) => {
                if tile.tile.encoding == Encoding::Uncompressed {
                    // Entry integrity cannot be partially guaranteed, so an
                    // unencoded tile aborts the whole archive.
                    return Err(RequestError::Compose {
                        message: format!("tile {index} reached archiving unencoded"),
                    });
                }
                writer.add_entry(&name, tile.payload());
            }
            TileOutcome::Missing => writer.add_entry(&name, &[]),
        }
    }

    Ok(CompositeResult::Binary {
        mime: "application/zip",
        body: Bytes::from(writer.finish()),
    })
}

// =============================================================================
// Tests
// =============================================================================
