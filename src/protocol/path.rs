//! Request path parsing.
//!
//! A composite request path has one of two shapes:
//!
//! ```text
//! <src1>[,<src2>,...][/greyscale].dzi
//! <src1>[,<src2>,...][/greyscale]_files/<resolution>/<x>_<y>.<format>
//! ```
//!
//! The first form asks for the aggregate metadata document, the second for a
//! tile. `<format>` is one of `jpg`, `png` or `zip`; `zip` selects archive
//! packaging while each entry is still encoded as a pixel format. The
//! optional `/greyscale` marker is stripped before any other parsing and
//! recorded as a rendering override.
//!
//! Source identifiers are comma-separated, order-preserving and may repeat.
//! The order is significant: it drives stitch order and archive entry
//! numbering all the way to the response.

use std::borrow::Cow;

use crate::error::RequestError;

/// Path segment that separates the source list from the tile address.
pub const TILE_CONTAINER_MARKER: &str = "_files/";

/// Marker segment requesting greyscale rendering for the whole request.
pub const GREYSCALE_MARKER: &str = "/greyscale";

/// Extension selecting the metadata descriptor response.
pub const METADATA_EXTENSION: &str = ".dzi";

/// Pixel encoding used for the entries of a zip bundle.
pub const ARCHIVE_TILE_FORMAT: TileFormat = TileFormat::Jpeg;

// =============================================================================
// Request Types
// =============================================================================

/// Wire-level pixel format of a tile response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileFormat {
    /// Lossy JPEG output
    Jpeg,
    /// Lossless PNG output
    Png,
}

impl TileFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }

    /// MIME type for HTTP responses.
    pub fn mime_type(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
        }
    }
}

/// How multiple per-source tiles are packaged into one response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// One image payload; multiple sources are joined vertically
    Single,
    /// One zip bundle with one entry per source index
    Archive,
}

/// Client-side tile address, before per-source resolution mapping.
///
/// Values are kept signed: the pipeline treats negative coordinates as a
/// precondition violation rather than a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCoordinates {
    /// Client resolution index (0 = 1x1 pixel, max = full resolution)
    pub resolution: i64,
    /// Tile column, 0-indexed from the left
    pub x: i64,
    /// Tile row, 0-indexed from the top
    pub y: i64,
}

/// What the request asks the server to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Aggregate XML metadata document for all named sources
    Metadata,
    /// One tile per source, packaged per [`Packaging`]
    Tile {
        coords: TileCoordinates,
        format: TileFormat,
        packaging: Packaging,
    },
}

/// A fully parsed composite request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeRequest {
    /// Ordered source identifiers; never empty, duplicates allowed
    pub sources: Vec<String>,
    /// Requested output shape
    pub kind: OutputKind,
    /// Request-wide greyscale rendering override
    pub greyscale: bool,
}

// =============================================================================
// Parser
// =============================================================================

/// Parse a request path into a [`CompositeRequest`].
///
/// # Errors
///
/// Returns [`RequestError::Malformed`] when the trailing segment carries no
/// recognizable resolution/x/y triple for a tile request, the format token is
/// unknown, or the source list is empty.
pub fn parse_request(path: &str) -> Result<CompositeRequest, RequestError> {
    // The greyscale marker may follow the source list or trail the whole
    // path; it is erased before any other parsing.
    let greyscale = path.contains(GREYSCALE_MARKER);
    let stripped = if greyscale {
        Cow::Owned(path.replacen(GREYSCALE_MARKER, "", 1))
    } else {
        Cow::Borrowed(path)
    };
    let stripped: &str = &stripped;

    if let Some(prefix) = stripped.strip_suffix(METADATA_EXTENSION) {
        return Ok(CompositeRequest {
            sources: split_sources(prefix)?,
            kind: OutputKind::Metadata,
            greyscale,
        });
    }

    let marker = stripped.rfind(TILE_CONTAINER_MARKER).ok_or_else(|| {
        RequestError::malformed(format!(
            "expected `{METADATA_EXTENSION}` or `{TILE_CONTAINER_MARKER}` in request path"
        ))
    })?;
    let prefix = &stripped[..marker];
    let tail = &stripped[marker + TILE_CONTAINER_MARKER.len()..];

    let (coords, format, packaging) = parse_tile_address(tail)?;

    Ok(CompositeRequest {
        sources: split_sources(prefix)?,
        kind: OutputKind::Tile {
            coords,
            format,
            packaging,
        },
        greyscale,
    })
}

/// Parse the `<resolution>/<x>_<y>.<format>` tail of a tile request.
fn parse_tile_address(
    tail: &str,
) -> Result<(TileCoordinates, TileFormat, Packaging), RequestError> {
    let (resolution_str, filename) = tail
        .rsplit_once('/')
        .ok_or_else(|| RequestError::malformed("tile address must be <resolution>/<x>_<y>.<format>"))?;

    if resolution_str.contains('/') {
        return Err(RequestError::malformed(
            "tile address must be <resolution>/<x>_<y>.<format>",
        ));
    }

    let (stem, extension) = filename
        .rsplit_once('.')
        .ok_or_else(|| RequestError::malformed("tile filename carries no format extension"))?;

    let (x_str, y_str) = stem
        .split_once('_')
        .ok_or_else(|| RequestError::malformed("tile filename must be <x>_<y>"))?;

    let resolution = parse_coordinate(resolution_str, "resolution")?;
    let x = parse_coordinate(x_str, "x")?;
    let y = parse_coordinate(y_str, "y")?;

    let (format, packaging) = match extension {
        "jpg" => (TileFormat::Jpeg, Packaging::Single),
        "png" => (TileFormat::Png, Packaging::Single),
        "zip" => (ARCHIVE_TILE_FORMAT, Packaging::Archive),
        other => {
            return Err(RequestError::malformed(format!(
                "unrecognized tile format: {other}"
            )))
        }
    };

    Ok((TileCoordinates { resolution, x, y }, format, packaging))
}

fn parse_coordinate(value: &str, name: &str) -> Result<i64, RequestError> {
    value
        .parse::<i64>()
        .map_err(|_| RequestError::malformed(format!("invalid {name}: {value:?}")))
}

/// Split the source-list prefix on commas, preserving order and duplicates.
fn split_sources(prefix: &str) -> Result<Vec<String>, RequestError> {
    if prefix.is_empty() {
        return Err(RequestError::malformed("empty source list"));
    }

    let sources: Vec<String> = prefix.split(',').map(str::to_owned).collect();
    if sources.iter().any(String::is_empty) {
        return Err(RequestError::malformed("empty source name in source list"));
    }

    Ok(sources)
}

// =============================================================================
// Tests
// =============================================================================
