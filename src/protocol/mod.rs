//! Wire protocol layer.
//!
//! This module owns everything about how clients address tiles:
//!
//! - [`path`] - Request path parsing into a [`CompositeRequest`]
//! - [`deepzoom`] - DeepZoom level arithmetic and tile index mapping
//!
//! A request names one or more pyramid sources and either asks for the
//! aggregate metadata descriptor (`.dzi`) or for a single tile address that
//! is resolved independently against each source's own pyramid geometry.

pub mod deepzoom;
pub mod path;

pub use path::{
    parse_request, CompositeRequest, OutputKind, Packaging, TileCoordinates, TileFormat,
    ARCHIVE_TILE_FORMAT, GREYSCALE_MARKER, METADATA_EXTENSION, TILE_CONTAINER_MARKER,
};
