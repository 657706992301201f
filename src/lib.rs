//! # tilemux
//!
//! A compositing tile server for gigapixel pyramidal images.
//!
//! tilemux serves DeepZoom-style requests that may name **several** source
//! pyramids at once. Each request is resolved independently against every
//! source's own level geometry; the per-source tiles are then delivered as
//! one stitched image or packaged as a zip bundle, with deterministic
//! placeholders standing in for sources that do not exist.
//!
//! ## Features
//!
//! - **Multi-source compositing**: comma-separated source lists, vertical
//!   stitching, positional zip bundles
//! - **Per-source level mapping**: DeepZoom resolutions reconciled with each
//!   pyramid's native depth
//! - **Conditional pixel work**: CIELAB conversion, band flattening and
//!   greyscale reduction only when the sample layout demands it
//! - **Caching**: opened-image registry and a byte-bounded tile cache, both
//!   singleflight-guarded
//!
//! ## Architecture
//!
//! - [`protocol`] - Request path parsing and DeepZoom level arithmetic
//! - [`image`] - Pyramid abstraction, sources and the opened-image registry
//! - [`tile`] - Fetch engine, transforms, compressors, the per-source
//!   pipeline
//! - [`compose`] - Metadata aggregation, vertical join and zip packaging
//! - [`service`] - Per-request coordination across sources
//! - [`sink`] - Response delivery
//! - [`server`] - Axum HTTP layer
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tilemux::image::{FsImageSource, ImageRegistry};
//! use tilemux::protocol::parse_request;
//! use tilemux::service::CompositeService;
//! use tilemux::tile::{CachingTileEngine, ViewParams};
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = FsImageSource::new("/data/images");
//!     let registry = ImageRegistry::new(source);
//!     let engine = Arc::new(CachingTileEngine::new());
//!     let service = CompositeService::new(registry, engine);
//!
//!     let request = parse_request("a.tif,b.tif_files/11/3_5.jpg").unwrap();
//!     let result = service
//!         .handle(&request, &ViewParams::default())
//!         .await
//!         .unwrap();
//!     println!("{}: {} bytes", result.mime_type(), result.len());
//! }
//! ```

pub mod compose;
pub mod config;
pub mod error;
pub mod image;
pub mod protocol;
pub mod server;
pub mod service;
pub mod sink;
pub mod tile;

// Re-export commonly used types
pub use compose::{CompositeResult, ImageDescriptor, TileOutcome};
pub use config::{Cli, Command, FetchConfig, ServeConfig};
pub use error::{RequestError, SinkWriteError, SourceError, TileError};
pub use image::{
    ColourSpace, Dpi, DpiUnits, FsImageSource, ImageRegistry, ImageSource, MemoryPyramid,
    PyramidImage,
};
pub use protocol::{
    parse_request, CompositeRequest, OutputKind, Packaging, TileCoordinates, TileFormat,
};
pub use server::{create_router, AppState, RouterConfig};
pub use service::{CompositeService, SourceOutcome};
pub use sink::{deliver, BufferSink, ResponseSink, WriterSink};
pub use tile::{
    render_tile, CachingTileEngine, ColourOverride, CompressedTile, Compressor, Encoding,
    FetchParams, Flip, PipelineOptions, RawTile, TileEngine, ViewParams,
};
