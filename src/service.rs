//! Request coordination.
//!
//! [`CompositeService`] is the top of the compositing core: it resolves each
//! named source in request order, runs the tile pipeline per opened source
//! (or emits descriptors for metadata requests), and hands the ordered
//! outcomes to the compositor.
//!
//! Sources are processed strictly sequentially. That is load-bearing, not an
//! optimization gap: placeholder tiles are sized from the first successfully
//! rendered tile, and archive entries are numbered by request position, so
//! later steps depend on earlier results.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::compose::{compose_tiles, metadata_document, CompositeResult, ImageDescriptor, TileOutcome};
use crate::error::{RequestError, SourceError};
use crate::image::{ImageRegistry, ImageSource, PyramidImage};
use crate::protocol::deepzoom::{client_level_count, map_resolution, pyramid_level, tile_index, tiles_per_row};
use crate::protocol::{CompositeRequest, OutputKind, TileCoordinates, TileFormat};
use crate::tile::{render_tile, ColourOverride, PipelineOptions, TileEngine, ViewParams};

// =============================================================================
// Source Outcomes
// =============================================================================

/// Per-source resolution result, in request order.
pub enum SourceOutcome<I> {
    /// The source exists and was opened
    Opened(Arc<I>),
    /// The source failed the existence check
    Missing,
}

// =============================================================================
// Composite Service
// =============================================================================

/// Coordinates a composite request end-to-end.
///
/// # Type Parameters
///
/// * `S` - The image source backing the registry
pub struct CompositeService<S: ImageSource> {
    registry: Arc<ImageRegistry<S>>,

    engine: Arc<dyn TileEngine>,

    options: PipelineOptions,
}

impl<S: ImageSource> CompositeService<S> {
    /// Create a service over a registry and tile engine.
    pub fn new(registry: ImageRegistry<S>, engine: Arc<dyn TileEngine>) -> Self {
        Self {
            registry: Arc::new(registry),
            engine,
            options: PipelineOptions::default(),
        }
    }

    /// Create a service sharing an existing registry.
    pub fn with_shared_registry(
        registry: Arc<ImageRegistry<S>>,
        engine: Arc<dyn TileEngine>,
    ) -> Self {
        Self {
            registry,
            engine,
            options: PipelineOptions::default(),
        }
    }

    /// Override the pipeline policy knobs.
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Arc<ImageRegistry<S>> {
        &self.registry
    }

    /// Handle one parsed request.
    ///
    /// # Errors
    ///
    /// - [`RequestError::AllSourcesMissing`] when every source fails the
    ///   existence check; nothing is composed in that case
    /// - Pipeline and composition failures abort the whole request before
    ///   any response bytes exist
    pub async fn handle(
        &self,
        request: &CompositeRequest,
        view: &ViewParams,
    ) -> Result<CompositeResult, RequestError> {
        let outcomes = self.resolve_sources(&request.sources).await?;

        // The path-level greyscale marker overrides the view's colour choice
        let mut view = view.clone();
        if request.greyscale {
            view.colourspace = ColourOverride::Greyscale;
        }

        match request.kind {
            OutputKind::Metadata => {
                let descriptors: Vec<ImageDescriptor> = outcomes
                    .iter()
                    .map(|outcome| match outcome {
                        SourceOutcome::Opened(image) => ImageDescriptor {
                            width: image.full_width(),
                            height: image.full_height(),
                            tile_size: image.tile_width(),
                        },
                        SourceOutcome::Missing => ImageDescriptor::placeholder(),
                    })
                    .collect();
                Ok(metadata_document(&descriptors))
            }
            OutputKind::Tile {
                coords,
                format,
                packaging,
            } => {
                let mut tiles = Vec::with_capacity(outcomes.len());
                for outcome in &outcomes {
                    match outcome {
                        SourceOutcome::Missing => tiles.push(TileOutcome::Missing),
                        SourceOutcome::Opened(image) => {
                            let rendered = self
                                .render_source_tile(image.as_ref(), coords, format, &view)
                                .await?;
                            tiles.push(TileOutcome::Rendered(rendered));
                        }
                    }
                }
                compose_tiles(&tiles, format, packaging, view.jpeg_quality)
            }
        }
    }

    /// Render one source's tile at the request coordinates.
    ///
    /// The client resolution is reconciled against this source's own pyramid
    /// depth, so the same request coordinates can land on different levels
    /// of different sources.
    async fn render_source_tile(
        &self,
        image: &S::Image,
        coords: TileCoordinates,
        format: TileFormat,
        view: &ViewParams,
    ) -> Result<crate::tile::CompressedTile, RequestError> {
        let client_levels = client_level_count(image.full_width(), image.full_height());
        let resolution =
            map_resolution(coords.resolution, image.num_levels() as u32, client_levels);

        let level = pyramid_level(resolution, image.num_levels());
        let level_width = image.width(level).unwrap_or(0);
        let columns = tiles_per_row(level_width, image.tile_width());
        let tile = tile_index(coords.x, coords.y, columns);

        debug!(
            image = image.identifier(),
            resolution,
            tile,
            "resolved tile request"
        );

        let rendered = render_tile(
            self.engine.as_ref(),
            image,
            resolution as i64,
            tile,
            format,
            view,
            &self.options,
        )
        .await?;
        Ok(rendered)
    }

    /// Resolve every source in request order.
    ///
    /// A failed existence check records `Missing` at that index and never
    /// aborts the request; only a universally missing list is fatal.
    async fn resolve_sources(
        &self,
        sources: &[String],
    ) -> Result<Vec<SourceOutcome<S::Image>>, RequestError> {
        let mut outcomes = Vec::with_capacity(sources.len());
        let mut missing = 0usize;

        for source in sources {
            if !self.registry.exists(source).await {
                warn!(source, "tile source missing");
                outcomes.push(SourceOutcome::Missing);
                missing += 1;
                continue;
            }

            match self.registry.get(source).await {
                Ok(image) => outcomes.push(SourceOutcome::Opened(image)),
                // Lost a race with deletion: equivalent to failing the
                // existence check
                Err(SourceError::NotFound(_)) => {
                    warn!(source, "tile source vanished before open");
                    outcomes.push(SourceOutcome::Missing);
                    missing += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        if missing == sources.len() {
            return Err(RequestError::AllSourcesMissing);
        }

        Ok(outcomes)
    }
}

// =============================================================================
// Tests
// =============================================================================
