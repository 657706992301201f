//! HTTP request handlers.
//!
//! # Endpoints
//!
//! - `GET /deepzoom/{*request}` - Composite DeepZoom request (metadata or
//!   tiles, one or many sources)
//! - `GET /images/{*identifier}` - Per-image geometry as JSON
//! - `GET /health` - Health check

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{RequestError, SourceError, TileError};
use crate::image::{ImageSource, PyramidImage};
use crate::protocol::parse_request;
use crate::service::CompositeService;
use crate::tile::{clamp_quality, is_valid_quality, ViewParams, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Application State
// =============================================================================

/// Shared state handed to every handler.
pub struct AppState<S: ImageSource> {
    /// The compositing service
    pub service: Arc<CompositeService<S>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// JPEG quality used when the request does not override it
    pub default_quality: u8,
}

impl<S: ImageSource> AppState<S> {
    pub fn new(service: CompositeService<S>) -> Self {
        Self {
            service: Arc::new(service),
            cache_max_age: 3600,
            default_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    pub fn with_default_quality(mut self, quality: u8) -> Self {
        self.default_quality = clamp_quality(quality);
        self
    }
}

impl<S: ImageSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            cache_max_age: self.cache_max_age,
            default_quality: self.default_quality,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Query parameters accepted by the DeepZoom endpoint.
#[derive(Debug, Deserialize)]
pub struct DeepZoomQueryParams {
    /// JPEG quality (1-100)
    #[serde(default)]
    pub quality: Option<u8>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error body returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g. "not_found", "malformed_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Geometry of one pyramid level.
#[derive(Debug, Serialize)]
pub struct LevelMetadataResponse {
    /// Level index, 0 = full resolution
    pub level: usize,
    pub width: u32,
    pub height: u32,
}

/// Per-image metadata response.
#[derive(Debug, Serialize)]
pub struct ImageMetadataResponse {
    pub identifier: String,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub level_count: usize,
    pub levels: Vec<LevelMetadataResponse>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert a request failure to an HTTP response.
///
/// Client-class failures log at warn (404s at debug), server-class at error.
impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            RequestError::Malformed { reason } => (
                StatusCode::BAD_REQUEST,
                "malformed_request",
                format!("Malformed request: {reason}"),
            ),

            RequestError::AllSourcesMissing => (
                StatusCode::NOT_FOUND,
                "sources_missing",
                "All tile sources are missing".to_string(),
            ),

            RequestError::Tile(tile_err) => match tile_err {
                // Defect class: negative coordinates survived the caller
                TileError::InvalidCoordinates { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "invalid_coordinates",
                    tile_err.to_string(),
                ),
                TileError::InvalidLevel { .. } | TileError::TileOutOfBounds { .. } => {
                    (StatusCode::BAD_REQUEST, "tile_out_of_bounds", tile_err.to_string())
                }
                TileError::Decode { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "decode_error",
                    tile_err.to_string(),
                ),
                TileError::Encode { .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "encode_error",
                    tile_err.to_string(),
                ),
                TileError::Source(source_err) => source_status(source_err),
            },

            RequestError::Source(source_err) => source_status(source_err),

            RequestError::Compose { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "compose_error",
                format!("Failed to compose response: {message}"),
            ),
        };

        if status.is_server_error() {
            error!(error_type, status = status.as_u16(), "Server error: {}", message);
        } else if status == StatusCode::NOT_FOUND {
            debug!(error_type, status = status.as_u16(), "Resource not found: {}", message);
        } else {
            warn!(error_type, status = status.as_u16(), "Client error: {}", message);
        }

        let body = ErrorResponse::with_status(error_type, message, status);
        (status, Json(body)).into_response()
    }
}

fn source_status(err: &SourceError) -> (StatusCode, &'static str, String) {
    match err {
        SourceError::NotFound(identifier) => (
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Source not found: {identifier}"),
        ),
        SourceError::Unreadable { .. } => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_format",
            err.to_string(),
        ),
        SourceError::Io { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "io_error",
            err.to_string(),
        ),
    }
}

/// Wrapper so handlers can `?` on [`SourceError`].
pub struct MetadataError(pub SourceError);

impl IntoResponse for MetadataError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = source_status(&self.0);
        if status.is_server_error() {
            error!(error_type, status = status.as_u16(), "Server error: {}", message);
        } else {
            debug!(error_type, status = status.as_u16(), "{}", message);
        }
        let body = ErrorResponse::with_status(error_type, message, status);
        (status, Json(body)).into_response()
    }
}

impl From<SourceError> for MetadataError {
    fn from(err: SourceError) -> Self {
        MetadataError(err)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle composite DeepZoom requests.
///
/// # Endpoint
///
/// `GET /deepzoom/{*request}`
///
/// The wildcard carries the full composite request path, e.g.
/// `a.tif,b.tif.dzi` or `a.tif,b.tif_files/11/3_5.jpg`.
///
/// # Query Parameters
///
/// - `quality`: JPEG quality 1-100 (default from server config)
///
/// # Response
///
/// - `200 OK` with the metadata document, image payload or zip bundle; the
///   Content-Length always declares the exact payload size
/// - `400 Bad Request`: malformed path or out-of-range tile
/// - `404 Not Found`: every named source is missing
/// - `500 Internal Server Error`: pipeline or composition failure
pub async fn deepzoom_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Path(request_path): Path<String>,
    Query(query): Query<DeepZoomQueryParams>,
) -> Result<Response, RequestError> {
    let quality = match query.quality {
        Some(quality) if !is_valid_quality(quality) => {
            return Err(RequestError::malformed(format!(
                "invalid quality: {quality} (must be 1-100)"
            )));
        }
        Some(quality) => quality,
        None => state.default_quality,
    };

    let request = parse_request(&request_path)?;

    let view = ViewParams {
        jpeg_quality: quality,
        ..ViewParams::default()
    };

    let result = state.service.handle(&request, &view).await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.mime_type())
        .header(header::CONTENT_LENGTH, result.len())
        .header(
            header::CACHE_CONTROL,
            format!("public, max-age={}", state.cache_max_age),
        )
        .body(axum::body::Body::from(result.into_payload()))
        .map_err(|e| RequestError::Compose {
            message: e.to_string(),
        })?;

    Ok(response)
}

/// Handle per-image metadata requests.
///
/// # Endpoint
///
/// `GET /images/{*identifier}`
///
/// # Response
///
/// `200 OK` with JSON geometry:
/// ```json
/// {
///   "identifier": "slides/a.tif",
///   "width": 5000,
///   "height": 3000,
///   "tile_size": 256,
///   "level_count": 5,
///   "levels": [{"level": 0, "width": 5000, "height": 3000}]
/// }
/// ```
pub async fn image_metadata_handler<S: ImageSource>(
    State(state): State<AppState<S>>,
    Path(identifier): Path<String>,
) -> Result<Json<ImageMetadataResponse>, MetadataError> {
    let registry = state.service.registry();
    if !registry.exists(&identifier).await {
        return Err(MetadataError(SourceError::NotFound(identifier)));
    }
    let image = registry.get(&identifier).await?;

    let level_count = image.num_levels();
    let levels = (0..level_count)
        .filter_map(|level| {
            Some(LevelMetadataResponse {
                level,
                width: image.width(level)?,
                height: image.height(level)?,
            })
        })
        .collect();

    Ok(Json(ImageMetadataResponse {
        identifier,
        width: image.full_width(),
        height: image.full_height(),
        tile_size: image.tile_width(),
        level_count,
        levels,
    }))
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
