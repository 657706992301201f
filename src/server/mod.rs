//! Axum-based HTTP server.
//!
//! Thin layer over the compositing service: routes, query handling and the
//! mapping of request failures onto HTTP statuses. All payloads are sent
//! with an exact Content-Length; composite requests never stream partial
//! bodies.

pub mod handlers;
pub mod routes;

pub use handlers::{
    deepzoom_handler, health_handler, image_metadata_handler, AppState, DeepZoomQueryParams,
    ErrorResponse, HealthResponse, ImageMetadataResponse, LevelMetadataResponse,
};
pub use routes::{create_router, RouterConfig};
