//! Router construction.
//!
//! # Route Structure
//!
//! ```text
//! /health                     - Health check
//! /deepzoom/{*request}        - Composite DeepZoom requests
//! /images/{*identifier}       - Per-image geometry
//! ```

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::image::ImageSource;
use crate::service::CompositeService;

use super::handlers::{deepzoom_handler, health_handler, image_metadata_handler, AppState};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Default JPEG quality when requests do not override it
    pub default_quality: u8,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            default_quality: crate::tile::DEFAULT_JPEG_QUALITY,
            enable_tracing: true,
        }
    }

    /// Restrict CORS to specific origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Set the default JPEG quality.
    pub fn with_default_quality(mut self, quality: u8) -> Self {
        self.default_quality = quality;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
pub fn create_router<S>(service: CompositeService<S>, config: RouterConfig) -> Router
where
    S: ImageSource + 'static,
{
    let state = AppState::new(service)
        .with_cache_max_age(config.cache_max_age)
        .with_default_quality(config.default_quality);

    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/deepzoom/{*request}", get(deepzoom_handler::<S>))
        .route("/images/{*identifier}", get(image_metadata_handler::<S>))
        .with_state(state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_defaults() {
        let config = RouterConfig::new();
        assert!(config.cors_origins.is_none());
        assert_eq!(config.cache_max_age, 3600);
        assert!(config.enable_tracing);
    }

    #[test]
    fn test_router_config_builder() {
        let config = RouterConfig::new()
            .with_cors_origins(vec!["https://example.com".to_string()])
            .with_cache_max_age(7200)
            .with_default_quality(90)
            .with_tracing(false);

        assert_eq!(
            config.cors_origins,
            Some(vec!["https://example.com".to_string()])
        );
        assert_eq!(config.cache_max_age, 7200);
        assert_eq!(config.default_quality, 90);
        assert!(!config.enable_tracing);
    }

    #[test]
    fn test_build_cors_layer() {
        // Any origin and explicit origins both build without panicking
        let _ = build_cors_layer(&RouterConfig::new());
        let _ = build_cors_layer(
            &RouterConfig::new().with_cors_origins(vec!["https://example.com".to_string()]),
        );
    }
}
