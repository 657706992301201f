//! Configuration and CLI types.
//!
//! Two subcommands exist: `serve` runs the HTTP server, `fetch` executes a
//! single composite request offline and writes the payload to a file or
//! stdout. All options can also be set via `TILEMUX_`-prefixed environment
//! variables.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::tile::DEFAULT_JPEG_QUALITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default tile grid edge length.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default number of opened images to cache.
pub const DEFAULT_IMAGE_CACHE_CAPACITY: usize = 100;

/// Default tile cache capacity in bytes (100MB).
pub const DEFAULT_TILE_CACHE_BYTES: usize = 100 * 1024 * 1024;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI
// =============================================================================

/// tilemux - a compositing tile server for pyramidal images.
#[derive(Parser, Debug)]
#[command(name = "tilemux")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP tile server
    Serve(ServeConfig),

    /// Execute one composite request and write the payload locally
    Fetch(FetchConfig),
}

// =============================================================================
// Serve
// =============================================================================

/// Configuration for the `serve` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "TILEMUX_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "TILEMUX_PORT")]
    pub port: u16,

    /// Directory containing the source images.
    #[arg(long, env = "TILEMUX_ROOT")]
    pub root: PathBuf,

    /// Fixed suffix appended to every source identifier (e.g. ".tif").
    #[arg(long, default_value = "", env = "TILEMUX_SUFFIX")]
    pub suffix: String,

    /// Tile grid edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILEMUX_TILE_SIZE")]
    pub tile_size: u32,

    /// Maximum number of opened images to keep cached.
    #[arg(long, default_value_t = DEFAULT_IMAGE_CACHE_CAPACITY, env = "TILEMUX_CACHE_IMAGES")]
    pub cache_images: usize,

    /// Tile cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_BYTES, env = "TILEMUX_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Default JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TILEMUX_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "TILEMUX_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated; default: any).
    #[arg(long, env = "TILEMUX_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("image root directory is required. Set --root or TILEMUX_ROOT".to_string());
        }
        if self.tile_size == 0 || self.tile_size > 4096 {
            return Err("tile_size must be between 1 and 4096".to_string());
        }
        if self.cache_images == 0 {
            return Err("cache_images must be greater than 0".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        Ok(())
    }

    /// Server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Fetch
// =============================================================================

/// Configuration for the `fetch` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct FetchConfig {
    /// Composite request path, e.g. "a.tif,b.tif_files/11/3_5.jpg".
    pub request: String,

    /// Directory containing the source images.
    #[arg(long, env = "TILEMUX_ROOT")]
    pub root: PathBuf,

    /// Fixed suffix appended to every source identifier.
    #[arg(long, default_value = "", env = "TILEMUX_SUFFIX")]
    pub suffix: String,

    /// Tile grid edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILEMUX_TILE_SIZE")]
    pub tile_size: u32,

    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "TILEMUX_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Output file; stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServeConfig {
        ServeConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            root: PathBuf::from("/data/images"),
            suffix: ".tif".to_string(),
            tile_size: 256,
            cache_images: 50,
            cache_tiles: 10 * 1024 * 1024,
            jpeg_quality: 85,
            cache_max_age: 7200,
            cors_origins: None,
            verbose: false,
            no_tracing: false,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_empty_root_rejected() {
        let mut config = test_config();
        config.root = PathBuf::new();
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("root"));
    }

    #[test]
    fn test_invalid_tile_size() {
        let mut config = test_config();
        config.tile_size = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.tile_size = 8192;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_jpeg_quality() {
        let mut config = test_config();
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.jpeg_quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_cache_capacity() {
        let mut config = test_config();
        config.cache_images = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(test_config().bind_address(), "127.0.0.1:8080");
    }
}
