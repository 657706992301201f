//! tilemux - a compositing tile server for pyramidal images.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilemux::{
    config::{Cli, Command, FetchConfig, ServeConfig},
    image::{FsImageSource, ImageRegistry},
    protocol::parse_request,
    server::{create_router, RouterConfig},
    service::CompositeService,
    sink::{deliver, WriterSink},
    tile::{CachingTileEngine, ViewParams},
};

use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(config) => run_serve(config).await,
        Command::Fetch(config) => run_fetch(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Image root: {}", config.root.display());
    if !config.suffix.is_empty() {
        info!("  Identifier suffix: {}", config.suffix);
    }
    info!("  Tile size: {}", config.tile_size);
    info!(
        "  Cache: {} images, {}MB tiles",
        config.cache_images,
        config.cache_tiles / (1024 * 1024)
    );

    if !config.root.is_dir() {
        warn!(
            "Image root {} is not a directory; all sources will be missing",
            config.root.display()
        );
    }

    let service = build_service(
        &config.root,
        &config.suffix,
        config.tile_size,
        config.cache_images,
        config.cache_tiles,
    );

    let router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_default_quality(config.jpeg_quality)
        .with_tracing(!config.no_tracing);
    let router_config = match config.cors_origins.clone() {
        Some(origins) => router_config.with_cors_origins(origins),
        None => router_config,
    };

    let router = create_router(service, router_config);

    let addr = config.bind_address();
    info!("Server listening on http://{}", addr);
    info!("  Metadata:  http://{}/deepzoom/<src1>,<src2>.dzi", addr);
    info!(
        "  Tiles:     http://{}/deepzoom/<src1>,<src2>_files/<r>/<x>_<y>.jpg",
        addr
    );

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: FetchConfig) -> ExitCode {
    init_logging(config.verbose);

    let request = match parse_request(&config.request) {
        Ok(request) => request,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let service = build_service(
        &config.root,
        &config.suffix,
        config.tile_size,
        8,
        16 * 1024 * 1024,
    );

    let view = ViewParams {
        jpeg_quality: config.jpeg_quality,
        ..ViewParams::default()
    };

    let result = match service.handle(&request, &view).await {
        Ok(result) => result,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Composed {} response, {} bytes",
        result.mime_type(),
        result.len()
    );

    let delivery = match &config.output {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => deliver(&result, &mut WriterSink::new(file)),
            Err(e) => {
                error!("Failed to create {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => deliver(&result, &mut WriterSink::new(std::io::stdout().lock())),
    };

    // A sink failure after composition is logged, never retried
    if let Err(e) = delivery {
        error!("{}", e);
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Shared Setup
// =============================================================================

fn build_service(
    root: &std::path::Path,
    suffix: &str,
    tile_size: u32,
    cache_images: usize,
    cache_tiles: usize,
) -> CompositeService<FsImageSource> {
    let source = FsImageSource::new(root)
        .with_suffix(suffix)
        .with_tile_width(tile_size);
    let registry = ImageRegistry::with_capacity(source, cache_images);
    let engine = Arc::new(CachingTileEngine::with_cache_capacity(cache_tiles));
    CompositeService::new(registry, engine)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tilemux=debug,tower_http=debug"
    } else {
        "tilemux=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
