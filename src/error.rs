use thiserror::Error;

/// Errors raised while resolving or reading a pyramid source
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Source does not exist in backing storage
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Filesystem or storage error while opening the source
    #[error("I/O error reading {path}: {message}")]
    Io { path: String, message: String },

    /// The file exists but cannot be decoded as a pyramid image
    #[error("Unreadable image {path}: {message}")]
    Unreadable { path: String, message: String },
}

/// Errors raised by the per-source tile pipeline
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Negative resolution or tile index reached the pipeline.
    /// Treated as a defect in the caller, never retried.
    #[error("Invalid resolution/tile number: {resolution},{tile}")]
    InvalidCoordinates { resolution: i64, tile: i64 },

    /// Requested level does not exist in the pyramid
    #[error("Invalid level: {level} (pyramid has {num_levels} levels)")]
    InvalidLevel { level: usize, num_levels: usize },

    /// Tile index past the end of the level's tile grid
    #[error("Tile {tile} out of bounds at level {level} (level has {num_tiles} tiles)")]
    TileOutOfBounds {
        level: usize,
        tile: u32,
        num_tiles: u32,
    },

    /// Pixel buffer could not be decoded
    #[error("Failed to decode tile: {message}")]
    Decode { message: String },

    /// Codec rejected a pixel buffer
    #[error("Failed to encode tile: {message}")]
    Encode { message: String },

    /// Error from the underlying source
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Request-level errors surfaced to the client
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// Unparseable request path or coordinates
    #[error("Malformed request: {reason}")]
    Malformed { reason: String },

    /// Every named source failed the existence check
    #[error("All tile sources are missing")]
    AllSourcesMissing,

    /// A per-source pipeline failure that aborts the whole request
    #[error(transparent)]
    Tile(#[from] TileError),

    /// Joining or archiving the per-source results failed
    #[error("Failed to compose response: {message}")]
    Compose { message: String },

    /// A source that passed the existence check could not be opened
    #[error(transparent)]
    Source(#[from] SourceError),
}

impl RequestError {
    /// Shorthand for a `Malformed` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        RequestError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Failure writing an already-composed response to the output sink.
///
/// By definition this occurs after the response has been committed, so it is
/// logged and the request is considered complete-as-attempted.
#[derive(Debug, Error)]
#[error("Sink write failure during {stage}: {source}")]
pub struct SinkWriteError {
    /// Which write stage failed ("header", "body" or "flush")
    pub stage: &'static str,
    #[source]
    pub source: std::io::Error,
}
