//! Response delivery sinks.
//!
//! A [`ResponseSink`] receives a composed response: the header first, with
//! the exact payload length, then the body, then a flush. Write failures are
//! reported to the caller for logging only; by the time a sink write fails
//! the response is committed, so the request is complete-as-attempted and
//! never retried.

use std::io::{self, Write};

use crate::compose::CompositeResult;
use crate::error::SinkWriteError;

// =============================================================================
// Sink Trait
// =============================================================================

/// Destination for one composed response.
pub trait ResponseSink {
    /// Declare the payload's MIME type and exact byte length.
    ///
    /// Always called before any body byte: the length is known up front for
    /// every response shape, so there is no chunked fallback.
    fn write_header(&mut self, mime_type: &str, length: usize) -> io::Result<()>;

    /// Write a run of body bytes.
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> io::Result<()>;
}

/// Write a composed response to a sink.
///
/// # Errors
///
/// Returns [`SinkWriteError`] naming the failed stage. Callers log it and
/// move on; no partial-write recovery is attempted.
pub fn deliver<S: ResponseSink>(
    result: &CompositeResult,
    sink: &mut S,
) -> Result<(), SinkWriteError> {
    let stage_err = |stage: &'static str| move |source| SinkWriteError { stage, source };

    sink.write_header(result.mime_type(), result.len())
        .map_err(stage_err("header"))?;

    match result {
        CompositeResult::Document { body, .. } => {
            sink.write_bytes(body.as_bytes()).map_err(stage_err("body"))?
        }
        CompositeResult::Binary { body, .. } => {
            sink.write_bytes(body).map_err(stage_err("body"))?
        }
    }

    sink.flush().map_err(stage_err("flush"))
}

// =============================================================================
// Implementations
// =============================================================================

/// Sink writing the raw payload to any [`Write`].
///
/// The header is dropped: the payload itself (an image, archive or XML
/// document) is the useful artifact when delivering to a file or stdout.
pub struct WriterSink<W: Write> {
    inner: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Recover the wrapped writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ResponseSink for WriterSink<W> {
    fn write_header(&mut self, _mime_type: &str, _length: usize) -> io::Result<()> {
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// In-memory sink capturing everything, including the declared header.
#[derive(Debug, Default)]
pub struct BufferSink {
    /// `(mime_type, declared_length)` once the header was written
    pub header: Option<(String, usize)>,

    /// Accumulated body bytes
    pub body: Vec<u8>,

    /// Whether `flush` was called
    pub flushed: bool,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseSink for BufferSink {
    fn write_header(&mut self, mime_type: &str, length: usize) -> io::Result<()> {
        self.header = Some((mime_type.to_string(), length));
        Ok(())
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.body.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushed = true;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
