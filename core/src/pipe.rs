//! Streaming a request body from a source, or a response body into a sink.

use std::io::{self, Write};

use crate::http::Headers;

/// Destination for a piped response body.
///
/// Status and headers are copied before the first chunk, so a proxy
/// destination can forward the response as-is.
pub trait PipeDest {
    fn set_status(&mut self, _status: u16) {}

    fn set_header(&mut self, _name: &str, _value: &str) {}

    fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Adapts any `io::Write` into a `PipeDest` that ignores status and headers.
#[derive(Debug)]
pub struct WriteDest<W>(pub W);

impl<W: Write> PipeDest for WriteDest<W> {
    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.0.write_all(chunk)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Metadata of a body source piped into a request.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    /// Copied onto the request unless it already has them.
    pub headers: Headers,
    /// Becomes `content-length` when known.
    pub length: Option<u64>,
}

impl SourceInfo {
    pub fn with_length(length: u64) -> Self {
        Self {
            length: Some(length),
            ..Default::default()
        }
    }
}

/// Chunk size used when reading a piped source.
pub(crate) const CHUNK_SIZE: usize = 16 * 1024;
