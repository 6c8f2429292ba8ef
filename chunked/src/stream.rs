//! This module provides the stream-backed chunked input producer.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{AllocGuard, BufAllocator, ChunkedInput, Error, DEFAULT_CHUNK_SIZE};

/// A [`ChunkedInput`] that adapts an arbitrary sequential byte source, not necessarily seekable
/// and of unknown length.
///
/// Each [`read_chunk`](ChunkedInput::read_chunk) call keeps reading until the chunk buffer holds
/// the configured chunk size or the source reports end of file, so short reads are coalesced and
/// every chunk but the last holds exactly the chunk size. Since the source cannot be probed
/// without consuming it, a source ending exactly on a chunk boundary needs one further read,
/// returning `Ok(None)`, before [`is_end_of_input`](ChunkedInput::is_end_of_input) reports
/// `true`.
///
/// Reading after a close does not fail: it consistently returns `Ok(None)`, just like reading an
/// exhausted source.
#[derive(Debug)]
pub struct ChunkedStream<R> {
    /// The source handle, `None` once closed.
    source: Option<R>,
    chunk_size: usize,
    progress: u64,
    at_end: bool,
}

impl<R: AsyncRead + Unpin> ChunkedStream<R> {
    /// Create a producer delivering `source` in chunks of [`DEFAULT_CHUNK_SIZE`] bytes.
    pub fn new(source: R) -> Self {
        Self {
            source: Some(source),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress: 0,
            at_end: false,
        }
    }

    /// Create a producer delivering `source` in chunks of `chunk_size` bytes.
    ///
    /// # Errors
    /// Fails with [`Error::ZeroChunkSize`] when `chunk_size` is `0`.
    pub fn with_chunk_size(source: R, chunk_size: usize) -> Result<Self, Error> {
        if chunk_size == 0 {
            return Err(Error::ZeroChunkSize);
        }

        Ok(Self {
            chunk_size,
            ..Self::new(source)
        })
    }
}

impl<R: AsyncRead + Unpin> ChunkedInput for ChunkedStream<R> {
    fn is_end_of_input(&self) -> bool {
        self.at_end || self.source.is_none()
    }

    async fn read_chunk(&mut self, allocator: &dyn BufAllocator) -> Result<Option<Bytes>, Error> {
        if self.at_end {
            return Ok(None);
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(None); // closed inputs keep reporting no-data
        };

        let mut guard = AllocGuard::new(allocator, self.chunk_size);
        let buf = guard.buf();
        buf.resize(self.chunk_size, 0);

        let mut filled = 0;

        while filled < self.chunk_size {
            match source.read(&mut buf[filled..]).await? {
                0 => {
                    self.at_end = true;
                    break;
                }
                n => filled += n,
            }
        }

        if filled == 0 {
            // dropping the guard gives the untouched buffer back
            return Ok(None);
        }

        buf.truncate(filled);
        self.progress += filled as u64;

        tracing::trace!("Delivered {filled} bytes chunk after {} bytes total", self.progress);

        Ok(Some(guard.deliver()))
    }

    fn length(&self) -> Option<u64> {
        None
    }

    fn progress(&self) -> u64 {
        self.progress
    }

    fn close(&mut self) {
        tracing::debug!("Closing chunked stream after {} bytes total", self.progress);

        self.source = None;
    }
}
