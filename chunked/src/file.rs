//! This module provides the file-backed chunked input producer.

use bytes::Bytes;
use tokio::fs;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::{AllocGuard, BufAllocator, ChunkedInput, Error, DEFAULT_CHUNK_SIZE};

/// A [`ChunkedInput`] that fetches data from a seekable source chunk by chunk, restricted to a
/// byte window `[start_offset, end_offset)`.
///
/// The source handle is injected at construction, already opened for reading, and exclusively
/// owned by the producer until [`close`](ChunkedInput::close) releases it. The length of the
/// window is fixed at construction and every chunk but the last holds exactly the configured
/// chunk size; the last one is truncated to the remaining window, never overrunning
/// `end_offset`.
///
/// Reading after a close does not fail: it consistently returns `Ok(None)`, just like reading an
/// exhausted window.
#[derive(Debug)]
pub struct ChunkedFile<R = fs::File> {
    /// The source handle, `None` once closed.
    source: Option<R>,
    start_offset: u64,
    end_offset: u64,
    chunk_size: usize,
    /// The read cursor, always within `start_offset..=end_offset`.
    offset: u64,
}

impl ChunkedFile {
    /// Create a producer delivering a whole file in chunks of [`DEFAULT_CHUNK_SIZE`] bytes.
    pub async fn new(file: fs::File) -> Result<Self, Error> {
        Self::with_chunk_size(file, DEFAULT_CHUNK_SIZE).await
    }

    /// Create a producer delivering a whole file in chunks of `chunk_size` bytes.
    pub async fn with_chunk_size(file: fs::File, chunk_size: usize) -> Result<Self, Error> {
        let length = file.metadata().await?.len();

        Self::slice(file, 0, length, chunk_size).await
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> ChunkedFile<R> {
    /// Create a producer delivering the window `[offset, offset + length)` of `source` in chunks
    /// of `chunk_size` bytes.
    ///
    /// The source is seeked to `offset` before the producer is returned, so its read position
    /// tracks the cursor from the very first chunk.
    ///
    /// # Errors
    /// Fails with [`Error::ZeroChunkSize`] or [`Error::WindowOverflow`] on invalid arguments,
    /// and with [`Error::Io`] when the seek fails.
    pub async fn slice(mut source: R, offset: u64, length: u64, chunk_size: usize) -> Result<Self, Error> {
        if chunk_size == 0 {
            return Err(Error::ZeroChunkSize);
        }

        let end_offset = offset
            .checked_add(length)
            .ok_or(Error::WindowOverflow { offset, length })?;

        source.seek(io::SeekFrom::Start(offset)).await?;

        Ok(Self {
            source: Some(source),
            start_offset: offset,
            end_offset,
            chunk_size,
            offset,
        })
    }

    /// Offset in the source where the transfer begins.
    #[inline]
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Offset in the source where the transfer ends.
    #[inline]
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Offset in the source the transfer currently stands at.
    #[inline]
    pub fn current_offset(&self) -> u64 {
        self.offset
    }
}

impl<R: AsyncRead + AsyncSeek + Unpin> ChunkedInput for ChunkedFile<R> {
    fn is_end_of_input(&self) -> bool {
        !(self.offset < self.end_offset && self.source.is_some())
    }

    async fn read_chunk(&mut self, allocator: &dyn BufAllocator) -> Result<Option<Bytes>, Error> {
        if self.offset >= self.end_offset {
            return Ok(None);
        }

        let Some(source) = self.source.as_mut() else {
            return Ok(None); // closed inputs keep reporting no-data
        };

        // the remaining window may exceed `usize` on 32-bit targets, in which case it is larger
        // than the chunk size anyway
        let want = usize::try_from(self.end_offset - self.offset)
            .map_or(self.chunk_size, |remaining| self.chunk_size.min(remaining));

        let mut guard = AllocGuard::new(allocator, want);
        let buf = guard.buf();
        buf.resize(want, 0);
        source.read_exact(&mut buf[..]).await?;

        tracing::trace!("Delivered {want} bytes chunk at offset {}", self.offset);

        self.offset += want as u64;

        Ok(Some(guard.deliver()))
    }

    fn length(&self) -> Option<u64> {
        Some(self.end_offset - self.start_offset)
    }

    fn progress(&self) -> u64 {
        self.offset - self.start_offset
    }

    fn close(&mut self) {
        tracing::debug!("Closing chunked file at offset {} of window end {}", self.offset, self.end_offset);

        self.source = None;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use futures::TryStreamExt;
    use tokio::io::ReadBuf;

    use crate::input::tests::CountingAllocator;
    use crate::HeapAllocator;

    use super::*;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// A seekable source failing once `fail_after` bytes have been read.
    struct FlakySource {
        inner: Cursor<Vec<u8>>,
        fail_after: u64,
    }

    impl AsyncRead for FlakySource {
        fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
            if self.inner.position() >= self.fail_after {
                return Poll::Ready(Err(std::io::Error::other("flaky source")));
            }

            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncSeek for FlakySource {
        fn start_seek(mut self: Pin<&mut Self>, position: io::SeekFrom) -> std::io::Result<()> {
            Pin::new(&mut self.inner).start_seek(position)
        }

        fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
            Pin::new(&mut self.inner).poll_complete(cx)
        }
    }

    #[tokio::test]
    async fn test_window_is_delivered_in_chunk_sized_steps() {
        let data = pattern(10_000);
        let mut input = ChunkedFile::slice(Cursor::new(data.clone()), 0, 10_000, 4_096).await.unwrap();

        assert_eq!(input.length(), Some(10_000));

        let mut delivered = Vec::new();

        for expected in [4_096, 4_096, 1_808] {
            assert!(!input.is_end_of_input());

            let chunk = input.read_chunk(&HeapAllocator).await.unwrap().unwrap();

            assert_eq!(chunk.len(), expected);
            delivered.extend_from_slice(&chunk);
        }

        assert!(input.is_end_of_input());
        assert_eq!(input.read_chunk(&HeapAllocator).await.unwrap(), None);
        assert_eq!(input.progress(), 10_000);
        assert_eq!(delivered, data);
    }

    #[tokio::test]
    async fn test_chunk_size_larger_than_window() {
        let data = pattern(200);
        let mut input = ChunkedFile::slice(Cursor::new(data.clone()), 100, 50, 8_192).await.unwrap();

        let chunk = input.read_chunk(&HeapAllocator).await.unwrap().unwrap();

        assert_eq!(&chunk[..], &data[100..150]);
        assert!(input.is_end_of_input());
        assert_eq!(input.read_chunk(&HeapAllocator).await.unwrap(), None);
        assert_eq!(input.progress(), 50);
    }

    #[tokio::test]
    async fn test_empty_window_never_touches_the_allocator() {
        let allocator = CountingAllocator::default();
        let mut input = ChunkedFile::slice(Cursor::new(pattern(3)), 1, 0, 4_096).await.unwrap();

        assert!(input.is_end_of_input());
        assert_eq!(input.read_chunk(&allocator).await.unwrap(), None);
        assert_eq!(input.length(), Some(0));
        assert_eq!(input.progress(), 0);
        assert_eq!(allocator.allocated(), 0);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_read_failure_releases_the_chunk_buffer() {
        let allocator = CountingAllocator::default();
        let source = FlakySource {
            inner: Cursor::new(pattern(10_000)),
            fail_after: 4_096,
        };
        let mut input = ChunkedFile::slice(source, 0, 10_000, 4_096).await.unwrap();

        assert!(input.read_chunk(&allocator).await.unwrap().is_some());

        let err = input.read_chunk(&allocator).await.unwrap_err();

        assert!(matches!(err, Error::Io(_)), "unexpected error: {err}");
        assert_eq!(input.progress(), 4_096);
        assert_eq!((allocator.allocated(), allocator.recycled()), (2, 1));
    }

    #[tokio::test]
    async fn test_close_stops_the_transfer() {
        let mut input = ChunkedFile::slice(Cursor::new(pattern(100)), 0, 100, 10).await.unwrap();

        assert!(input.read_chunk(&HeapAllocator).await.unwrap().is_some());
        assert!(!input.is_end_of_input());

        input.close();

        assert!(input.is_end_of_input());
        assert_eq!(input.read_chunk(&HeapAllocator).await.unwrap(), None);
        assert_eq!(input.progress(), 10);
    }

    #[tokio::test]
    async fn test_invalid_construction() {
        assert!(matches!(
            ChunkedFile::slice(Cursor::new(pattern(0)), 0, 0, 0).await,
            Err(Error::ZeroChunkSize)
        ));
        assert!(matches!(
            ChunkedFile::slice(Cursor::new(pattern(0)), u64::MAX, 1, 1).await,
            Err(Error::WindowOverflow { .. })
        ));
    }

    #[tokio::test]
    async fn test_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        fs::write(&path, pattern(10_000)).await.unwrap();

        let file = fs::File::open(&path).await.unwrap();
        let mut input = ChunkedFile::new(file).await.unwrap();

        assert_eq!(input.length(), Some(10_000));
        assert_eq!((input.start_offset(), input.end_offset()), (0, 10_000));

        let mut total = 0;

        while let Some(chunk) = input.read_chunk(&HeapAllocator).await.unwrap() {
            assert!(chunk.len() <= DEFAULT_CHUNK_SIZE);
            total += chunk.len() as u64;
        }

        assert_eq!(total, 10_000);
        assert_eq!(Some(input.progress()), input.length());
        assert_eq!(input.current_offset(), input.end_offset());

        input.close();

        assert!(input.is_end_of_input());
    }

    #[tokio::test]
    async fn test_into_stream_yields_the_whole_window() {
        let data = pattern(10_000);
        let input = ChunkedFile::slice(Cursor::new(data.clone()), 0, 10_000, 4_096).await.unwrap();

        let chunks: Vec<_> = input.into_stream(HeapAllocator).try_collect().await.unwrap();

        assert!(chunks.iter().map(Bytes::len).eq([4_096, 4_096, 1_808]));
        assert_eq!(chunks.concat(), data);
    }
}
