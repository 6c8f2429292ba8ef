use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use thiserror::Error;
use tokio::io;

/// Default number of bytes fetched by a single [`ChunkedInput::read_chunk`] call.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1_024;

/// Errors raised by chunked input producers.
#[derive(Debug, Error)]
pub enum Error {
    /// A producer was built with a zero chunk size.
    #[error("chunk size: 0 (expected: a positive integer)")]
    ZeroChunkSize,
    /// A byte window whose end offset does not fit in `u64`.
    #[error("window: [{offset}, {offset} + {length}) (expected: end offset to fit in u64)")]
    WindowOverflow {
        /// Offset the window starts at.
        offset: u64,
        /// Number of bytes the window spans.
        length: u64,
    },
    /// The underlying source failed while filling a chunk.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A capability handed to [`ChunkedInput::read_chunk`] to obtain destination buffers.
///
/// A producer calls [`allocate`](Self::allocate) at most once per read and holds the buffer only
/// for the duration of the call: on success the filled buffer is frozen and handed to the caller,
/// on failure it is given back through [`recycle`](Self::recycle) before the error propagates.
/// Pooling, pre-sizing heuristics and release policy all belong to the allocator, never to the
/// producer.
pub trait BufAllocator {
    /// Hand out a writable buffer able to hold at least `capacity` bytes.
    fn allocate(&self, capacity: usize) -> BytesMut;

    /// Take back a buffer a producer failed to deliver.
    fn recycle(&self, buf: BytesMut) {
        drop(buf);
    }
}

/// The default [`BufAllocator`], handing out plain unpooled heap buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl BufAllocator for HeapAllocator {
    #[inline]
    fn allocate(&self, capacity: usize) -> BytesMut {
        BytesMut::with_capacity(capacity)
    }
}

/// An ordered, one-directional cursor over a byte source, consumed chunk by chunk.
///
/// The driving writer repeatedly checks [`is_end_of_input`](Self::is_end_of_input) and calls
/// [`read_chunk`](Self::read_chunk) until the input is exhausted, then calls
/// [`close`](Self::close) exactly once. `Ok(None)` does not necessarily mean the source has
/// ended: a slow, non-seekable source may momentarily have nothing to deliver while
/// [`is_end_of_input`](Self::is_end_of_input) still reports `false`, signaling the consumer to
/// retry later rather than terminate.
///
/// Producers are single-consumer and perform no internal locking; there is no cancellation
/// primitive either, the consumer cancels by simply ceasing to read and closing the input.
#[allow(async_fn_in_trait)]
pub trait ChunkedInput {
    /// Return `true` if and only if there is no data left and no further chunk will ever be
    /// produced.
    ///
    /// Once `true`, it never reverts to `false`.
    fn is_end_of_input(&self) -> bool;

    /// Fetch the next chunk from the source.
    ///
    /// Returns a buffer holding however many bytes were actually available, bounded by the
    /// producer's chunk size, or `Ok(None)` when there is no data left. Once the source is
    /// exhausted no further buffer is ever returned, and delivering the last chunk makes
    /// subsequent [`is_end_of_input`](Self::is_end_of_input) calls return `true`.
    ///
    /// The caller owns the returned chunk and is responsible for releasing it once written.
    async fn read_chunk(&mut self, allocator: &dyn BufAllocator) -> Result<Option<Bytes>, Error>;

    /// Total length of the input in bytes, or `None` when unknown or unbounded.
    fn length(&self) -> Option<u64>;

    /// Cumulative bytes delivered so far.
    ///
    /// Never decreases, and never exceeds [`length`](Self::length) when the length is known.
    fn progress(&self) -> u64;

    /// Release the resources associated with the input.
    ///
    /// After closing, [`is_end_of_input`](Self::is_end_of_input) reports `true` and
    /// [`read_chunk`](Self::read_chunk) returns `Ok(None)`. Closing twice is not supported.
    fn close(&mut self);

    /// Turn this producer into a [`Stream`] of chunks, closing it once exhausted.
    fn into_stream<A>(self, allocator: A) -> impl Stream<Item = Result<Bytes, Error>>
    where
        Self: Sized,
        A: BufAllocator,
    {
        stream::try_unfold((self, allocator), |(mut input, allocator)| async move {
            match input.read_chunk(&allocator).await? {
                Some(chunk) => Ok(Some((chunk, (input, allocator)))),
                None => {
                    input.close();
                    Ok(None)
                }
            }
        })
    }
}

/// Scoped buffer acquisition for a single fill.
///
/// The buffer goes back to the allocator on every exit path except delivery, so failing fills
/// never leak a partially filled buffer whatever branch they bail out from.
pub(crate) struct AllocGuard<'a> {
    allocator: &'a dyn BufAllocator,
    buf: Option<BytesMut>,
}

impl<'a> AllocGuard<'a> {
    pub(crate) fn new(allocator: &'a dyn BufAllocator, capacity: usize) -> Self {
        Self {
            allocator,
            buf: Some(allocator.allocate(capacity)),
        }
    }

    /// The buffer under guard.
    pub(crate) fn buf(&mut self) -> &mut BytesMut {
        self.buf.as_mut().unwrap() // buffer is always present until delivered
    }

    /// Hand the filled buffer over, consuming the guard without recycling.
    pub(crate) fn deliver(mut self) -> Bytes {
        self.buf.take().unwrap().freeze()
    }
}

impl Drop for AllocGuard<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.allocator.recycle(buf);
        }
    }
}
