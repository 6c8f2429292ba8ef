//! A simple crate providing pull-based chunked input producers.
//!
//! A generic, robust and efficient crate providing features dedicated to:
//! - describing a finite-or-unbounded byte source as an ordered sequence of bounded-size chunks,
//! - producing chunks from a window of a seekable file-like source,
//! - producing chunks from an arbitrary sequential byte source of unknown length,
//! - composing producers into [`futures::Stream`]s of chunks.
//!
//! The crate exists to feed large or unbounded payloads into an outbound write pipeline without
//! ever holding more than one chunk in memory. The model is deliberately pull-based rather than
//! push-based: the driving writer requests exactly one chunk at a time and only asks for the next
//! once the current one has been consumed downstream, which is the natural backpressure point
//! when streaming to a socket.
//!
//! Producers follow a _single-producer, single-consumer_ discipline: one logical consumer calls
//! [`ChunkedInput::read_chunk`], [`ChunkedInput::is_end_of_input`] and [`ChunkedInput::close`]
//! sequentially, and producers perform no internal locking. Destination buffers are obtained
//! through an injected [`BufAllocator`] capability, never owned by the producer; a producer only
//! holds a buffer between allocation and delivery, and gives it back to the allocator whenever a
//! fill fails.
//!
//! As a **strong hypothesis**, we can assume that:
//! - the source handle is opened and located by the caller, the producer never opens it;
//! - a source handle is exclusively owned by one producer for its whole lifetime.
//!
//! _Note: when the operating system supports zero-copy file transfer such as `sendfile()`, a
//! file-region transfer path is preferable for whole-file sends; chunked production exists for
//! the general case where the destination is not a raw file descriptor._
//!
//! # Example
//! ```
//! # tokio_test::block_on(async {
//! use chunked::file::ChunkedFile;
//! use chunked::{ChunkedInput, HeapAllocator};
//!
//! let file = tokio::fs::File::open("Cargo.toml").await?;
//! let mut input = ChunkedFile::new(file).await?;
//!
//! while let Some(chunk) = input.read_chunk(&HeapAllocator).await? {
//!     // hand the chunk over to the outbound write pipeline
//!     assert!(!chunk.is_empty());
//! }
//!
//! assert!(input.is_end_of_input());
//! assert_eq!(Some(input.progress()), input.length());
//! input.close();
//! # Ok::<_, chunked::Error>(())
//! # }).unwrap()
//! ```

mod input;
pub use input::*;

pub mod file;
pub mod stream;
