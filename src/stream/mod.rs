//! Byte streams and the forks taken from them.
//!
//! A [`ByteStream`] is the unit every racer and writer consumes. [`split`] turns
//! one into several independent copies, and [`AbortableBranch`] ties a copy to
//! an [`AbortSignal`](crate::AbortSignal) so a canceled reader is released
//! without waiting on the source.
//!
//! ```
//! # use replicast::stream::{self, ByteStream};
//! # use bytes::Bytes;
//! # async fn example() -> replicast::Result<()> {
//! let source: ByteStream = stream::from_bytes(vec![Bytes::from("ab"), Bytes::from("cd")]);
//! let mut branches = stream::split(source, 2);
//!
//! let second = branches.pop().unwrap();
//! let first = branches.pop().unwrap();
//! assert_eq!(stream::collect_bytes(first).await?, b"abcd");
//! assert_eq!(stream::collect_bytes(second).await?, b"abcd");
//! # Ok(())
//! # }
//! ```

mod abortable;
mod tee;

use bytes::Bytes;
use futures::stream::{self as futures_stream, BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::{Error, Result};

pub use abortable::AbortableBranch;
pub use tee::{TeeBranch, split, tee};

/// A boxed, sendable stream of byte chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// The copy of the source handed to a single backend.
pub type Branch = AbortableBranch<ByteStream>;

/// Build a stream from in-memory chunks.
pub fn from_bytes<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Bytes>,
    I::IntoIter: Send + 'static,
{
    futures_stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// Build a stream by reading `reader` to the end.
///
/// Read failures become [`Error::Io`] items.
pub fn from_reader<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    ReaderStream::new(reader).map_err(Error::from).boxed()
}

/// Drain a chunk stream into one contiguous buffer, stopping at the first error.
pub async fn collect_bytes<S>(stream: S) -> Result<Vec<u8>>
where
    S: Stream<Item = Result<Bytes>>,
{
    stream
        .try_fold(Vec::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await
}
