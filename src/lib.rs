//! Fork one async byte stream across several backends and pick a single winner.
//!
//! Two entry points share the same plumbing:
//!
//! - [`PriorityRace`](multi::PriorityRace) runs every backend concurrently over
//!   its own copy of the stream and returns the lowest-index outcome a caller
//!   supplied rule accepts. Losers are aborted as soon as a winner is known.
//! - [`FanoutWriter`](multi::FanoutWriter) streams every chunk to a set of
//!   [`Peer`](multi::Peer)s, dropping peers that fail, and hands back the
//!   earliest-registered survivor for commit.
//!
//! Both honour an optional external [`AbortSignal`].

use std::sync::Arc;

pub mod abort;
pub mod multi;
pub mod stream;

pub use abort::{AbortController, AbortSignal};
#[cfg(feature = "memory")]
pub use adapters::memory::{MemoryCommit, MemoryPeer, MemoryUpload};
pub use stream::ByteStream;

/// A specialized Result type for racing and fan-out operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a fan-out write ended without a surviving peer.
///
/// ```
/// # use replicast::{Error, MemoryPeer, stream};
/// # use replicast::multi::FanoutWriter;
/// # use bytes::Bytes;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let writer = FanoutWriter::new(vec![MemoryPeer::new().fail_begin()]);
/// match writer.write(stream::from_bytes(vec![Bytes::from("data")])).await {
///     Err(Error::AllPeersFailed(details)) => {
///         for (idx, error) in &details.failures {
///             eprintln!("Peer {}: {}", idx, error);
///         }
///     }
///     _ => {}
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FanoutFailureDetails {
    /// Number of peers the write started with
    pub total_peers: usize,
    /// Indices and errors of peers that were dropped, in the order they failed
    pub failures: Vec<(usize, Box<Error>)>,
}

impl FanoutFailureDetails {
    /// Number of dropped peers
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Get indices of all dropped peers
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|(idx, _)| *idx).collect()
    }
}

impl std::fmt::Display for FanoutFailureDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "All peers failed: {} of {} dropped",
            self.failure_count(),
            self.total_peers
        )
    }
}

/// A unified Error type.
///
/// Errors are cheap to clone so a single failure (a source error, an abort
/// reason) can be handed to every branch and peer that needs to see it.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Generic error: {0}")]
    Generic(String),

    /// Work stopped because a signal fired.
    #[error("Operation canceled: {0}")]
    Canceled(String),

    /// The input stream itself failed.
    #[error("Source stream failed: {0}")]
    Source(String),

    /// A backend task died without producing an outcome.
    #[error("Backend {index} failed: {message}")]
    Backend { index: usize, message: String },

    #[error("{0}")]
    AllPeersFailed(FanoutFailureDetails),
}

impl Error {
    /// Returns true for [`Error::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => std::io::Error::new(inner.kind(), inner.to_string()),
            Error::NotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            Error::PermissionDenied(_) => {
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, err)
            }
            other => std::io::Error::other(other),
        }
    }
}

/// Adapter modules, gated behind Cargo features.
pub mod adapters {
    #[cfg(feature = "memory")]
    pub mod memory;
}
