//! Fan-out writes: one source streamed to every peer at once.
//!
//! [`Peer`] and [`PeerStream`] describe a destination; [`FanoutWriter`] drives
//! them and hands back the winning upload as a [`FanoutWrite`].

use std::fmt::Debug;
use std::future::Future;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::future::join_all;

use crate::stream::{AbortableBranch, ByteStream};
use crate::{AbortSignal, Error, FanoutFailureDetails, Result};

/// A destination that can accept a streamed upload.
///
/// `begin` opens an upload; the returned [`PeerStream`] receives chunks and is
/// either committed or canceled.
pub trait Peer: Send + Sync {
    /// The open upload handle.
    type Stream: PeerStream;

    /// Open a new upload.
    fn begin(&self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// An upload in progress on a [`Peer`].
pub trait PeerStream: Send + Sized {
    /// What a successful commit reports back.
    type Commit: Send;

    /// Append one chunk.
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Abandon the upload.
    fn cancel(self, reason: Error) -> impl Future<Output = ()> + Send;

    /// Finish the upload, optionally under `name`.
    fn commit(self, name: Option<String>) -> impl Future<Output = Result<Self::Commit>> + Send;
}

/// Streams one source to every peer and keeps the earliest survivor.
///
/// Peers are begun concurrently; a peer whose `begin` fails is skipped. Each
/// chunk is written to all live peers at once before the next chunk is pulled,
/// and a peer whose write fails is canceled and dropped on the spot. When the
/// source ends, the lowest-index surviving peer wins and the other survivors
/// are canceled as redundant.
///
/// ```
/// # use replicast::{MemoryPeer, stream};
/// # use replicast::multi::FanoutWriter;
/// # use bytes::Bytes;
/// # async fn example() -> replicast::Result<()> {
/// let flaky = MemoryPeer::new().fail_on_chunk(1);
/// let steady = MemoryPeer::new();
///
/// let upload = FanoutWriter::new(vec![flaky, steady.clone()])
///     .write(stream::from_bytes(vec![Bytes::from("hello")]))
///     .await?;
/// assert_eq!(upload.index(), 1);
///
/// upload.commit(Some("greeting.txt".to_string())).await?;
/// assert_eq!(steady.get_bytes("greeting.txt")?, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FanoutWriter<P: Peer> {
    peers: Vec<P>,
    signal: Option<AbortSignal>,
}

impl<P: Peer> FanoutWriter<P> {
    /// Create a writer over `peers`, ranked by position.
    pub fn new(peers: Vec<P>) -> Self {
        Self {
            peers,
            signal: None,
        }
    }

    /// Stop the write when `signal` fires (default: none).
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Stream `source` to every peer.
    ///
    /// Fails with the source's own error if the source fails, with the abort
    /// reason if the signal fires, and with [`Error::AllPeersFailed`] if no
    /// peer survives. A fired signal also interrupts a pending `begin` or
    /// `write` on any peer.
    pub async fn write(self, source: ByteStream) -> Result<FanoutWrite<P>> {
        let total = self.peers.len();
        let mut failures: Vec<(usize, Box<Error>)> = Vec::new();
        let signal = self.signal.as_ref();

        let begun = match or_aborted(signal, join_all(self.peers.iter().map(|peer| peer.begin()))).await {
            Ok(begun) => begun,
            Err(reason) => {
                tracing::warn!(peers = total, error = ?reason, "Fan-out aborted while beginning peers");
                return Err(reason);
            }
        };
        let mut live: Vec<(usize, P::Stream)> = Vec::with_capacity(total);
        for (index, result) in begun.into_iter().enumerate() {
            match result {
                Ok(stream) => live.push((index, stream)),
                Err(e) => {
                    tracing::warn!(peer_index = index, error = ?e, "Peer failed to begin");
                    failures.push((index, Box::new(e)));
                }
            }
        }
        tracing::debug!(peers = total, live = live.len(), "Fan-out started");

        let mut source = match signal {
            Some(signal) => AbortableBranch::new(source, signal.clone()).boxed(),
            None => source,
        };

        let mut chunk_count = 0usize;
        while !live.is_empty() {
            let Some(item) = source.next().await else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(error) => {
                    tracing::warn!(
                        error = ?error,
                        live = live.len(),
                        "Source stream failed, canceling live peers"
                    );
                    join_all(live.into_iter().map(|(_, stream)| stream.cancel(error.clone()))).await;
                    return Err(error);
                }
            };
            chunk_count += 1;

            let writes = join_all(
                live.iter_mut()
                    .map(|(_, stream)| stream.write(chunk.clone())),
            );
            let outcome = or_aborted(signal, writes).await;
            let results = match outcome {
                Ok(results) => results,
                Err(reason) => {
                    tracing::warn!(
                        error = ?reason,
                        live = live.len(),
                        chunk = chunk_count,
                        "Fan-out aborted mid-write, canceling live peers"
                    );
                    join_all(live.into_iter().map(|(_, stream)| stream.cancel(reason.clone()))).await;
                    return Err(reason);
                }
            };

            let mut survivors = Vec::with_capacity(live.len());
            let mut dropped = Vec::new();
            for ((index, stream), result) in live.drain(..).zip(results) {
                match result {
                    Ok(()) => survivors.push((index, stream)),
                    Err(e) => {
                        tracing::warn!(peer_index = index, chunk = chunk_count, error = ?e, "Peer write failed, dropping");
                        dropped.push(stream.cancel(e.clone()));
                        failures.push((index, Box::new(e)));
                    }
                }
            }
            join_all(dropped).await;
            live = survivors;
        }
        drop(source);

        let mut survivors = live.into_iter();
        let Some((index, stream)) = survivors.next() else {
            tracing::error!(peers = total, chunks = chunk_count, "All peers failed");
            return Err(Error::AllPeersFailed(FanoutFailureDetails {
                total_peers: total,
                failures,
            }));
        };

        let redundant = Error::Canceled(format!("redundant: peer {index} won the fan-out"));
        join_all(survivors.map(|(_, stream)| stream.cancel(redundant.clone()))).await;
        tracing::info!(peer_index = index, chunks = chunk_count, dropped = failures.len(), "Fan-out winner selected");

        let mut peers = self.peers;
        let peer = peers.swap_remove(index);
        Ok(FanoutWrite {
            index,
            peer,
            stream,
            failures,
        })
    }
}

/// Drive `work` to completion unless `signal` fires first.
async fn or_aborted<F: Future>(signal: Option<&AbortSignal>, work: F) -> Result<F::Output> {
    match signal {
        Some(signal) => tokio::select! {
            biased;
            reason = signal.aborted() => Err(reason),
            output = work => Ok(output),
        },
        None => Ok(work.await),
    }
}

/// A finished fan-out, holding the winning peer's open upload.
pub struct FanoutWrite<P: Peer> {
    index: usize,
    peer: P,
    stream: P::Stream,
    failures: Vec<(usize, Box<Error>)>,
}

impl<P: Peer> FanoutWrite<P> {
    /// Index of the winning peer.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The winning peer.
    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Peers dropped along the way, with the error that dropped them.
    pub fn failures(&self) -> &[(usize, Box<Error>)] {
        &self.failures
    }

    /// Commit the winner's upload. `name` is passed through untouched.
    pub async fn commit(self, name: Option<String>) -> Result<<P::Stream as PeerStream>::Commit> {
        self.stream.commit(name).await
    }
}

impl<P: Peer + Debug> Debug for FanoutWrite<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutWrite")
            .field("index", &self.index)
            .field("peer", &self.peer)
            .field("failures", &self.failures.len())
            .finish()
    }
}
