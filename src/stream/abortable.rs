use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::WaitForCancellationFutureOwned;

use crate::{AbortSignal, Result};

/// A stream that ends the moment its [`AbortSignal`] fires.
///
/// When the signal fires, the wrapped stream is dropped (releasing its share
/// of any fork buffer) and the reader sees a single `Err(reason)` followed by
/// end of stream. This happens even if the inner stream is parked waiting for
/// data that will never arrive.
pub struct AbortableBranch<S> {
    inner: Option<S>,
    signal: AbortSignal,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> AbortableBranch<S> {
    pub fn new(inner: S, signal: AbortSignal) -> Self {
        let cancelled = Box::pin(signal.cancelled_owned());
        Self {
            inner: Some(inner),
            signal,
            cancelled,
        }
    }

    /// The signal this branch is tied to.
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Adapt the branch into an [`AsyncRead`](tokio::io::AsyncRead).
    ///
    /// Cancellation surfaces as an I/O error built from the abort reason.
    pub fn into_async_read(self) -> StreamReader<Self, Bytes>
    where
        S: Stream<Item = Result<Bytes>> + Unpin,
    {
        StreamReader::new(self)
    }
}

impl<S> std::fmt::Debug for AbortableBranch<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortableBranch")
            .field("finished", &self.inner.is_none())
            .field("signal", &self.signal)
            .finish()
    }
}

impl<S, T> Stream for AbortableBranch<S>
where
    S: Stream<Item = Result<T>> + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.inner = None;
            let reason = this.signal.reason().unwrap_or_else(|| {
                crate::Error::Canceled("operation canceled".to_string())
            });
            tracing::debug!(error = ?reason, "Branch aborted");
            return Poll::Ready(Some(Err(reason)));
        }

        match inner.poll_next_unpin(cx) {
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
