//! Cancellation with a reason attached.
//!
//! An [`AbortController`] owns the right to cancel; the [`AbortSignal`] it hands
//! out is the read-only view given to backends and branches. Both are thin
//! layers over a [`CancellationToken`], adding the [`Error`] that explains why
//! the work was stopped.
//!
//! Controllers derived with [`AbortController::child_of`] are canceled whenever
//! their parent is, including when the parent was already canceled at the time
//! the child was created. Canceling a child never affects the parent.
//!
//! ```
//! # use replicast::{AbortController, Error};
//! let external = AbortController::new();
//! let child = AbortController::child_of(&external.signal());
//!
//! external.abort(Error::Canceled("shutting down".into()));
//!
//! let signal = child.signal();
//! assert!(signal.is_aborted());
//! assert!(matches!(signal.reason(), Some(Error::Canceled(msg)) if msg == "shutting down"));
//! ```

use std::sync::{Arc, OnceLock};

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::{Error, Result};

/// Read-only view of a cancellation flag and its reason.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<Error>>,
    parent: Option<Box<AbortSignal>>,
}

impl AbortSignal {
    fn new(token: CancellationToken, parent: Option<AbortSignal>) -> Self {
        Self {
            token,
            reason: Arc::new(OnceLock::new()),
            parent: parent.map(Box::new),
        }
    }

    /// Returns true once the signal has fired.
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The reason the signal fired, or `None` while it is still live.
    ///
    /// A signal canceled through its parent reports the parent's reason.
    pub fn reason(&self) -> Option<Error> {
        if !self.is_aborted() {
            return None;
        }
        Some(self.resolve_reason())
    }

    /// Returns `Err(reason)` if the signal has fired.
    ///
    /// Backends use this to report their own cancellation through the normal
    /// error channel.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }

    /// Waits until the signal fires and yields its reason.
    pub async fn aborted(&self) -> Error {
        self.token.cancelled().await;
        self.resolve_reason()
    }

    pub(crate) fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    fn resolve_reason(&self) -> Error {
        if let Some(reason) = self.reason.get() {
            return reason.clone();
        }
        match &self.parent {
            Some(parent) if parent.is_aborted() => parent.resolve_reason(),
            _ => Error::Canceled("operation canceled".to_string()),
        }
    }
}

/// Owner side of an [`AbortSignal`].
#[derive(Debug, Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    /// Create a standalone controller.
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::new(CancellationToken::new(), None),
        }
    }

    /// Create a controller that also fires when `parent` fires.
    pub fn child_of(parent: &AbortSignal) -> Self {
        Self {
            signal: AbortSignal::new(parent.token.child_token(), Some(parent.clone())),
        }
    }

    /// A signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fire the signal with `reason`. The first reason wins; later calls are no-ops.
    pub fn abort(&self, reason: Error) {
        if self.signal.is_aborted() {
            return;
        }
        let _ = self.signal.reason.set(reason);
        self.signal.token.cancel();
    }

    /// Returns true once the signal has fired.
    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}
