use crate::multi::{Peer, PeerStream};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A simple in-memory [`Peer`].
///
/// - Committed uploads are stored as raw bytes in a `HashMap`, keyed by name.
/// - Clones share the same storage, so a test can keep a handle while the
///   peer itself is moved into a writer.
/// - Failures and slow writes can be injected for testing.
///
/// Intended for tests, local development, and ephemeral usage.
#[derive(Clone, Default)]
pub struct MemoryPeer {
    inner: Arc<RwLock<State>>,
    fail_begin: bool,
    fail_on_chunk: Option<usize>,
    write_delay: Option<Duration>,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Vec<u8>>,
    received: Vec<Bytes>,
    canceled: Option<Error>,
    uploads: usize,
}

/// What [`MemoryUpload::commit`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCommit {
    pub name: String,
    pub size: u64,
}

impl MemoryPeer {
    /// Create a new empty in-memory peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every `begin`.
    pub fn fail_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    /// Fail the write of the `n`th chunk (1-based) of each upload.
    pub fn fail_on_chunk(mut self, n: usize) -> Self {
        self.fail_on_chunk = Some(n);
        self
    }

    /// Sleep for `delay` before accepting each chunk.
    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Returns the number of committed objects.
    pub fn len(&self) -> usize {
        self.inner.read().expect("poisoned lock").objects.len()
    }

    /// Returns true if nothing has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear committed objects and recorded activity.
    pub fn clear(&self) {
        let mut state = self.inner.write().expect("poisoned lock");
        state.objects.clear();
        state.received.clear();
        state.canceled = None;
    }

    /// Get a copy of the committed bytes for `name` (useful for tests).
    pub fn get_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let state = self.inner.read().expect("poisoned lock");
        state
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Every chunk accepted so far, across all uploads, in arrival order.
    pub fn received(&self) -> Vec<Bytes> {
        self.inner.read().expect("poisoned lock").received.clone()
    }

    /// The reason the most recent canceled upload was given.
    pub fn cancel_reason(&self) -> Option<Error> {
        self.inner.read().expect("poisoned lock").canceled.clone()
    }

    /// Returns true if any upload on this peer was canceled.
    pub fn was_canceled(&self) -> bool {
        self.cancel_reason().is_some()
    }
}

impl fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid dumping potentially large in-memory contents.
        f.debug_struct("MemoryPeer")
            .field("len", &self.len())
            .field("fail_begin", &self.fail_begin)
            .field("fail_on_chunk", &self.fail_on_chunk)
            .finish()
    }
}

impl Peer for MemoryPeer {
    type Stream = MemoryUpload;

    async fn begin(&self) -> Result<MemoryUpload> {
        if self.fail_begin {
            return Err(Error::PermissionDenied(
                "memory peer refuses new uploads".to_string(),
            ));
        }

        let upload_id = {
            let mut state = self.inner.write().expect("poisoned lock");
            state.uploads += 1;
            state.uploads
        };

        Ok(MemoryUpload {
            inner: Arc::clone(&self.inner),
            upload_id,
            buffer: Vec::new(),
            chunks: 0,
            fail_on_chunk: self.fail_on_chunk,
            write_delay: self.write_delay,
        })
    }
}

/// An open upload on a [`MemoryPeer`].
pub struct MemoryUpload {
    inner: Arc<RwLock<State>>,
    upload_id: usize,
    buffer: Vec<u8>,
    chunks: usize,
    fail_on_chunk: Option<usize>,
    write_delay: Option<Duration>,
}

impl fmt::Debug for MemoryUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryUpload")
            .field("upload_id", &self.upload_id)
            .field("buffered", &self.buffer.len())
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl PeerStream for MemoryUpload {
    type Commit = MemoryCommit;

    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        self.chunks += 1;
        if self.fail_on_chunk == Some(self.chunks) {
            return Err(Error::Generic(format!(
                "injected failure on chunk {}",
                self.chunks
            )));
        }

        self.buffer.extend_from_slice(&chunk);
        self.inner
            .write()
            .expect("poisoned lock")
            .received
            .push(chunk);
        Ok(())
    }

    async fn cancel(self, reason: Error) {
        tracing::debug!(upload_id = self.upload_id, error = ?reason, "Memory upload canceled");
        self.inner.write().expect("poisoned lock").canceled = Some(reason);
    }

    async fn commit(self, name: Option<String>) -> Result<MemoryCommit> {
        let name = name.unwrap_or_else(|| format!("upload-{}", self.upload_id));
        let size = self.buffer.len() as u64;

        let mut state = self.inner.write().expect("poisoned lock");
        state.objects.insert(name.clone(), self.buffer);
        Ok(MemoryCommit { name, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_with_name() {
        let peer = MemoryPeer::new();
        let mut upload = peer.begin().await.unwrap();
        upload.write(Bytes::from_static(b"hello ")).await.unwrap();
        upload.write(Bytes::from_static(b"world")).await.unwrap();

        let commit = upload.commit(Some("greeting".to_string())).await.unwrap();
        assert_eq!(commit.name, "greeting");
        assert_eq!(commit.size, 11);
        assert_eq!(peer.get_bytes("greeting").unwrap(), b"hello world");
        assert_eq!(peer.received().len(), 2);
    }

    #[tokio::test]
    async fn test_commit_without_name() {
        let peer = MemoryPeer::new();
        let upload = peer.begin().await.unwrap();
        let commit = upload.commit(None).await.unwrap();
        assert_eq!(commit.name, "upload-1");
        assert_eq!(commit.size, 0);
        assert_eq!(peer.len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        assert!(matches!(
            MemoryPeer::new().fail_begin().begin().await,
            Err(Error::PermissionDenied(_))
        ));

        let peer = MemoryPeer::new().fail_on_chunk(2);
        let mut upload = peer.begin().await.unwrap();
        assert!(upload.write(Bytes::from_static(b"a")).await.is_ok());
        assert!(upload.write(Bytes::from_static(b"b")).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_records_reason() {
        let peer = MemoryPeer::new();
        let upload = peer.begin().await.unwrap();
        upload.cancel(Error::Canceled("stop".into())).await;

        assert!(peer.was_canceled());
        assert!(peer.is_empty());
        peer.clear();
        assert!(!peer.was_canceled());
    }
}
