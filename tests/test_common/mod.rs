//! Common test utilities and a reusable test suite for peer implementations
//!
//! Sources and recorders shared by the integration tests, plus `run_test_*`
//! functions that exercise the [`Peer`] contract against any implementation.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use replicast::multi::{FanoutWriter, Peer, PeerStream};
use replicast::{ByteStream, Error, Result};

/// Route `tracing` output through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A finite stream of string chunks.
pub fn chunks(parts: &[&str]) -> ByteStream {
    let owned: Vec<Bytes> = parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect();
    replicast::stream::from_bytes(owned)
}

/// Yields `parts`, then fails with `Error::Source(message)`.
pub fn failing_source(parts: &[&str], message: &str) -> ByteStream {
    let mut items: Vec<Result<Bytes>> = parts
        .iter()
        .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
        .collect();
    items.push(Err(Error::Source(message.to_string())));
    stream::iter(items).boxed()
}

/// Yields `parts`, then never produces another item and never ends.
pub fn open_ended_source(parts: &[&str]) -> ByteStream {
    let items: Vec<Result<Bytes>> = parts
        .iter()
        .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
        .collect();
    stream::iter(items).chain(stream::pending()).boxed()
}

/// Records `(index, message)` pairs from observer hooks.
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<(usize, String)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, index: usize, message: impl Into<String>) {
        self.entries.lock().unwrap().push((index, message.into()));
    }

    pub fn entries(&self) -> Vec<(usize, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.entries().into_iter().map(|(i, _)| i).collect();
        indices.sort_unstable();
        indices
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

// ── Peer contract suite ───────────────────────────────────────────────────────

pub async fn run_test_begin_write_commit<P: Peer>(peer: &P) {
    let mut upload = peer.begin().await.unwrap();
    upload.write(Bytes::from_static(b"hello ")).await.unwrap();
    upload.write(Bytes::from_static(b"world")).await.unwrap();
    upload.commit(Some("hello.txt".to_string())).await.unwrap();
}

pub async fn run_test_empty_commit<P: Peer>(peer: &P) {
    let upload = peer.begin().await.unwrap();
    assert!(upload.commit(None).await.is_ok());
}

pub async fn run_test_cancel_is_quiet<P: Peer>(peer: &P) {
    let mut upload = peer.begin().await.unwrap();
    upload.write(Bytes::from_static(b"partial")).await.unwrap();
    upload.cancel(Error::Canceled("test".to_string())).await;
}

pub async fn run_test_independent_uploads<P: Peer>(peer: &P) {
    let mut first = peer.begin().await.unwrap();
    let mut second = peer.begin().await.unwrap();
    first.write(Bytes::from_static(b"one")).await.unwrap();
    second.write(Bytes::from_static(b"two")).await.unwrap();
    first.commit(Some("first".to_string())).await.unwrap();
    second.commit(Some("second".to_string())).await.unwrap();
}

pub async fn run_test_single_peer_fanout<P: Peer>(peer: P) {
    let upload = FanoutWriter::new(vec![peer])
        .write(chunks(&["a", "b", "c"]))
        .await
        .unwrap();
    assert_eq!(upload.index(), 0);
    assert!(upload.failures().is_empty());
    upload.commit(Some("abc".to_string())).await.unwrap();
}
