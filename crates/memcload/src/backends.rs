//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 Shard sinks slurp batches into the store. A connector opens a fresh one
//! per (file, shard) pair. And in between, we panic! (kidding, we return `SinkError`)
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls (MemcachedSink, InMemorySink) → SinkBackend enum
//! - ShardWorker does: dequeue → retry/backoff → call `sink.set_multi(entries)` → count
//! - Sink does: I/O. Just I/O. Pipelined `set`s over one TCP connection. Nothing else.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::fmt::Debug;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::common::Entry;

pub(crate) mod memcached;
#[cfg(test)]
pub(crate) mod in_mem;

pub(crate) use memcached::MemcachedConnector;

/// 💀 The ways a shard can let us down.
///
/// Failed keys are NOT in here: a store that says "NOT_STORED" is answering,
/// just unhelpfully. These are the cases where the conversation itself broke.
#[derive(Debug, Error)]
pub(crate) enum SinkError {
    #[error("could not connect to shard at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("{op} against {addr} timed out after {elapsed:?}")]
    Timeout {
        addr: String,
        op: &'static str,
        elapsed: Duration,
    },
    #[error("i/o error talking to {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("shard at {addr} spoke gibberish: {detail}")]
    Protocol { addr: String, detail: String },
}

impl SinkError {
    /// 🔁 Worth another attempt? A dropped connection might come back. A server
    /// that answers in tongues will keep doing so.
    pub(crate) fn is_retryable(&self) -> bool {
        !matches!(self, SinkError::Protocol { .. })
    }
}

/// 🕳️ One shard's bulk-write handle.
///
/// # Contract 📜
/// - `set_multi` writes every entry and returns the keys the store refused.
///   Empty vec = full success. `Err` = the transport broke; nothing is known about the batch.
/// - `close` releases the connection. MUST be called. Skipping it is rude.
#[async_trait]
pub(crate) trait ShardSink: Debug + Send {
    async fn set_multi(&mut self, entries: &[Entry]) -> Result<Vec<String>, SinkError>;
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// 🎭 The many faces of a shard sink. Workers hold one of these and never ask which.
#[derive(Debug)]
pub(crate) enum SinkBackend {
    Memcached(memcached::MemcachedSink),
    #[cfg(test)]
    InMemory(in_mem::InMemorySink),
}

#[async_trait]
impl ShardSink for SinkBackend {
    async fn set_multi(&mut self, entries: &[Entry]) -> Result<Vec<String>, SinkError> {
        match self {
            SinkBackend::Memcached(sink) => sink.set_multi(entries).await,
            #[cfg(test)]
            SinkBackend::InMemory(sink) => sink.set_multi(entries).await,
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        match self {
            SinkBackend::Memcached(sink) => sink.close().await,
            #[cfg(test)]
            SinkBackend::InMemory(sink) => sink.close().await,
        }
    }
}

/// 🔧 Opens a fresh sink for one shard. Shared read-only by every file worker.
///
/// One connector per run, one connection per (file, shard). The connector itself
/// holds nothing but knobs, so `Arc<dyn Connector>` is all the sharing we need.
#[async_trait]
pub(crate) trait Connector: Debug + Send + Sync {
    async fn connect(&self, shard: &str, addr: &str) -> Result<SinkBackend, SinkError>;
}
