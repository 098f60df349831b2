//! # Previously, on memcload...
//!
//! 🎬 The shards were down. Docker wasn't running. CI had no memcached and no
//! intention of getting one. Someone had to pretend to be four shards at once.
//!
//! That someone was this module.
//!
//! [`InMemoryStore`] is a fake cluster shared by every sink it hands out: it
//! remembers what was written, counts every `set_multi` call, and can be told to
//! be difficult: reject chosen keys, refuse connections for chosen shards, break
//! the transport on a shard, fail the first few writes or dials before behaving,
//! dawdle over certain keys, or blow up a shard worker outright.
//!
//! ⚠️ Test-only. If you're deploying this to prod, please also deploy a therapist. 🦆

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Connector, ShardSink, SinkBackend, SinkError};
use crate::common::Entry;

/// 🗄️ The pretend cluster. Clone it freely; every clone sees the same vault.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemoryStore {
    /// 🔒 key → bytes, across all shards
    pub(crate) stored: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// 📬 every batch that reached a sink, as (shard, keys), in arrival order
    pub(crate) batches: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    pub(crate) write_calls: Arc<AtomicUsize>,
    pub(crate) connects: Arc<AtomicUsize>,
    rejected_keys: Arc<HashSet<String>>,
    unreachable_shards: Arc<HashSet<String>>,
    broken_shards: Arc<HashSet<String>>,
    flaky_failures_left: Arc<AtomicUsize>,
    flaky_connects_left: Arc<AtomicUsize>,
    /// 🐌 batches holding a key with one of these prefixes take `slow_delay` to write
    slow_prefixes: Arc<Vec<String>>,
    slow_delay: Duration,
    explosive_shards: Arc<HashSet<String>>,
}

impl InMemoryStore {
    /// 🙅 these keys always come back as failed
    pub(crate) fn rejecting(mut self, keys: &[&str]) -> Self {
        self.rejected_keys = Arc::new(keys.iter().map(|key| key.to_string()).collect());
        self
    }

    /// 🏚️ connecting to these shards fails
    pub(crate) fn unreachable(mut self, shards: &[&str]) -> Self {
        self.unreachable_shards = Arc::new(shards.iter().map(|shard| shard.to_string()).collect());
        self
    }

    /// 💥 connecting works, every write on these shards dies with a transport error
    pub(crate) fn broken(mut self, shards: &[&str]) -> Self {
        self.broken_shards = Arc::new(shards.iter().map(|shard| shard.to_string()).collect());
        self
    }

    /// 🎲 the first `failures` writes (any shard) die with a transport error, then all is well
    pub(crate) fn flaky(self, failures: usize) -> Self {
        self.flaky_failures_left.store(failures, Ordering::SeqCst);
        self
    }

    /// 📵 the first `failures` dials (any shard) are refused, then the phones work again
    pub(crate) fn flaky_connects(self, failures: usize) -> Self {
        self.flaky_connects_left.store(failures, Ordering::SeqCst);
        self
    }

    /// 🐌 any batch containing a key that starts with one of `prefixes` takes `delay` to land
    pub(crate) fn slow_for(mut self, prefixes: &[&str], delay: Duration) -> Self {
        self.slow_prefixes = Arc::new(prefixes.iter().map(|prefix| prefix.to_string()).collect());
        self.slow_delay = delay;
        self
    }

    /// 🧨 writing to these shards panics, taking the shard worker down with it
    pub(crate) fn explosive(mut self, shards: &[&str]) -> Self {
        self.explosive_shards = Arc::new(shards.iter().map(|shard| shard.to_string()).collect());
        self
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn connector(&self) -> InMemoryConnector {
        InMemoryConnector { store: self.clone() }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InMemoryConnector {
    store: InMemoryStore,
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, shard: &str, addr: &str) -> Result<SinkBackend, SinkError> {
        self.store.connects.fetch_add(1, Ordering::SeqCst);
        let flaky = self
            .store
            .flaky_connects_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if flaky || self.store.unreachable_shards.contains(shard) {
            return Err(SinkError::Connect {
                addr: addr.to_string(),
                source: io::ErrorKind::ConnectionRefused.into(),
            });
        }
        Ok(SinkBackend::InMemory(InMemorySink {
            shard: shard.to_string(),
            addr: addr.to_string(),
            store: self.store.clone(),
        }))
    }
}

/// 📦 A sink that never forgets. Unlike my dad, who forgot my soccer game in 1998.
#[derive(Debug)]
pub(crate) struct InMemorySink {
    shard: String,
    addr: String,
    store: InMemoryStore,
}

#[async_trait]
impl ShardSink for InMemorySink {
    async fn set_multi(&mut self, entries: &[Entry]) -> Result<Vec<String>, SinkError> {
        self.store.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.store.explosive_shards.contains(&self.shard) {
            panic!("🧨 shard {} exploded on purpose", self.shard);
        }
        let slow = entries
            .iter()
            .any(|entry| self.store.slow_prefixes.iter().any(|prefix| entry.key.starts_with(prefix.as_str())));
        if slow {
            tokio::time::sleep(self.store.slow_delay).await;
        }

        let flaky = self
            .store
            .flaky_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if flaky || self.store.broken_shards.contains(&self.shard) {
            return Err(SinkError::Io {
                addr: self.addr.clone(),
                source: io::ErrorKind::BrokenPipe.into(),
            });
        }

        self.store.batches.lock().await.push((
            self.shard.clone(),
            entries.iter().map(|entry| entry.key.clone()).collect(),
        ));

        let mut failed = Vec::new();
        let mut stored = self.store.stored.lock().await;
        for entry in entries {
            if self.store.rejected_keys.contains(&entry.key) {
                failed.push(entry.key.clone());
            } else {
                stored.insert(entry.key.clone(), entry.value.clone());
            }
        }
        Ok(failed)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        // 🗑️ Cleanup routine: [REDACTED — there is nothing here]
        Ok(())
    }
}
