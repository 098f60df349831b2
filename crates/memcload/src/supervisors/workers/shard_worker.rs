//! 🎬 *[a queue fills with batches. somewhere, a shard waits.]*
//!
//! 🗑️ The ShardWorker — one per shard per file. It dials its shard, drains its
//! queue, writes what it gets, counts what sticks, and when `EndOfStream` shows
//! up it closes the connection and hands its tally back through the JoinHandle.
//! Exactly once. It has no other way to talk to anyone, and it likes it that way.
//!
//! 💀 If the shard dies under it, the worker stops writing but keeps draining:
//! every entry that arrives after the funeral is counted as an error, so the
//! reader never blocks on a dead queue and the file's numbers still add up.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::Worker;
use crate::app_config::RuntimeConfig;
use crate::backends::{Connector, ShardSink, SinkBackend, SinkError};
use crate::common::{Batch, Entry, ShardMessage, ShardStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    Running,
    Draining,
    Done,
}

/// 📨 The one and only message a shard worker ever sends: its final word.
#[derive(Debug)]
pub(crate) struct ShardReport {
    pub shard: String,
    pub stats: ShardStats,
    pub state: WorkerState,
    /// 💀 why the shard stopped accepting writes, if it did
    pub failure: Option<String>,
}

/// 🔁 How hard to try before a batch is written off.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// 😴 backoff, 2×backoff, 4×backoff, ...
    fn delay_before(&self, next_attempt: u32) -> Duration {
        let doublings = next_attempt.saturating_sub(2).min(16);
        self.backoff.saturating_mul(1u32 << doublings)
    }
}

impl From<&RuntimeConfig> for RetryPolicy {
    fn from(runtime: &RuntimeConfig) -> Self {
        Self {
            max_attempts: runtime.max_attempts.max(1),
            backoff: runtime.retry_backoff(),
        }
    }
}

pub(crate) struct ShardWorker {
    shard: String,
    addr: String,
    rx: Receiver<ShardMessage>,
    connector: Arc<dyn Connector>,
    dry_run: bool,
    retry: RetryPolicy,
    sink: Option<SinkBackend>,
    stats: ShardStats,
    state: WorkerState,
    failure: Option<String>,
}

impl ShardWorker {
    pub(crate) fn new(
        shard: String,
        addr: String,
        rx: Receiver<ShardMessage>,
        connector: Arc<dyn Connector>,
        dry_run: bool,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            shard,
            addr,
            rx,
            connector,
            dry_run,
            retry,
            sink: None,
            stats: ShardStats::default(),
            state: WorkerState::Running,
            failure: None,
        }
    }

    async fn run(mut self) -> ShardReport {
        // -- 🧪 dry runs never dial; there's nobody we intend to talk to
        if !self.dry_run {
            match connect_with_retry(self.connector.as_ref(), &self.shard, &self.addr, &self.retry).await {
                Ok(sink) => self.sink = Some(sink),
                Err(err) => self.give_up(err),
            }
        }

        while self.state == WorkerState::Running {
            match self.rx.recv().await {
                Ok(ShardMessage::Batch(batch)) => self.process(batch).await,
                // -- 🏁 a closed queue means every sender is gone: same deal as the marker
                Ok(ShardMessage::EndOfStream) | Err(_) => self.state = WorkerState::Draining,
            }
        }

        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close().await {
                warn!("⚠️ shard {} did not close cleanly: {err}", self.shard);
            }
        }
        self.state = WorkerState::Done;

        info!(
            "🏁 shard {} done. {} entries, success: {}, errors: {}",
            self.shard,
            self.stats.total(),
            self.stats.success,
            self.stats.errors
        );
        ShardReport {
            shard: self.shard,
            stats: self.stats,
            state: self.state,
            failure: self.failure,
        }
    }

    async fn process(&mut self, batch: Batch) {
        let batch_len = batch.len() as u64;
        if batch.is_empty() {
            return;
        }
        if self.dry_run {
            debug!("🧪 dry run: pretending to write {batch_len} entries to {}", self.shard);
            self.stats.success += batch_len;
            return;
        }
        let Some(sink) = self.sink.as_mut() else {
            // -- 🪦 shard already failed for this file; write the batch off
            self.stats.errors += batch_len;
            return;
        };

        match store_batch(sink, batch.entries, &self.retry).await {
            Ok(failed) if failed.is_empty() => self.stats.success += batch_len,
            Ok(failed) => {
                info!("Couldn't set {} of {} keys on {}", failed.len(), batch_len, self.shard);
                self.stats.errors += failed.len() as u64;
            }
            Err(err) => {
                self.stats.errors += batch_len;
                self.give_up(err);
            }
        }
    }

    fn give_up(&mut self, err: SinkError) {
        error!("💀 shard {} at {} is out for this file: {err}", self.shard, self.addr);
        self.sink = None;
        self.failure = Some(err.to_string());
    }
}

/// 🔌 Dial with the same patience as writes. A refused or timed-out dial gets
/// another go; once the attempts run out the shard is out for this file.
async fn connect_with_retry(
    connector: &dyn Connector,
    shard: &str,
    addr: &str,
    retry: &RetryPolicy,
) -> Result<SinkBackend, SinkError> {
    let mut attempt = 1;
    loop {
        match connector.connect(shard, addr).await {
            Ok(sink) => return Ok(sink),
            Err(err) if attempt >= retry.max_attempts || !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt += 1;
                let delay = retry.delay_before(attempt);
                warn!("🔁 dialing {addr} failed ({err}), attempt {attempt}/{} in {delay:?}", retry.max_attempts);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// 📡 Write with the configured patience. Partial failures retry only the refused
/// keys; transport errors retry whatever is still outstanding.
async fn store_batch(
    sink: &mut SinkBackend,
    entries: Vec<Entry>,
    retry: &RetryPolicy,
) -> Result<Vec<String>, SinkError> {
    let mut outstanding = entries;
    let mut attempt = 1;
    loop {
        let reason = match sink.set_multi(&outstanding).await {
            Ok(failed) if failed.is_empty() || attempt >= retry.max_attempts => return Ok(failed),
            Err(err) if attempt >= retry.max_attempts || !err.is_retryable() => return Err(err),
            Ok(failed) => {
                let failed: HashSet<String> = failed.into_iter().collect();
                outstanding.retain(|entry| failed.contains(&entry.key));
                format!("{} keys refused", failed.len())
            }
            Err(err) => err.to_string(),
        };
        attempt += 1;
        let delay = retry.delay_before(attempt);
        warn!("🔁 write failed ({reason}), attempt {attempt}/{} in {delay:?}", retry.max_attempts);
        tokio::time::sleep(delay).await;
    }
}

impl Worker for ShardWorker {
    type Output = ShardReport;

    fn start(self) -> JoinHandle<ShardReport> {
        let span = info_span!("shard", name = %self.shard);
        tokio::spawn(self.run().instrument(span))
    }
}
