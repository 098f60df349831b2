//! 🚦 BatchRouter — sorts encoded records into per-shard batches and ships full ones.
//!
//! Runs on the blocking reader thread, so hand-offs use `send_blocking`: when a
//! shard's queue is full the reader simply waits. That's the backpressure. A slow
//! shard slows the file down instead of quietly eating all the RAM.

use std::collections::HashMap;
use std::mem;

use async_channel::Sender;
use thiserror::Error;
use tracing::{info, warn};

use crate::common::{Batch, ShardMessage};
use crate::transforms::AppsInstalled;

/// 🤷 The record's shard is not in the shard table. It goes nowhere.
#[derive(Debug, Error, PartialEq)]
#[error("unknown shard '{0}'")]
pub(crate) struct UnknownShard(pub String);

#[derive(Debug)]
struct Lane {
    tx: Sender<ShardMessage>,
    pending: Batch,
    /// 📬 entries that made it into the queue
    delivered: u64,
}

/// 🧾 The router's closing statement.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RouterTotals {
    /// entries that never reached a queue because its worker was gone
    pub undelivered: u64,
    /// shard → entries the queue accepted
    pub delivered: HashMap<String, u64>,
}

#[derive(Debug)]
pub(crate) struct BatchRouter {
    lanes: HashMap<String, Lane>,
    batch_size: usize,
    label: String,
    full_batches: u64,
    undelivered: u64,
}

/// 📮 Returns how many entries could NOT be delivered (0 on success).
fn hand_off(shard: &str, lane: &mut Lane, batch: Batch) -> u64 {
    let size = batch.len() as u64;
    match lane.tx.send_blocking(ShardMessage::Batch(batch)) {
        Ok(()) => {
            lane.delivered += size;
            0
        }
        Err(_) => {
            // -- 🪦 the worker is gone; these entries have nowhere to go
            warn!("⚠️ queue for shard {shard} is closed, {size} entries undeliverable");
            size
        }
    }
}

impl BatchRouter {
    pub(crate) fn new(senders: HashMap<String, Sender<ShardMessage>>, batch_size: usize, label: String) -> Self {
        let lanes = senders
            .into_iter()
            .map(|(shard, tx)| {
                let lane = Lane {
                    tx,
                    pending: Batch::with_capacity(batch_size),
                    delivered: 0,
                };
                (shard, lane)
            })
            .collect();
        Self {
            lanes,
            batch_size,
            label,
            full_batches: 0,
            undelivered: 0,
        }
    }

    /// 📥 Encode and append; ship the shard's batch the moment it's full.
    pub(crate) fn route(&mut self, record: &AppsInstalled) -> Result<(), UnknownShard> {
        let Some(lane) = self.lanes.get_mut(&record.dev_type) else {
            return Err(UnknownShard(record.dev_type.clone()));
        };

        lane.pending.entries.push(record.to_entry());
        if lane.pending.len() >= self.batch_size {
            let full = mem::replace(&mut lane.pending, Batch::with_capacity(self.batch_size));
            self.undelivered += hand_off(&record.dev_type, lane, full);
            self.full_batches += 1;
            info!(
                "{} : Processed lines: {}",
                self.label,
                self.full_batches * self.batch_size as u64
            );
        }
        Ok(())
    }

    /// 🧹 Ship every partial batch, full or not, even empty. Returns (shard, size) per flush.
    pub(crate) fn flush_all(&mut self) -> Vec<(String, usize)> {
        let mut flushed = Vec::with_capacity(self.lanes.len());
        for (shard, lane) in self.lanes.iter_mut() {
            let partial = mem::take(&mut lane.pending);
            let size = partial.len();
            self.undelivered += hand_off(shard, lane, partial);
            flushed.push((shard.clone(), size));
        }
        flushed
    }

    /// 🏁 One `EndOfStream` per queue, exactly once (this consumes the router),
    /// then the senders drop. Returns what was delivered where, and what wasn't.
    pub(crate) fn finish(self) -> RouterTotals {
        let mut delivered = HashMap::with_capacity(self.lanes.len());
        for (shard, lane) in self.lanes {
            if lane.tx.send_blocking(ShardMessage::EndOfStream).is_err() {
                warn!("⚠️ shard {shard} was already gone when the file ended");
            }
            delivered.insert(shard, lane.delivered);
        }
        RouterTotals {
            undelivered: self.undelivered,
            delivered,
        }
    }
}
