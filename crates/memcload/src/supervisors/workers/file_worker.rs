//! 📂 FileWorker — one gzipped file, start to finish.
//!
//! 🔧 Steps:
//! 1. Spin up one ShardWorker (and one bounded queue) per configured shard.
//! 2. On a blocking thread: gunzip, split lines, skip blanks, parse, route.
//! 3. Flush every partial batch, then one `EndOfStream` per queue.
//! 4. Await every ShardWorker. Nobody reports anything until everybody is `Done`.
//! 5. Sum it all into a `FileResult`.
//!
//! A bad line costs one error. A dead shard costs that shard's entries. Only a
//! stream that can't be opened or read costs the whole file, and even then the
//! shard workers are shut down properly before the error goes up.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use flate2::read::MultiGzDecoder;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, info_span};

use super::router::{BatchRouter, RouterTotals};
use super::shard_worker::{RetryPolicy, ShardReport, ShardWorker, WorkerState};
use super::{LoadContext, Worker};
use crate::common::FileResult;
use crate::transforms::{ParseError, parse_line};

#[derive(Debug)]
pub(crate) struct FileWorker {
    path: PathBuf,
    context: Arc<LoadContext>,
}

/// 🧮 What the reader thread counted on its own, before any shard had a say.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LineTally {
    lines_processed: u64,
    parse_errors: u64,
    unknown_shard: u64,
}

#[derive(Debug)]
struct ScanOutcome {
    tally: LineTally,
    totals: RouterTotals,
    read_result: io::Result<()>,
}

impl FileWorker {
    pub(crate) fn new(path: PathBuf, context: Arc<LoadContext>) -> Self {
        Self { path, context }
    }

    async fn process(self) -> Result<FileResult> {
        let (file_result, _reports) = self.process_with_reports().await?;
        Ok(file_result)
    }

    async fn process_with_reports(self) -> Result<(FileResult, Vec<ShardReport>)> {
        info!("Processing {}", self.path.display());
        let runtime = &self.context.runtime;
        let retry = RetryPolicy::from(runtime);

        let mut senders = HashMap::with_capacity(self.context.shards.len());
        let mut workers: Vec<(String, JoinHandle<ShardReport>)> = Vec::with_capacity(self.context.shards.len());
        for (shard, addr) in &self.context.shards {
            let (tx, rx) = async_channel::bounded(runtime.queue_capacity);
            let worker = ShardWorker::new(
                shard.clone(),
                addr.clone(),
                rx,
                self.context.connector.clone(),
                self.context.dry_run,
                retry,
            );
            workers.push((shard.clone(), worker.start()));
            senders.insert(shard.clone(), tx);
        }

        let router = BatchRouter::new(senders, runtime.batch_size, self.path.display().to_string());
        let path = self.path.clone();
        let span = Span::current();
        let scan = tokio::task::spawn_blocking(move || span.in_scope(|| scan_file(&path, router))).await;
        let scan = scan.with_context(|| format!("💀 the reader thread for '{}' panicked", self.path.display()));

        // 🚧 the barrier: every shard reports before anything else happens
        let mut reports = Vec::with_capacity(workers.len());
        let mut failed_shards = Vec::new();
        let mut crashed_entries = 0;
        for (shard, handle) in workers {
            match handle.await {
                Ok(report) => {
                    if report.failure.is_some() {
                        failed_shards.push(report.shard.clone());
                    }
                    reports.push(report);
                }
                Err(join_err) => {
                    // -- 🪦 its tally died with it: everything it was handed counts as lost
                    let lost = scan
                        .as_ref()
                        .map(|scan| scan.totals.delivered.get(&shard).copied().unwrap_or(0))
                        .unwrap_or(0);
                    error!("💀 shard worker {shard} crashed: {join_err}. Counting its {lost} entries as errors");
                    crashed_entries += lost;
                    failed_shards.push(shard);
                }
            }
        }
        ensure!(
            reports.iter().all(|report| report.state == WorkerState::Done),
            "💀 a shard worker reported before it was done. The barrier has been breached."
        );

        let scan = scan?;
        if let Err(err) = scan.read_result {
            error!("💀 stream error in {}: {err}", self.path.display());
            return Err(err).with_context(|| format!("💀 could not read gzip stream '{}'", self.path.display()));
        }

        let tally = scan.tally;
        let shard_success: u64 = reports.iter().map(|report| report.stats.success).sum();
        let shard_errors: u64 = reports.iter().map(|report| report.stats.errors).sum();
        let file_result = FileResult {
            filename: self.path.clone(),
            lines_processed: tally.lines_processed,
            success: shard_success,
            errors: tally.parse_errors + tally.unknown_shard + scan.totals.undelivered + shard_errors + crashed_entries,
            failed_shards,
        };

        info!(
            "File {} processed. Lines: {}, success: {}, errors: {} (parse: {}, unknown shard: {})",
            self.path.display(),
            file_result.lines_processed,
            file_result.success,
            file_result.errors,
            tally.parse_errors,
            tally.unknown_shard,
        );
        Ok((file_result, reports))
    }
}

impl Worker for FileWorker {
    type Output = Result<FileResult>;

    fn start(self) -> JoinHandle<Result<FileResult>> {
        let span = info_span!("file", name = %self.path.display());
        tokio::spawn(self.process().instrument(span))
    }
}

/// 📖 Runs on the blocking pool. Always flushes and ends every queue, even when
/// the stream blows up halfway, so no shard worker is left waiting forever.
fn scan_file(path: &Path, mut router: BatchRouter) -> ScanOutcome {
    let mut tally = LineTally::default();
    let read_result = File::open(path)
        .and_then(|file| feed_lines(BufReader::new(MultiGzDecoder::new(file)), &mut router, &mut tally));

    let flushed = router.flush_all();
    debug!("🧹 flushed partial batches: {flushed:?}");
    let totals = router.finish();

    ScanOutcome {
        tally,
        totals,
        read_result,
    }
}

fn feed_lines<R: BufRead>(mut reader: R, router: &mut BatchRouter, tally: &mut LineTally) -> io::Result<()> {
    let mut buf = Vec::with_capacity(4096);
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            tally.lines_processed += 1;
            tally.parse_errors += 1;
            debug!("Couldn't parse line: {}", ParseError::Encoding);
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        tally.lines_processed += 1;

        match parse_line(line) {
            Ok(record) => {
                if let Err(unknown) = router.route(&record) {
                    tally.unknown_shard += 1;
                    debug!("Dropping record for {}: {unknown}", record.dev_id);
                }
            }
            Err(err) => {
                tally.parse_errors += 1;
                debug!("Couldn't parse line: {err}");
            }
        }
    }
}
