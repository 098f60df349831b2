// ai
//! 📦 Common data structures — the building blocks of memcload
//!
//! 🎬 COLD OPEN — INT. DATA CENTER — 3:47 AM
//!
//! A gzipped TSV the size of a small moon lands in `./test_data`. Four memcached
//! shards hum in the corner, blissfully unaware. Somewhere between them, these
//! structs do the carrying: an [`Entry`] per record, a [`Batch`] per thousand,
//! a [`ShardStats`] per worker, a [`FileResult`] per file, and one [`RunSummary`]
//! to tell the on-call engineer whether they can go back to bed. 🦆
//!
//! 🧠 Ownership map:
//! - `Batch` belongs to the router until it's sent, then to exactly one shard worker.
//! - `ShardStats` is mutated by one shard worker and handed over once, via its JoinHandle.
//! - `FileResult` is frozen the moment the file worker returns it.
//! - `RunSummary` is only touched by the supervisor's result loop. No locks, no drama.

use std::path::PathBuf;

/// 🔑 One encoded record, ready for the store: `shard:entity` → protobuf bytes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry {
    pub key: String,
    pub value: Vec<u8>,
}

/// 📦 A bounded run of entries headed to the same shard.
///
/// The router fills it, the channel carries it, the shard worker writes it.
/// Nobody touches it after the hand-off. It's a letter, not a shared Google Doc.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Batch {
    pub entries: Vec<Entry>,
}

impl Batch {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// ✉️ What travels down a shard queue.
///
/// `EndOfStream` is its own variant on purpose: an empty `Batch` is a perfectly
/// valid (if underwhelming) flush, and must never be mistaken for "we're done here".
#[derive(Debug)]
pub(crate) enum ShardMessage {
    Batch(Batch),
    EndOfStream,
}

/// 📊 Per-shard tally. One writer (the shard worker), one reader (the file worker, after join).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ShardStats {
    pub success: u64,
    pub errors: u64,
}

impl ShardStats {
    pub(crate) fn total(&self) -> u64 {
        self.success + self.errors
    }
}

/// 📄 What one file worker brings home.
///
/// `errors` already includes parse errors, unknown-shard errors, and every
/// shard-side write error. `failed_shards` names the shards whose worker lost
/// its connection for this file — loud in the logs, visible in the summary table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileResult {
    pub filename: PathBuf,
    pub lines_processed: u64,
    pub success: u64,
    pub errors: u64,
    pub failed_shards: Vec<String>,
}

/// 🧮 The grand total. Owned by the supervisor, fed one `FileResult` at a time.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub processed: u64,
    pub success: u64,
    pub errors: u64,
    /// 📚 completed files, in the order they were marked done
    pub files: Vec<FileResult>,
    /// 💀 files that blew up at the stream level and were skipped
    pub failed_files: Vec<PathBuf>,
}

impl RunSummary {
    pub(crate) fn absorb(&mut self, file_result: FileResult) {
        self.processed += file_result.lines_processed;
        self.success += file_result.success;
        self.errors += file_result.errors;
        self.files.push(file_result);
    }

    /// 📉 errors / processed. Zero lines means zero rate — an empty run is not a failed run.
    pub fn error_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.errors as f64 / self.processed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_file_result(name: &str, processed: u64, success: u64, errors: u64) -> FileResult {
        FileResult {
            filename: PathBuf::from(name),
            lines_processed: processed,
            success,
            errors,
            failed_shards: Vec::new(),
        }
    }

    #[test]
    fn the_one_where_the_summary_adds_up_like_a_responsible_accountant() {
        let mut summary = RunSummary::default();
        summary.absorb(a_file_result("20170101.tsv.gz", 10, 8, 2));
        summary.absorb(a_file_result("20170102.tsv.gz", 5, 5, 0));

        assert_eq!(summary.processed, 15);
        assert_eq!(summary.success, 13);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.files.len(), 2);
        assert_eq!(summary.files[0].filename, PathBuf::from("20170101.tsv.gz"));
        assert!((summary.error_rate() - 2.0 / 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn the_one_where_nothing_happened_and_nothing_went_wrong() {
        let summary = RunSummary::default();
        assert_eq!(summary.error_rate(), 0.0);
    }
}
