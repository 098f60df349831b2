// ai
//! 🔄 Transforms — the Rosetta Stone of the loader 🎭
//!
//! ```text
//!   raw TSV line ──▶ 📥 ingest ──▶ AppsInstalled ──▶ 📤 egress ──▶ Entry (key, protobuf)
//! ```
//!
//! - `apps_tsv` (ingest): one line of text into an [`AppsInstalled`] record, or a [`ParseError`].
//! - `user_apps` (egress): one record into the `UserApps` protobuf the shards expect.
//!
//! Both halves are pure. No I/O, no channels, no feelings. The pipeline calls them
//! from the blocking reader thread, millions of times, and they never complain. 🦆

mod apps_tsv;
mod user_apps;

pub(crate) use apps_tsv::parse_line;
pub(crate) use apps_tsv::ParseError;
pub use user_apps::selftest;
#[cfg(test)]
pub(crate) use user_apps::UserApps;

/// 📱 One parsed line: which shard, which device, where it was, what it had installed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppsInstalled {
    /// 🏷️ the shard key: `idfa`, `gaid`, `adid`, `dvid`... or something we've never heard of
    pub dev_type: String,
    pub dev_id: String,
    pub lat: f64,
    pub lon: f64,
    pub apps: Vec<u32>,
}
