//! 🚀 memcload — gzipped device/app TSVs in, sharded memcached entries out.
//!
//! ```text
//!   *.tsv.gz ──▶ Supervisor ──▶ FileWorker ×N ──▶ BatchRouter ──▶ ShardWorker ×shards ──▶ memcached
//! ```
//!
//! The library does the loading and hands back a [`RunSummary`]. Deciding whether
//! that summary is good enough, and what to print about it, is the binary's job. 🦆

pub mod app_config;
mod backends;
mod common;
pub mod progress;
mod supervisors;
mod transforms;

use anyhow::Result;

pub use crate::app_config::{AppConfig, ConfigOverrides, RuntimeConfig, load_config};
pub use crate::common::{FileResult, RunSummary};
pub use crate::transforms::selftest;

use crate::supervisors::Supervisor;

/// 🏃 Load every file the config's pattern matches, and report how it went.
///
/// 💀 Errors only when the pattern itself is broken. Bad lines, dead shards and
/// unreadable files are all counted in the summary instead.
pub async fn run(app_config: AppConfig) -> Result<RunSummary> {
    Supervisor::new(app_config).run().await
}
