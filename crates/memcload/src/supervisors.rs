//! 🎬 *[camera pans across a directory full of gzipped TSVs]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where files pile up overnight..."
//! 🎬 "One supervisor dared to load them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor — part middle manager, part helicopter parent.
//!
//! It finds the files, sorts them oldest-first (the names are timestamps, so
//! lexicographic order IS chronological order), runs up to `workers` of them at
//! once, and collects the results in that same order. Each finished file gets
//! the dot-prefix treatment so the next run walks right past it.
//!
//! ⚠️ DO NOT MAKE THE WORKERS PUB EVER
//! 🔒 Like Fight Club, but for async tasks. First rule: you don't pub the workers.

mod workers;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use glob::{MatchOptions, glob_with};
use tracing::{error, info, warn};

use self::workers::{FileWorker, LoadContext, Worker};
use crate::app_config::AppConfig;
use crate::backends::{Connector, MemcachedConnector};
use crate::common::{FileResult, RunSummary};
use crate::progress::RunProgress;

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?" every 5 milliseconds.
pub(crate) struct Supervisor {
    /// 🔧 The sacred scrolls of configuration, passed down from main()
    app_config: AppConfig,
    connector: Arc<dyn Connector>,
}

impl Supervisor {
    /// 🚀 Birth of a Supervisor, wired to real memcached shards.
    pub(crate) fn new(app_config: AppConfig) -> Self {
        let connector = MemcachedConnector::new(
            app_config.runtime.connect_timeout(),
            app_config.runtime.io_timeout(),
        );
        Self::with_connector(app_config, Arc::new(connector))
    }

    pub(crate) fn with_connector(app_config: AppConfig, connector: Arc<dyn Connector>) -> Self {
        Self { app_config, connector }
    }

    /// 🧵 Discover, load, rename, report.
    ///
    /// 💀 Only discovery can fail the run. Everything after that is counted, not thrown.
    pub(crate) async fn run(&self) -> Result<RunSummary> {
        let pattern = &self.app_config.pattern;
        let files = discover_files(pattern)?;
        if files.is_empty() {
            warn!("⚠️ no files matched '{pattern}'. Nothing to load, which is technically a success.");
        } else {
            info!("🔍 {} files matched '{pattern}'", files.len());
        }
        Ok(self.load_files(files).await)
    }

    pub(crate) async fn load_files(&self, mut files: Vec<PathBuf>) -> RunSummary {
        files.sort();
        let context = Arc::new(LoadContext {
            shards: self.app_config.shards.clone(),
            connector: self.connector.clone(),
            runtime: self.app_config.runtime.clone(),
            dry_run: self.app_config.dry_run,
        });

        let mut progress = RunProgress::new(files.len() as u64);
        let mut summary = RunSummary::default();

        // -- 🎟️ at most `workers` files in flight; `buffered` hands results back in input order
        let mut results = stream::iter(files)
            .map(|path| {
                let context = context.clone();
                async move {
                    let joined = FileWorker::new(path.clone(), context).start().await;
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(join_err) => Err(anyhow::Error::new(join_err)
                            .context(format!("💀 the worker for '{}' panicked", path.display()))),
                    };
                    (path, outcome)
                }
            })
            .buffered(self.app_config.workers);

        while let Some((path, outcome)) = results.next().await {
            match outcome {
                Ok(file_result) => {
                    progress.file_done(&file_result);
                    self.complete(&file_result).await;
                    summary.absorb(file_result);
                }
                Err(err) => {
                    progress.file_failed();
                    error!("💀 skipping {}: {err:#}", path.display());
                    summary.failed_files.push(path);
                }
            }
        }
        progress.finish();
        summary
    }

    /// ✅ The post-processing hook. Dry runs look but don't touch.
    async fn complete(&self, file_result: &FileResult) {
        let path = &file_result.filename;
        info!("Process {} done", path.display());
        if !file_result.failed_shards.is_empty() {
            warn!(
                "⚠️ {} finished with unreachable shards: {}",
                path.display(),
                file_result.failed_shards.join(", ")
            );
        }
        if self.app_config.dry_run {
            return;
        }
        if let Err(err) = mark_done(path).await {
            error!("💀 could not rename {}: {err}", path.display());
        }
    }
}

/// 🔍 Regular files matching `pattern`, sorted. Dot-files don't match unless the
/// pattern spells the dot out, which is what keeps finished files finished.
pub(crate) fn discover_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let paths = glob_with(pattern, options).with_context(|| format!("💀 '{pattern}' is not a valid glob pattern"))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(err) => warn!("⚠️ skipping unreadable path {}: {}", err.path().display(), err.error()),
        }
    }
    files.sort();
    Ok(files)
}

/// 🏷️ `dir/name` → `dir/.name`. Returns where the file went.
pub(crate) async fn mark_done(path: &Path) -> io::Result<PathBuf> {
    let Some(name) = path.file_name() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no file name", path.display())));
    };
    let mut dotted = std::ffi::OsString::from(".");
    dotted.push(name);
    let target = path.with_file_name(dotted);
    tokio::fs::rename(path, &target).await?;
    Ok(target)
}
