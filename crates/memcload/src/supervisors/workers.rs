//! 🧵 Workers: the backbone of memcload, the unsung heroes, the ones who actually
//! do the work while the Supervisor takes all the credit in the sprint retro.
//!
//! ```text
//!   FileWorker (one per file)
//!     ├── spawn_blocking: gunzip → parse → BatchRouter ──┬─▶ queue(idfa) ─▶ ShardWorker(idfa) ─▶ sink
//!     │                                                  ├─▶ queue(gaid) ─▶ ShardWorker(gaid) ─▶ sink
//!     │                                                  └─▶ ...
//!     └── EndOfStream to every queue, await every ShardWorker, sum the reports
//! ```
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::app_config::RuntimeConfig;
use crate::backends::Connector;

mod file_worker;
mod router;
mod shard_worker;

pub(crate) use file_worker::FileWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// `start` hands the worker to the runtime and gives back the only thing the
/// caller is allowed to keep: a handle to its eventual output.
pub(crate) trait Worker {
    type Output: Send + 'static;

    fn start(self) -> JoinHandle<Self::Output>;
}

/// 🗺️ Everything a file worker needs, built once per run and shared read-only.
///
/// Queues and sink connections are NOT in here. Those are minted fresh inside
/// each file worker and die with it. Nothing crosses from one file to another.
pub(crate) struct LoadContext {
    pub shards: BTreeMap<String, String>,
    pub connector: Arc<dyn Connector>,
    pub runtime: RuntimeConfig,
    pub dry_run: bool,
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("shards", &self.shards)
            .field("runtime", &self.runtime)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}
