//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment. Layers, later ones winning:
//!   1. built-in defaults (`AppConfig::default()`)
//!   2. `MEMCLOAD_*` env vars, `__` for nesting (`MEMCLOAD_RUNTIME__BATCH_SIZE=500`)
//!   3. the TOML file, if one was given
//!   4. command-line overrides

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    /// 🔎 glob selecting the gzipped inputs
    pub pattern: String,
    /// 🧵 how many files are loaded at once
    pub workers: usize,
    /// 🧪 do everything except talk to the shards
    pub dry_run: bool,
    /// 📝 append logs here instead of stderr
    pub log_file: Option<PathBuf>,
    /// 📉 above this errors/processed ratio the run counts as failed
    pub max_error_rate: f64,
    /// 🗺️ shard name → `host:port`. Records for any other shard name are errors.
    pub shards: BTreeMap<String, String>,
    pub runtime: RuntimeConfig,
}

/// 🎛️ The knobs inside each file: batching, backpressure, patience, persistence.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuntimeConfig {
    /// 📦 entries per batch handed to a shard worker
    pub batch_size: usize,
    /// 🚧 batches that may wait in a shard queue before the reader blocks
    pub queue_capacity: usize,
    pub connect_timeout_ms: u64,
    /// ⏱️ budget for one whole pipelined batch write
    pub io_timeout_ms: u64,
    /// 🔁 write attempts per batch; 1 means "no retry"
    pub max_attempts: u32,
    /// 😴 first retry delay, doubled on each further attempt
    pub retry_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        // -- 🗺️ the four device types, on four neighbouring ports. Classic.
        let shards = [
            ("idfa", "127.0.0.1:33013"),
            ("gaid", "127.0.0.1:33014"),
            ("adid", "127.0.0.1:33015"),
            ("dvid", "127.0.0.1:33016"),
        ]
        .into_iter()
        .map(|(name, addr)| (name.to_string(), addr.to_string()))
        .collect();

        Self {
            pattern: "./test_data/*.tsv.gz".to_string(),
            workers: 2,
            dry_run: false,
            log_file: None,
            max_error_rate: 0.01,
            shards,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            queue_capacity: 16,
            connect_timeout_ms: 1500,
            io_timeout_ms: 1500,
            max_attempts: 1,
            retry_backoff_ms: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl AppConfig {
    /// ✅ Catch the configs that would parse fine and then do something silly.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("💀 workers must be at least 1. Zero workers loads zero files, very slowly.");
        }
        if self.shards.is_empty() {
            bail!("💀 no shards configured. Every record would be an unknown-shard error.");
        }
        if let Some((name, _)) = self.shards.iter().find(|(_, addr)| addr.trim().is_empty()) {
            bail!("💀 shard '{name}' has an empty address");
        }
        if self.runtime.batch_size == 0 {
            bail!("💀 runtime.batch_size must be at least 1");
        }
        if self.runtime.queue_capacity == 0 {
            bail!("💀 runtime.queue_capacity must be at least 1");
        }
        if self.runtime.max_attempts == 0 {
            bail!("💀 runtime.max_attempts must be at least 1 (1 = no retry)");
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            bail!("💀 max_error_rate must be within [0, 1], got {}", self.max_error_rate);
        }
        Ok(())
    }
}

/// 🎯 What the command line gets to say. `None` = "no opinion, ask the next layer".
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub shards: BTreeMap<String, String>,
}

/// 🚀 Load the config — defaults, then env, then the file, then the command line.
///
/// 💀 Returns an error if the merged result is unparseable or fails validation.
/// The context message says which layers were involved, so you know where to look.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: &ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    debug!("🔧 Loading configuration: {:?}", config_file_name);

    let config = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Env::prefixed("MEMCLOAD_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let config = config.merge(Serialized::defaults(overrides));

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}', environment variables (MEMCLOAD_*) \
             and command-line flags.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (MEMCLOAD_*) \
                 and command-line flags. No file was provided."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config.validate()?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() -> anyhow::Result<()> {
        let app_config = load_config(None, &ConfigOverrides::default())?;

        assert_eq!(app_config.workers, 2);
        assert_eq!(app_config.runtime.batch_size, 1000);
        assert_eq!(app_config.runtime.max_attempts, 1);
        assert_eq!(app_config.shards.len(), 4);
        assert_eq!(app_config.shards["dvid"], "127.0.0.1:33016");
        Ok(())
    }

    #[test]
    fn the_one_where_the_file_only_mentions_one_shard_and_the_rest_survive() -> anyhow::Result<()> {
        let config_file = write_test_config(
            r#"
            pattern = "/data/appsinstalled/*.tsv.gz"
            workers = 6

            [shards]
            idfa = "10.0.0.1:11211"

            [runtime]
            batch_size = 250
            queue_capacity = 4
            max_attempts = 3
            "#,
        );

        let app_config = load_config(Some(config_file.path()), &ConfigOverrides::default())?;

        assert_eq!(app_config.pattern, "/data/appsinstalled/*.tsv.gz");
        assert_eq!(app_config.workers, 6);
        assert_eq!(app_config.shards["idfa"], "10.0.0.1:11211");
        assert_eq!(app_config.shards["gaid"], "127.0.0.1:33014");
        assert_eq!(app_config.runtime.batch_size, 250);
        assert_eq!(app_config.runtime.queue_capacity, 4);
        assert_eq!(app_config.runtime.max_attempts, 3);
        assert_eq!(app_config.runtime.io_timeout_ms, 1500);
        Ok(())
    }

    #[test]
    fn the_one_where_the_command_line_has_the_last_word() -> anyhow::Result<()> {
        let config_file = write_test_config(
            r#"
            workers = 6
            dry_run = false
            "#,
        );
        let overrides = ConfigOverrides {
            workers: Some(3),
            dry_run: Some(true),
            shards: BTreeMap::from([("gaid".to_string(), "10.0.0.2:11211".to_string())]),
            ..ConfigOverrides::default()
        };

        let app_config = load_config(Some(config_file.path()), &overrides)?;

        assert_eq!(app_config.workers, 3);
        assert!(app_config.dry_run);
        assert_eq!(app_config.shards["gaid"], "10.0.0.2:11211");
        assert_eq!(app_config.shards["idfa"], "127.0.0.1:33013");
        Ok(())
    }

    #[test]
    fn the_one_where_zero_workers_is_not_a_lifestyle() {
        let config_file = write_test_config("workers = 0\n");
        let outcome = load_config(Some(config_file.path()), &ConfigOverrides::default());
        assert!(outcome.is_err());
    }

    #[test]
    fn the_one_where_validation_catches_the_silly_stuff() {
        let mut app_config = AppConfig::default();
        assert!(app_config.validate().is_ok());

        app_config.runtime.batch_size = 0;
        assert!(app_config.validate().is_err());

        let mut app_config = AppConfig::default();
        app_config.max_error_rate = 1.5;
        assert!(app_config.validate().is_err());

        let mut app_config = AppConfig::default();
        app_config.shards.clear();
        assert!(app_config.validate().is_err());
    }
}
