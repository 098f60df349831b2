//! 🚀 memcload-cli — the front door, the bouncer, the maitre d' of memcload.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary is the thin wrapper that parses flags, loads config, sets up
//! logging, and then lets the library do the heavy lifting. At the end it reads
//! the summary out loud and decides whether today was a good day. 🦆

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use memcload::{AppConfig, ConfigOverrides, RunSummary};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🧾 Load gzipped device/app TSV logs into sharded memcached.
#[derive(Debug, Parser)]
#[command(name = "memcload", version, about)]
struct Args {
    /// TOML config file. Defaults and MEMCLOAD_* env vars apply either way.
    config: Option<PathBuf>,

    /// How many files are loaded at once
    #[arg(long)]
    workers: Option<usize>,

    /// Parse and route everything, write nothing, rename nothing
    #[arg(long)]
    dry: bool,

    /// Glob selecting the input files
    #[arg(long)]
    pattern: Option<String>,

    /// Address of the idfa shard
    #[arg(long, value_name = "HOST:PORT")]
    idfa: Option<String>,

    /// Address of the gaid shard
    #[arg(long, value_name = "HOST:PORT")]
    gaid: Option<String>,

    /// Address of the adid shard
    #[arg(long, value_name = "HOST:PORT")]
    adid: Option<String>,

    /// Address of the dvid shard
    #[arg(long, value_name = "HOST:PORT")]
    dvid: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log: Option<PathBuf>,

    /// Run the protobuf self-test and exit
    #[arg(long)]
    test: bool,
}

impl Args {
    /// 🎯 Only the flags that were actually given make it into the overrides.
    fn overrides(&self) -> ConfigOverrides {
        let shards = [("idfa", &self.idfa), ("gaid", &self.gaid), ("adid", &self.adid), ("dvid", &self.dvid)]
            .into_iter()
            .filter_map(|(name, addr)| addr.clone().map(|addr| (name.to_string(), addr)))
            .collect();
        ConfigOverrides {
            pattern: self.pattern.clone(),
            workers: self.workers,
            dry_run: self.dry.then_some(true),
            log_file: self.log.clone(),
            shards,
        }
    }
}

/// 📡 Set up tracing — because println! debugging is a lifestyle choice
/// we're trying to move past, like flip phones and cargo shorts.
///
/// `RUST_LOG` wins when set. Otherwise `info`, or `debug` for dry runs.
fn init_tracing(app_config: &AppConfig) -> Result<()> {
    let default_level = if app_config.dry_run { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true);

    match &app_config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("💀 couldn't open log file '{}' for appending", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

/// ⚖️ Good day or bad day. Strictly greater than the threshold fails; equal passes.
fn load_succeeded(summary: &RunSummary, max_error_rate: f64) -> bool {
    summary.error_rate() <= max_error_rate
}

/// 💀 Error handling: the part where we find out what went wrong
/// and print it in a way that's helpful at 3am.
fn report_failure(err: &anyhow::Error) {
    error!("💀 error: {}", err);
    // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
    let mut the_vibes_are_giving_connection_issues = false;
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {}", cause);
        let cause_str = cause.to_string();
        if cause_str.contains("connection refused")
            || cause_str.contains("Connection refused")
            || cause_str.contains("could not connect")
            || cause_str.contains("timed out")
        {
            the_vibes_are_giving_connection_issues = true;
        }
    }

    // -- 📡 if it smells like a connection problem, it's probably a connection problem
    if the_vibes_are_giving_connection_issues {
        error!(
            "🔧 hint: looks like a shard isn't reachable. Check that memcached is running on \
            every address in the shard table (defaults: 127.0.0.1:33013 through 33016). \
            Even servers need a nudge sometimes. ☕"
        );
    }
}

/// 🚀 main() — where it all begins.
///
/// 🔧 Steps:
/// 1. Parse args, load config (the moment of truth)
/// 2. Init tracing (needs the config: dry runs are chattier, log files are optional)
/// 3. Self-test or load (send it and pray 🙏)
/// 4. Print the table, render the verdict
fn main() -> ExitCode {
    let args = Args::parse();

    let app_config = match memcload::load_config(args.config.as_deref(), &args.overrides()) {
        Ok(app_config) => app_config,
        Err(err) => {
            // -- 🪵 no subscriber yet, and we're not going to get one with this config
            eprintln!("💀 In memcload-cli, main, we couldn't load the configuration: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = init_tracing(&app_config) {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }
    info!("memcload started with options: {app_config:?}");

    if args.test {
        return match memcload::selftest() {
            Ok(()) => {
                info!("✅ self-test passed");
                ExitCode::SUCCESS
            }
            Err(err) => {
                report_failure(&err);
                ExitCode::FAILURE
            }
        };
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("memcload-worker")
        .build()
        .context("💀 couldn't build the tokio runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            report_failure(&err);
            return ExitCode::FAILURE;
        }
    };

    let max_error_rate = app_config.max_error_rate;
    let summary = match runtime.block_on(memcload::run(app_config)) {
        Ok(summary) => summary,
        Err(err) => {
            report_failure(&err);
            // 🗑️ Exit with prejudice. Process exitus maximus.
            return ExitCode::FAILURE;
        }
    };

    println!("{}", memcload::progress::render_summary(&summary));

    let error_rate = summary.error_rate();
    if load_succeeded(&summary, max_error_rate) {
        info!("Acceptable error rate ({error_rate:.4}). Successful load");
        // ✅ Pop the champagne. 🍾
        ExitCode::SUCCESS
    } else {
        error!("High error rate ({error_rate:.4} > {max_error_rate}). Failed load");
        ExitCode::FAILURE
    }
}
