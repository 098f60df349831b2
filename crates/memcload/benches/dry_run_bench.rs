//! 🏎️ Dry-run throughput: gunzip → parse → route → batch, with the shards stubbed out.
//!
//! Run with: `cargo bench -p memcload --bench dry_run_bench`
//!
//! Dry runs never rename, so the same fixture can be loaded on every iteration.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flate2::Compression;
use flate2::write::GzEncoder;
use memcload::{AppConfig, RuntimeConfig};
use tokio::runtime::Runtime;

const SHARDS: [&str; 4] = ["idfa", "gaid", "adid", "dvid"];

fn write_fixture(dir: &Path, lines: usize) {
    let file = File::create(dir.join("20170929000000.tsv.gz")).expect("create fixture");
    let mut encoder = GzEncoder::new(file, Compression::fast());
    for i in 0..lines {
        let shard = SHARDS[i % SHARDS.len()];
        writeln!(encoder, "{shard}\tdevice-{i:08}\t55.55\t42.42\t{},{},{},{}", i % 7000, 43, 567, i % 13)
            .expect("write fixture");
    }
    encoder.finish().expect("finish fixture");
}

fn bench_dry_run(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("dry_run_load");
    group.sample_size(10);

    for lines in [10_000usize, 100_000] {
        let dir = tempfile::tempdir().expect("tempdir");
        write_fixture(dir.path(), lines);
        let config = AppConfig {
            pattern: format!("{}/*.tsv.gz", dir.path().display()),
            dry_run: true,
            runtime: RuntimeConfig {
                batch_size: 1000,
                ..RuntimeConfig::default()
            },
            ..AppConfig::default()
        };

        group.throughput(Throughput::Elements(lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &config, |b, config| {
            b.to_async(&runtime).iter(|| {
                let config = config.clone();
                async move {
                    let summary = memcload::run(config).await.expect("dry run");
                    assert_eq!(summary.processed, lines as u64);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dry_run);
criterion_main!(benches);
