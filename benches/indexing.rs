//! Build throughput benchmarks.
//!
//! Run with: `cargo bench`
//! Save baseline: `cargo bench -- --save-baseline main`
//! Compare: `cargo bench -- --baseline main`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flatdex::aim::{SignatureHasher, build_signature};
use flatdex::index::build_index;
use flatdex::request::BuildContext;
use flatdex::spec::{AimOptions, AimSpec, FieldSpec, IndexOptions, IndexSpec};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const RECORD_LEN: usize = 48;

/// Fixed records with a scrambled 10-byte account and a text name
fn create_fixture(dir: &Path, records: usize) -> PathBuf {
    let mut content = Vec::with_capacity(records * (RECORD_LEN + 1));
    for i in 0..records {
        let account = (i * 2_654_435_761) % 10_000_000_000;
        let line = format!("{account:010} customer {:<10} city {:<15}", i % 977, i % 131);
        content.extend_from_slice(&line.as_bytes()[..RECORD_LEN]);
        content.push(b'\n');
    }
    let path = dir.join("records.dat");
    fs::write(&path, content).expect("Failed to write fixture");
    path
}

fn bench_isi_build(c: &mut Criterion) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let ctx = BuildContext::default();

    let mut group = c.benchmark_group("isi_build");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for records in [10_000usize, 100_000] {
        let input = create_fixture(temp.path(), records);
        let output = temp.path().join("records.isi");
        group.throughput(Throughput::Elements(records as u64));

        for block_size in [512usize, 4096] {
            let spec = IndexSpec {
                fields: vec![FieldSpec::new(0, 10), FieldSpec::new(20, 4)],
                options: IndexOptions {
                    block_size,
                    allow_duplicates: true,
                    fixed: true,
                    ..Default::default()
                },
                ..Default::default()
            };
            group.bench_with_input(
                BenchmarkId::new(format!("block_{block_size}"), records),
                &spec,
                |b, spec| {
                    b.iter(|| build_index(&input, &output, spec, &ctx).expect("build failed"))
                },
            );
        }
    }
    group.finish();
}

fn bench_aim_build(c: &mut Criterion) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let ctx = BuildContext::default();
    let input = create_fixture(temp.path(), 50_000);
    let output = temp.path().join("records.aim");

    let mut group = c.benchmark_group("aim_build");
    group.sample_size(10);
    group.throughput(Throughput::Elements(50_000));

    for memory_kb in [16usize, 4096] {
        let spec = AimSpec {
            fields: vec![FieldSpec::new(11, 19), FieldSpec::new(31, 17)],
            options: AimOptions {
                fixed: true,
                memory_kb: Some(memory_kb),
                ..Default::default()
            },
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("memory_kb", memory_kb), &spec, |b, spec| {
            b.iter(|| build_signature(&input, &output, spec, &ctx).expect("build failed"))
        });
    }
    group.finish();
}

fn bench_ngram_hashing(c: &mut Criterion) {
    let fields = [FieldSpec::new(0, 24), FieldSpec::new(24, 24)];
    let hasher = SignatureHasher::new(&fields, 199, Some(Default::default()));
    let record = b"customer harbor lantern  city quartz meadow 0042".to_vec();

    c.bench_function("hash_record", |b| {
        b.iter(|| {
            let mut buf = record.clone();
            let mut count = 0usize;
            hasher.hash_record(black_box(&mut buf), |slot| count += slot);
            count
        })
    });
}

criterion_group!(benches, bench_isi_build, bench_aim_build, bench_ngram_hashing);
criterion_main!(benches);
