use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use diskblob_store::{BlobRef, DescriptorLimit, DiskStorage, HashAlgo, StoreOptions};
use std::io::Read;
use tempfile::TempDir;

fn open(temp: &TempDir) -> DiskStorage {
    DiskStorage::open(
        temp.path(),
        StoreOptions {
            descriptor_limit: DescriptorLimit::Fixed(4096),
            ..StoreOptions::default()
        },
    )
    .unwrap()
}

fn bench_receive(c: &mut Criterion) {
    let mut group = c.benchmark_group("receive");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let temp = TempDir::new().unwrap();
        let storage = open(&temp);
        let data = vec![0u8; size];
        let blob = BlobRef::compute(HashAlgo::Sha224, &data).unwrap();

        // Same blob every iteration: measures the full temp-write-rename path
        // landing on an existing file.
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| storage.receive(black_box(&blob), &mut data.as_slice()).unwrap())
        });
    }
    group.finish();
}

fn bench_fetch(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let storage = open(&temp);
    let data = vec![0u8; 1024 * 10]; // 10KB
    let blob = BlobRef::compute(HashAlgo::Sha224, &data).unwrap();
    storage.receive(&blob, &mut data.as_slice()).unwrap();

    c.bench_function("fetch_10kb", |b| {
        b.iter(|| {
            let (mut reader, _) = storage.fetch(black_box(&blob)).unwrap();
            let mut out = Vec::with_capacity(data.len());
            reader.read_to_end(&mut out).unwrap();
            out
        })
    });

    c.bench_function("range_fetch_1kb_of_10kb", |b| {
        b.iter(|| {
            let mut reader = storage.range_fetch(black_box(&blob), 4096, 1024).unwrap();
            let mut out = Vec::with_capacity(1024);
            reader.read_to_end(&mut out).unwrap();
            out
        })
    });
}

fn bench_stat_blobs(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let storage = open(&temp);
    let refs: Vec<BlobRef> = (0..256u32)
        .map(|i| {
            let data = i.to_le_bytes();
            let blob = BlobRef::compute(HashAlgo::Blake3, &data).unwrap();
            // Every other blob stays missing.
            if i % 2 == 0 {
                storage.receive(&blob, &mut &data[..]).unwrap();
            }
            blob
        })
        .collect();

    c.bench_function("stat_blobs_256", |b| {
        b.iter(|| storage.stat_blobs(black_box(&refs)).unwrap())
    });
}

criterion_group!(benches, bench_receive, bench_fetch, bench_stat_blobs);
criterion_main!(benches);
