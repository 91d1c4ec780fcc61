//! Per-datagram and per-stream hot paths
//!
//! Run with: cargo bench --bench ingest_path

use chakra_core::HostPolicy;
use chakra_relay::{AllowList, PortAllocator};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};

/// Benchmark: source check against allow-lists of growing size
fn bench_allow_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("allow_list");
    let source = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    for size in [1u8, 16, 128] {
        let hosts = (0..size).map(|i| IpAddr::V4(Ipv4Addr::new(192, 168, 0, i)));
        let list = AllowList::new(HostPolicy::Strict, hosts);

        group.bench_with_input(BenchmarkId::new("rejected", size), &list, |b, list| {
            b.iter(|| black_box(list.is_allowed(black_box(source))));
        });
    }

    let open = AllowList::new(HostPolicy::Disabled, Vec::new());
    group.bench_function("disabled", |b| {
        b.iter(|| black_box(open.is_allowed(black_box(source))));
    });

    group.finish();
}

/// Benchmark: release then reallocate in a half-used range
fn bench_port_churn(c: &mut Criterion) {
    let mut ports = PortAllocator::new(5000, 6000).unwrap();
    for _ in 0..500 {
        ports.allocate().unwrap();
    }

    c.bench_function("port_release_allocate", |b| {
        b.iter(|| {
            ports.release(black_box(5250));
            black_box(ports.allocate().unwrap());
        });
    });
}

criterion_group!(benches, bench_allow_list, bench_port_churn);
criterion_main!(benches);
