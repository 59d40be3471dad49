//! Benchmarks for endpoint selection.
//!
//! Tests: select cost of every strategy over small and large endpoint sets,
//! consistent-hash ring sizes, and contended selection across threads.

use async_trait::async_trait;
use conn_balancer::balance::{
    self, BalanceType, ConsistentHash, Endpoint, EndpointStats, LoadBalance, LoadTracked, Weighted,
};
use conn_balancer::PoolError;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Endpoint without a pool so only selection is measured
struct BenchEndpoint {
    addr: String,
    weight: u32,
    active: AtomicUsize,
}

#[async_trait]
impl Endpoint for BenchEndpoint {
    type Resource = ();

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn acquire(&self, _ctx: &CancellationToken) -> Result<(), PoolError> {
        Ok(())
    }

    fn close(&self) -> Result<(), PoolError> {
        Ok(())
    }

    fn stats(&self) -> EndpointStats {
        EndpointStats {
            active_conns: self.active_connections(),
            idle_conns: 0,
        }
    }
}

impl Weighted for BenchEndpoint {
    fn weight(&self) -> u32 {
        self.weight
    }
}

impl LoadTracked for BenchEndpoint {
    fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn idle_connections(&self) -> usize {
        0
    }

    fn add_active_connection(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn release_active_connection(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

fn make_endpoints(count: usize) -> Vec<Arc<BenchEndpoint>> {
    (0..count)
        .map(|i| {
            Arc::new(BenchEndpoint {
                addr: format!("10.0.{}.{}:8080", i / 250, i % 250 + 1),
                weight: (i % 5 + 1) as u32,
                active: AtomicUsize::new(0),
            })
        })
        .collect()
}

fn keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("client-{i}")).collect()
}

// ---------------------------------------------------------------------------
// Strategy selection benchmarks
// ---------------------------------------------------------------------------

fn bench_select(c: &mut Criterion) {
    let keys = keys(1024);

    for kind in BalanceType::ALL {
        let mut group = c.benchmark_group(format!("balance/select/{kind}"));

        for endpoint_count in [3, 10, 50] {
            let lb = balance::new(kind, make_endpoints(endpoint_count)).unwrap();
            let mut i = 0usize;

            group.bench_with_input(
                BenchmarkId::from_parameter(endpoint_count),
                &endpoint_count,
                |b, _| {
                    b.iter(|| {
                        let key = kind.needs_key().then(|| keys[i % keys.len()].as_str());
                        i = i.wrapping_add(1);
                        let ep = lb.select(black_box(key)).unwrap();
                        ep.release_active_connection();
                        black_box(ep)
                    })
                },
            );
        }

        group.finish();
    }
}

// ---------------------------------------------------------------------------
// Consistent hash ring benchmarks
// ---------------------------------------------------------------------------

fn bench_ring_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance/consistent_hash/virtual_nodes");
    let keys = keys(1024);

    for virtual_nodes in [1, 10, 100, 500] {
        let lb = ConsistentHash::new(make_endpoints(20), virtual_nodes).unwrap();
        let mut i = 0usize;

        group.bench_with_input(
            BenchmarkId::from_parameter(virtual_nodes),
            &virtual_nodes,
            |b, _| {
                b.iter(|| {
                    let key = keys[i % keys.len()].as_str();
                    i = i.wrapping_add(1);
                    black_box(lb.select(Some(black_box(key))).unwrap())
                })
            },
        );
    }

    group.finish();
}

fn bench_ring_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance/consistent_hash/membership");
    let extra = make_endpoints(51).pop().unwrap();

    group.bench_function("add_remove", |b| {
        let lb = ConsistentHash::new(make_endpoints(50), 10).unwrap();
        b.iter(|| {
            lb.add_endpoint(Arc::clone(&extra)).unwrap();
            black_box(lb.remove_endpoint(extra.addr()))
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Contended selection
// ---------------------------------------------------------------------------

fn bench_concurrent_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance/concurrent");

    for kind in [
        BalanceType::RoundRobin,
        BalanceType::WeightedRoundRobin,
        BalanceType::LeastConnection,
    ] {
        let lb: Arc<dyn LoadBalance<BenchEndpoint>> =
            Arc::from(balance::new(kind, make_endpoints(10)).unwrap());

        group.bench_function(BenchmarkId::new("4_threads", kind), |b| {
            b.iter(|| {
                std::thread::scope(|s| {
                    for _ in 0..4 {
                        let lb = Arc::clone(&lb);
                        s.spawn(move || {
                            for _ in 0..100 {
                                let ep = lb.select(None).unwrap();
                                ep.release_active_connection();
                            }
                        });
                    }
                });
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_select,
    bench_ring_size,
    bench_ring_rebuild,
    bench_concurrent_select,
);
criterion_main!(benches);
