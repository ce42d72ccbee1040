//! Graph builder benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use graphex_core::Target;
use graphex_graph::GraphBuilder;
use graphex_query::QueryParser;
use std::collections::BTreeMap;

fn make_targets(servers: usize, cores: usize) -> BTreeMap<String, Target> {
    let mut targets = BTreeMap::new();
    for s in 0..servers {
        for c in 0..cores {
            for state in ["idle", "user", "system", "iowait"] {
                let target = Target::new(format!("servers.s{}.cpu.{}.{}", s, c, state))
                    .tag("server", format!("s{}", s))
                    .tag("core", c.to_string())
                    .tag("type", state)
                    .tag("what", "cpu_state")
                    .tag("target_type", "gauge_pct");
                targets.insert(target.id.clone(), target);
            }
        }
    }
    targets
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");

    for servers in [10, 100].iter() {
        let targets = make_targets(*servers, 8);
        let query = QueryParser::parse("limit 100000");

        group.throughput(Throughput::Elements(targets.len() as u64));
        group.bench_function(format!("default_group_by_{}", targets.len()), |b| {
            b.iter(|| black_box(GraphBuilder::new(&query).build(black_box(&targets))));
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_aggregate");

    let targets = make_targets(50, 8);
    let query = QueryParser::parse("sum by core avg by server limit 100000");

    group.throughput(Throughput::Elements(targets.len() as u64));
    group.bench_function("sum_core_avg_server", |b| {
        b.iter(|| black_box(GraphBuilder::new(&query).build(black_box(&targets))));
    });

    group.finish();
}

criterion_group!(benches, bench_build, bench_aggregate);
criterion_main!(benches);
