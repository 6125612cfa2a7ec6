use std::iter::Map;
use std::ops::Range;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pipeloader::{DataPipe, Loader, StageError};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Count(u64);

type CountIter = Map<Range<u64>, fn(u64) -> Result<u64, StageError>>;

impl DataPipe for Count {
    type Item = u64;
    type Iter = CountIter;

    fn iter(&self) -> Self::Iter {
        (0..self.0).map(Ok as fn(u64) -> Result<u64, StageError>)
    }

    fn fork(&self) -> Self {
        Count(self.0)
    }
}

fn sum_ok<E>(iter: impl Iterator<Item = Result<u64, E>>) -> u64
where
    E: std::fmt::Debug,
{
    iter.map(|item| item.unwrap()).sum()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let graph = Count(10_000);

    let mut group = c.benchmark_group("pull");
    group.bench_function(BenchmarkId::new("count", "raw"), |b| {
        b.iter(|| sum_ok::<StageError>(graph.iter()));
    });
    group.bench_function(BenchmarkId::new("count", "loader"), |b| {
        let mut loader = Loader::new(&graph).unwrap();
        b.iter(|| sum_ok(loader.start_session().unwrap()));
    });
    group.finish();

    c.bench_function("checkpoint", |b| {
        let mut loader = Loader::new(&graph).unwrap();
        b.iter(|| loader.checkpoint().unwrap());
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
