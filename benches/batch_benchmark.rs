use std::sync::Arc;
use std::time::Duration;

use batchflow::batch::{
    BatchConfig, BatchCoordinator, FailureLedger, MemoryRepository, MemorySession, Task,
    ThrottledTaskRunner, PREFIX_LANGUAGE,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

fn bench_config() -> BatchConfig {
    BatchConfig::default()
        .with_save_interval(100)
        .with_hesitation_delay(Duration::from_millis(1))
        .with_completion_check_interval(Duration::from_millis(1))
}

fn run_batch(rt: &Runtime, tasks: usize, threads: usize) {
    rt.block_on(async {
        let runner = Arc::new(ThrottledTaskRunner::new(threads).unwrap());
        let batch =
            BatchCoordinator::new("bench", runner, MemoryRepository::new(), bench_config())
                .unwrap();

        for i in 0..tasks {
            let path = format!("/bench/{i}");
            batch
                .schedule(Task::for_item(path.clone(), move |session: &mut MemorySession| {
                    session.put(&path, json!(i));
                    Ok(())
                }))
                .unwrap();
        }
        batch.wait_for_completion().await;
        black_box(batch.statistics());
    });
}

fn benchmark_batch_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("batch_throughput");
    group.sample_size(20);

    for threads in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::new("1000_tasks", threads), &threads, |b, &t| {
            b.iter(|| run_batch(&rt, 1000, t))
        });
    }
    group.finish();
}

fn benchmark_query_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("fan_out_500_results", |b| {
        b.iter(|| {
            rt.block_on(async {
                let runner = Arc::new(ThrottledTaskRunner::new(4).unwrap());
                // Each batch closes its repository on teardown
                let source = MemoryRepository::new();
                for i in 0..500 {
                    source.insert(format!("/content/{i}"), json!({ "index": i }));
                }
                let batch = BatchCoordinator::new("fan-out", runner, source, bench_config())
                    .unwrap();
                batch
                    .schedule_for_each_query_result(
                        "/content/",
                        PREFIX_LANGUAGE,
                        |session, item| {
                            session.put(&format!("{item}/seen"), json!(true));
                            Ok(())
                        },
                        Vec::new(),
                    )
                    .unwrap();
                batch.wait_for_completion().await;
            })
        })
    });
}

fn benchmark_failure_ledger(c: &mut Criterion) {
    c.bench_function("ledger_record_and_report", |b| {
        b.iter(|| {
            let ledger = FailureLedger::new(5000);
            for i in 0..1000 {
                ledger.record(Some(format!("/item/{i}")), "failed");
            }
            black_box(ledger.report("bench"))
        })
    });
}

criterion_group!(
    benches,
    benchmark_batch_throughput,
    benchmark_query_fan_out,
    benchmark_failure_ledger
);
criterion_main!(benches);
