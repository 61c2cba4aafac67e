use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use syncpad_core::{Channel, Document, LocalHub, SyncChannel};

fn bench_local_edit_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("Whole-document sync");
    group.throughput(Throughput::Elements(1));

    for peers in [2usize, 10, 50] {
        let hub = LocalHub::new();
        let mut replicas = Vec::with_capacity(peers);
        for _ in 0..peers {
            let doc = Arc::new(Document::default());
            let endpoint = hub.join("bench");
            let channel: Arc<dyn Channel> = endpoint.clone();
            let sync = SyncChannel::connect("bench", doc.clone(), channel);
            replicas.push((doc, endpoint, sync));
        }
        let text = "x".repeat(4096);

        group.bench_function(format!("edit_4KB_{peers}_peers"), |b| {
            b.iter(|| {
                black_box(replicas[0].0.edit(black_box(text.as_str())));
            })
        });
    }

    group.finish();
}

fn bench_apply_remote(c: &mut Criterion) {
    let doc = Document::default();
    let text = "y".repeat(4096);

    c.bench_function("apply_remote_4KB", |b| {
        b.iter(|| {
            black_box(doc.apply_remote(black_box(text.as_str())));
        })
    });
}

criterion_group!(benches, bench_local_edit_fan_out, bench_apply_remote);
criterion_main!(benches);
