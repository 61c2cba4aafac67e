use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use syncpad_collab::broadcast::BroadcastGroup;
use syncpad_collab::protocol::{Envelope, PeerInfo};
use syncpad_core::SyncMessage;
use uuid::Uuid;

fn bench_code_change_encode(c: &mut Criterion) {
    let peer = Uuid::new_v4();
    let mut group = c.benchmark_group("CodeChange encode");

    for size in [64usize, 4096, 65536] {
        let msg = SyncMessage::code_change("room-1", "x".repeat(size));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}B"), |b| {
            b.iter(|| {
                let envelope = Envelope::code_change(black_box(peer), black_box(&msg)).unwrap();
                black_box(envelope.encode().unwrap());
            })
        });
    }

    group.finish();
}

fn bench_code_change_decode(c: &mut Criterion) {
    let msg = SyncMessage::code_change("room-1", "x".repeat(4096));
    let encoded = Envelope::code_change(Uuid::new_v4(), &msg)
        .unwrap()
        .encode()
        .unwrap();

    c.bench_function("code_change_decode_4KB", |b| {
        b.iter(|| {
            let envelope = Envelope::decode(black_box(&encoded)).unwrap();
            black_box(envelope.sync_message().unwrap());
        })
    });
}

fn bench_broadcast_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("Broadcast fan-out");

    for peers in [10usize, 100] {
        let room = BroadcastGroup::new(1024);
        let receivers: Vec<_> = rt.block_on(async {
            let mut receivers = Vec::with_capacity(peers);
            for i in 0..peers {
                receivers.push(room.add_peer(PeerInfo::new(format!("Peer{i}"))).await);
            }
            receivers
        });
        let bytes = Envelope::code_change(Uuid::new_v4(), &SyncMessage::code_change("room-1", "x".repeat(1024)))
            .unwrap()
            .encode()
            .unwrap();

        group.throughput(Throughput::Elements(peers as u64));
        group.bench_function(format!("1KB_to_{peers}_peers"), |b| {
            b.iter(|| black_box(room.broadcast_raw(Uuid::nil(), black_box(bytes.clone()))))
        });
        drop(receivers);
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_code_change_encode,
    bench_code_change_decode,
    bench_broadcast_fan_out,
);
criterion_main!(benches);
