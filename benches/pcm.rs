use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use party_voice::codec::{PcmDecoder, PcmEncoder};
use party_voice::voice::gate::mean_abs;

const FRAME: usize = 1102;

fn frame() -> Vec<f32> {
    (0..FRAME)
        .map(|i| (i as f32 * 0.05).sin() * 0.4)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let samples = frame();
    let mut encoder = PcmEncoder::new();
    let mut group = c.benchmark_group("pcm");
    group.throughput(Throughput::Elements(FRAME as u64));
    group.bench_function("encode_frame", |b| {
        b.iter(|| encoder.encode(black_box(&samples)))
    });

    let payload = PcmEncoder::new().encode(&samples);
    let mut decoder = PcmDecoder::new();
    group.bench_function("decode_frame", |b| {
        b.iter(|| decoder.decode(black_box(&payload)))
    });
    group.finish();
}

fn bench_gate(c: &mut Criterion) {
    let samples = frame();
    c.bench_function("silence_gate_mean_abs", |b| {
        b.iter(|| mean_abs(black_box(&samples)))
    });
}

criterion_group!(benches, bench_encode, bench_gate);
criterion_main!(benches);
