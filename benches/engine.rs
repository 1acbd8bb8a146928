use criterion::{criterion_group, criterion_main, Criterion};
use lambda_link::devices::wheel::position_exchange;
use lambda_link::devices::WheelId;
use lambda_link::port::{MockTransport, PortId};
use lambda_link::protocol::{CommandEngine, Exchange};
use lambda_link::registry::PortRegistry;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn engine() -> (CommandEngine, PortId) {
    let mock = MockTransport::new();
    let port = PortId::new("BENCH");
    mock.echo_commands(&port, true);
    let engine = CommandEngine::with_registry(Arc::new(mock), Arc::new(PortRegistry::new()));
    (engine, port)
}

pub fn bench_exchanges(c: &mut Criterion) {
    let (engine, port) = engine();
    let timeout = Duration::from_millis(100);

    let single = Exchange::new([0x35]).timeout(timeout);
    c.bench_function("exchange_single_byte", |b| {
        b.iter(|| black_box(engine.send(&port, &single)))
    });

    let wavelength = Exchange::new([0xDA, 0x01, 0xC2, 0x08]).timeout(timeout);
    c.bench_function("exchange_four_bytes", |b| {
        b.iter(|| black_box(engine.send(&port, &wavelength)))
    });

    let wheel_c = position_exchange(WheelId::C, 5, 3).timeout(timeout);
    c.bench_function("exchange_wheel_c", |b| {
        b.iter(|| black_box(engine.send(&port, &wheel_c)))
    });
}

pub fn bench_encoding(c: &mut Criterion) {
    c.bench_function("encode_wheel_position", |b| {
        b.iter(|| black_box(position_exchange(WheelId::B, black_box(7), black_box(5))))
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_exchanges, bench_encoding
}
criterion_main!(benches);
