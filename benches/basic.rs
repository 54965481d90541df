use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serial_session::port::MockDriver;
use serial_session::{FlowControl, Parity, Session, TransferMode};
use std::hint::black_box;
use std::time::Duration;

fn loopback_session() -> (MockDriver, Session) {
    let driver = MockDriver::new();
    driver.add_loopback_device("MOCK0");
    let session = Session::open(&driver, "MOCK0").expect("mock session opens");
    session
        .set_params(115200, 8, 1, Parity::None, FlowControl::None)
        .expect("mock accepts 8N1");
    (driver, session)
}

pub fn bench_loopback_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("loopback_transfer");
    for size in [16usize, 256, 4096] {
        let payload = vec![0x55u8; size];
        let mut buffer = vec![0u8; size];
        let (_driver, session) = loopback_session();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                session
                    .write(black_box(payload), TransferMode::NonBlocking, 0)
                    .expect("write");
                let n = session
                    .read(&mut buffer, TransferMode::NonBlocking, 0)
                    .expect("read");
                black_box(n);
            })
        });
    }
    group.finish();
}

pub fn bench_set_params(c: &mut Criterion) {
    let (_driver, session) = loopback_session();
    c.bench_function("set_params", |b| {
        b.iter(|| {
            session
                .set_params(black_box(9600), 8, 1, Parity::Even, FlowControl::None)
                .expect("set_params");
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_loopback_transfer, bench_set_params
}
criterion_main!(benches);
