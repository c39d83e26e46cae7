use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::executor::block_on;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tripwire::{Breaker, BreakerConfig, Circuit, CircuitRegistry};

// Custom error type that implements Error trait
#[derive(Debug)]
struct BenchError(String);

impl BenchError {
    fn new(msg: &str) -> Self {
        BenchError(msg.to_string())
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Benchmark error: {}", self.0)
    }
}

impl Error for BenchError {}

fn successful_operation() -> Result<(), BenchError> {
    Ok(())
}

fn failing_operation() -> Result<(), BenchError> {
    Err(BenchError::new("Simulated failure"))
}

fn bench_breaker_closed(c: &mut Criterion) {
    let breaker = Breaker::new("bench-closed", BreakerConfig::default());

    c.bench_function("breaker_closed_success", |b| {
        b.iter(|| black_box(breaker.call(successful_operation)));
    });
}

fn bench_breaker_transition(c: &mut Criterion) {
    let config = BreakerConfig::builder()
        .sliding_window_size(10)
        .minimum_number_of_calls(5)
        .failure_rate_threshold(50.0)
        .open_state_delay(Duration::from_secs(30))
        .build()
        .expect("valid bench config");
    let breaker = Breaker::new("bench-transition", config);

    c.bench_function("breaker_transition", |b| {
        b.iter_custom(|iters| {
            let start = std::time::Instant::now();

            for _ in 0..iters {
                // Force closed to ensure consistent starting point
                breaker.force_closed();

                // Five failing calls trip the breaker
                for _ in 0..5 {
                    let _ = black_box(breaker.call(failing_operation));
                }

                // One open-circuit rejection
                let _ = black_box(breaker.call(successful_operation));
            }

            start.elapsed()
        });
    });
}

fn bench_circuit_execute(c: &mut Criterion) {
    let registry = CircuitRegistry::default();
    let circuit: Circuit<u64, BenchError> = registry
        .build_circuit("bench-circuit", "bench_circuit")
        .func(|| async { Ok(1) });

    c.bench_function("circuit_execute_success", |b| {
        b.iter(|| black_box(block_on(circuit.execute())));
    });
}

fn bench_breaker_concurrent(c: &mut Criterion) {
    use std::sync::Barrier;
    use std::thread;

    let breaker = Arc::new(Breaker::new("bench-concurrent", BreakerConfig::default()));

    const THREAD_COUNT: usize = 4;
    const ITERATIONS_PER_THREAD: usize = 1000;

    c.bench_function("breaker_concurrent", |b| {
        b.iter(|| {
            let barrier = Arc::new(Barrier::new(THREAD_COUNT + 1));
            let mut handles = Vec::with_capacity(THREAD_COUNT);

            for _ in 0..THREAD_COUNT {
                let thread_breaker = Arc::clone(&breaker);
                let thread_barrier = Arc::clone(&barrier);

                handles.push(thread::spawn(move || {
                    thread_barrier.wait();
                    for _ in 0..ITERATIONS_PER_THREAD {
                        let _ = black_box(thread_breaker.call(successful_operation));
                    }
                }));
            }

            // Start all threads simultaneously
            barrier.wait();

            // Wait for all threads to complete
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_breaker_closed,
    bench_breaker_transition,
    bench_circuit_execute,
    bench_breaker_concurrent
);
criterion_main!(benches);
