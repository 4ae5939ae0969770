//! SPSC channel throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin spsc_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)
//!     BATCH=256       Slots per write_n/read_n call (default: 256)

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use minstant::Instant;

use tether::sync::spsc;

const QUEUE_SIZE: usize = 1 << 16;
const ITERATIONS: usize = 1 << 24;
const RTT_ITERATIONS: usize = 1 << 18;

type Payload = i32;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

/// Spawns the consumer and waits until it is pinned and ready.
fn spawn_ready<F>(consumer_cpu: Option<usize>, body: F) -> std::thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let handle = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);
        body();
    });

    while !ready.load(Ordering::Acquire) {
        std::hint::spin_loop();
    }
    handle
}

fn bench_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (producer, consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();

    let consumer_thread = spawn_ready(consumer_cpu, move || {
        for expected in 0..ITERATIONS as Payload {
            let value = consumer.pop().expect("producer alive");
            if value != expected {
                panic!("Data corruption: expected {}, got {}", expected, value);
            }
        }
    });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS as Payload {
        producer.push(i).unwrap();
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("push/pop:         {} ops/ms", ops_per_ms);
}

fn bench_batched(producer_cpu: Option<usize>, consumer_cpu: Option<usize>, batch: usize) {
    let (producer, consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();

    let consumer_thread = spawn_ready(consumer_cpu, move || {
        let mut buffer = Vec::with_capacity(batch);
        let mut expected: Payload = 0;
        loop {
            buffer.clear();
            let more = consumer.read_n(&mut buffer, batch);
            for &value in &buffer {
                if value != expected {
                    panic!("Data corruption: expected {}, got {}", expected, value);
                }
                expected += 1;
            }
            if !more {
                break;
            }
        }
        assert_eq!(expected as usize, ITERATIONS);
    });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    let mut source = 0..ITERATIONS as Payload;
    while !source.is_empty() {
        let (rest, ok) = producer.write_n(source, batch);
        assert!(ok, "receiver disconnected");
        source = rest;
    }
    drop(producer);

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("write_n/read_n:   {} ops/ms (batch={})", ops_per_ms, batch);
}

fn bench_rtt(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (q1_producer, q1_consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();
    let (q2_producer, q2_consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();

    // Responder echoes until the pinger hangs up.
    let responder = spawn_ready(consumer_cpu, move || {
        for value in q1_consumer {
            q2_producer.push(value).unwrap();
        }
    });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..RTT_ITERATIONS as Payload {
        q1_producer.push(i).unwrap();
        let echoed = q2_consumer.pop().expect("responder alive");
        debug_assert_eq!(echoed, i);
    }

    let elapsed = start.elapsed();
    drop(q1_producer);
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / RTT_ITERATIONS as u128;
    println!("ping-pong:        {} ns RTT", rtt_ns);
}

fn main() {
    tether::init_tracing();

    let (producer_cpu, consumer_cpu) = get_cpu_affinity();
    let batch = env_usize("BATCH", 256).max(1);

    println!(
        "tether SPSC (size={}, iters={}):",
        QUEUE_SIZE, ITERATIONS
    );
    bench_throughput(producer_cpu, consumer_cpu);
    bench_batched(producer_cpu, consumer_cpu, batch);
    bench_rtt(producer_cpu, consumer_cpu);
}
