//! MPSC event queue throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin queue_bench
//!
//! Environment variables:
//!     NUM_PRODUCERS=4        Producer thread count
//!     EVENTS_PER_PRODUCER=N  Events each producer publishes (default 1M)
//!     PRODUCER_CPU=4         Pin producer i to CPU PRODUCER_CPU + i (default: unpinned)
//!     CONSUMER_CPU=2         Pin the consumer to CPU 2 (default: 2)
//!
//! Producer `i` publishes in batches of `i + 1` events, so the run mixes
//! the single-reservation path with wrapped range reservations.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use talos::{Event, EventQueue, WaitStrategy};

const CAPACITY: usize = 1 << 16;
const STRIDE: usize = 64;

struct Tick {
    value: u64,
}

impl Event for Tick {
    fn process(&mut self) {
        std::hint::black_box(self.value);
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_base = env::var("PRODUCER_CPU").ok().and_then(|s| s.parse().ok());
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_base, consumer_cpu)
}

/// Publishes `count` events in batches of `batch`, payloads tagged with the
/// producer id in the high bits.
fn produce(queue: &EventQueue, producer: usize, count: u64, batch: usize) -> u64 {
    let tag = (producer as u64 + 1) << 32;
    let mut sum = 0u64;
    let mut published = 0u64;

    while published < count {
        if batch == 1 {
            let value = tag + published;
            // SAFETY: Tick fits the 64-byte stride; every thread in this
            // binary stores and pops Tick.
            let handle = unsafe { queue.reserve(Tick { value }) };
            queue.commit(handle.sequence());
            sum += value;
            published += 1;
            continue;
        }

        let n = batch.min((count - published) as usize);
        let Some(range) = queue.try_reserve_range(n) else {
            thread::yield_now();
            continue;
        };
        for segment in range.segments() {
            for i in 0..segment.count() {
                let value = tag + published;
                // SAFETY: as above.
                unsafe { segment.emplace(i, Tick { value }) };
                sum += value;
                published += 1;
            }
            queue.commit_batch(segment.sequence(), segment.count());
        }
    }
    sum
}

fn main() {
    talos::trace::init_tracing();

    let num_producers = env_usize("NUM_PRODUCERS", 4);
    let events = env_usize("EVENTS_PER_PRODUCER", 1 << 20) as u64;
    let (producer_base, consumer_cpu) = get_cpu_affinity();

    let queue = Arc::new(
        EventQueue::with_wait_strategy(CAPACITY, STRIDE, WaitStrategy::Spin)
            .expect("queue allocation"),
    );
    let total = events * num_producers as u64;

    println!(
        "queue_bench: {num_producers} producers x {events} events, capacity {CAPACITY}, stride {STRIDE}"
    );

    let start = Instant::now();

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            pin_to_cpu(consumer_cpu);
            let mut sum = 0u64;
            let mut received = 0u64;
            while received < total {
                // SAFETY: this is the only popping thread in the binary.
                match unsafe { queue.pop::<Tick>() } {
                    Some(tick) => {
                        sum += tick.value;
                        received += 1;
                    }
                    None => thread::yield_now(),
                }
            }
            sum
        })
    };

    let producers: Vec<_> = (0..num_producers)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let cpu = producer_base.map(|base| base + p);
            thread::spawn(move || {
                pin_to_cpu(cpu);
                produce(&queue, p, events, p + 1)
            })
        })
        .collect();

    let mut expected = 0u64;
    for p in producers {
        expected += p.join().expect("producer panicked");
    }
    let sum = consumer.join().expect("consumer panicked");
    let elapsed = start.elapsed();

    assert_eq!(sum, expected, "payload checksum mismatch");

    let rate = total as f64 / elapsed.as_secs_f64();
    println!(
        "{} events in {:.3}s: {:.1}M events/s",
        total,
        elapsed.as_secs_f64(),
        rate / 1e6
    );
}
