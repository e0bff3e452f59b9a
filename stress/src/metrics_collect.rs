/*
    Measures histogram recording while a separate thread keeps collecting, to
    show that collection does not stop recording threads.

    Run with `delta` as the first argument to collect with delta temporality.
*/

use std::{
    cell::RefCell,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

use lazy_static::lazy_static;
use opentelemetry::KeyValue;
use opentelemetry_metrics_engine::{
    InstrumentDescriptor, InstrumentKind, ManualReader, SdkMeterProvider, SyncInstrument,
    Temporality, ValueKind,
};
use rand::{
    rngs::{self},
    Rng, SeedableRng,
};

mod throughput;

lazy_static! {
    static ref READER: ManualReader = ManualReader::builder()
        .with_temporality(temporality_from_args())
        .build();
    static ref PROVIDER: SdkMeterProvider = SdkMeterProvider::builder()
        .with_reader(READER.clone())
        .build();
    static ref HISTOGRAM: SyncInstrument<u64> = PROVIDER
        .meter("test")
        .sync_instrument(InstrumentDescriptor::new(
            "hello",
            InstrumentKind::Histogram,
            ValueKind::U64
        ))
        .expect("valid histogram");
    static ref ATTRIBUTE_VALUES: [&'static str; 10] = [
        "value1", "value2", "value3", "value4", "value5", "value6", "value7", "value8", "value9",
        "value10"
    ];
}

static COLLECTIONS: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

fn temporality_from_args() -> Temporality {
    match std::env::args().nth(1).as_deref() {
        Some("delta") => Temporality::Delta,
        _ => Temporality::Cumulative,
    }
}

fn main() {
    println!("Collecting with {:?} temporality", temporality_from_args());
    thread::spawn(|| loop {
        let start = Instant::now();
        match READER.collect_scopes() {
            Ok(scopes) => {
                let count = COLLECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 100 == 0 {
                    println!(
                        "Collection {count} took {:?}, {} scopes",
                        start.elapsed(),
                        scopes.len()
                    );
                }
            }
            Err(err) => {
                println!("Collection failed: {err}");
                return;
            }
        }
        thread::sleep(Duration::from_millis(10));
    });
    throughput::test_throughput(test_histogram);
}

fn test_histogram() {
    let len = ATTRIBUTE_VALUES.len();
    let (rands, value) = CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        (
            [rng.random_range(0..len), rng.random_range(0..len)],
            rng.random_range(0..1000u64),
        )
    });
    HISTOGRAM.record(
        value,
        &[
            KeyValue::new("attribute1", ATTRIBUTE_VALUES[rands[0]]),
            KeyValue::new("attribute2", ATTRIBUTE_VALUES[rands[1]]),
        ],
    );
}
