/*
    Measures the throughput of recording into a counter with three attributes
    of ten values each, so 1000 time series.
*/

use lazy_static::lazy_static;
use opentelemetry::KeyValue;
use opentelemetry_metrics_engine::{
    InstrumentDescriptor, InstrumentKind, ManualReader, SdkMeterProvider, SyncInstrument,
    ValueKind,
};
use rand::{
    rngs::{self},
    Rng, SeedableRng,
};
use std::cell::RefCell;

mod throughput;

lazy_static! {
    static ref PROVIDER: SdkMeterProvider = SdkMeterProvider::builder()
        .with_reader(ManualReader::builder().build())
        .build();
    static ref ATTRIBUTE_VALUES: [&'static str; 10] = [
        "value1", "value2", "value3", "value4", "value5", "value6", "value7", "value8", "value9",
        "value10"
    ];
    static ref COUNTER: SyncInstrument<u64> = PROVIDER
        .meter("test")
        .sync_instrument(InstrumentDescriptor::new(
            "hello",
            InstrumentKind::Counter,
            ValueKind::U64
        ))
        .expect("valid counter");
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

fn main() {
    throughput::test_throughput(test_counter);
}

fn test_counter() {
    let len = ATTRIBUTE_VALUES.len();
    let rands = CURRENT_RNG.with(|rng| {
        let mut rng = rng.borrow_mut();
        [
            rng.random_range(0..len),
            rng.random_range(0..len),
            rng.random_range(0..len),
        ]
    });

    COUNTER.record(
        1,
        &[
            KeyValue::new("attribute1", ATTRIBUTE_VALUES[rands[0]]),
            KeyValue::new("attribute2", ATTRIBUTE_VALUES[rands[1]]),
            KeyValue::new("attribute3", ATTRIBUTE_VALUES[rands[2]]),
        ],
    );
}
