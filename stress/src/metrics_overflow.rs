/*
    Records into an unbounded number of attribute sets. Memory must stay flat
    once the cardinality limit is reached and every later set lands in the
    overflow series.
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
    let rand = CURRENT_RNG.with(|rng| rng.borrow_mut().random_range(0..100_000_000i64));
    COUNTER.record(1, &[KeyValue::new("A", rand)]);
}
