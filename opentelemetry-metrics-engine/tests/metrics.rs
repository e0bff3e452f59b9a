use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use opentelemetry::{Key, KeyValue};
use opentelemetry_metrics_engine::data::{
    AggregatedMetrics, Histogram, Metric, MetricData, ScopeMetrics, Sum,
};
use opentelemetry_metrics_engine::{
    new_view, Aggregation, AsyncInstrument, InstrumentDescriptor, InstrumentKind,
    InstrumentSelector, ManualReader, MetricError, Observer, SdkMeter, SdkMeterProvider, Stream,
    Temporality, ValueKind,
};
use rand::Rng;
use rstest::rstest;

fn setup(reader: &ManualReader) -> (SdkMeterProvider, SdkMeter) {
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .build();
    let meter = provider.meter("test");
    (provider, meter)
}

fn collect(reader: &ManualReader) -> Vec<ScopeMetrics> {
    reader.collect_scopes().expect("collection succeeds")
}

fn metrics_named<'a>(scopes: &'a [ScopeMetrics], name: &str) -> Vec<&'a Metric> {
    scopes
        .iter()
        .flat_map(|scope| scope.metrics.iter())
        .filter(|metric| metric.name == name)
        .collect()
}

fn u64_sum<'a>(scopes: &'a [ScopeMetrics], name: &str) -> &'a Sum<u64> {
    let metrics = metrics_named(scopes, name);
    assert_eq!(metrics.len(), 1, "one stream named {name}");
    match &metrics[0].data {
        AggregatedMetrics::U64(MetricData::Sum(sum)) => sum,
        other => panic!("expected a u64 sum, got {other:?}"),
    }
}

fn f64_histogram<'a>(scopes: &'a [ScopeMetrics], name: &str) -> &'a Histogram<f64> {
    let metrics = metrics_named(scopes, name);
    assert_eq!(metrics.len(), 1, "one stream named {name}");
    match &metrics[0].data {
        AggregatedMetrics::F64(MetricData::Histogram(h)) => h,
        other => panic!("expected a f64 histogram, got {other:?}"),
    }
}

fn total(sum: &Sum<u64>) -> u64 {
    sum.data_points.iter().map(|p| p.value).sum()
}

fn counter(name: &'static str) -> InstrumentDescriptor {
    InstrumentDescriptor::new(name, InstrumentKind::Counter, ValueKind::U64)
}

fn observable_counter(name: &'static str) -> InstrumentDescriptor {
    InstrumentDescriptor::new(name, InstrumentKind::ObservableCounter, ValueKind::U64)
}

#[rstest]
#[case(Temporality::Cumulative, 75)]
#[case(Temporality::Delta, 5)]
fn counter_aggregation(#[case] temporality: Temporality, #[case] second: u64) {
    let reader = ManualReader::builder().with_temporality(temporality).build();
    let (_provider, meter) = setup(&reader);
    let requests = meter.sync_instrument::<u64>(counter("requests")).unwrap();

    requests.record(50, &[KeyValue::new("key1", "value1")]);
    requests.record(20, &[KeyValue::new("key1", "value1")]);
    let scopes = collect(&reader);
    let sum = u64_sum(&scopes, "requests");
    assert_eq!(sum.temporality, temporality);
    assert!(sum.is_monotonic);
    assert_eq!(total(sum), 70);

    requests.record(5, &[KeyValue::new("key1", "value1")]);
    let scopes = collect(&reader);
    assert_eq!(total(u64_sum(&scopes, "requests")), second);
}

#[rstest]
#[case(InstrumentKind::Counter, Temporality::Delta)]
#[case(InstrumentKind::Histogram, Temporality::Delta)]
#[case(InstrumentKind::UpDownCounter, Temporality::Cumulative)]
#[case(InstrumentKind::ObservableCounter, Temporality::Cumulative)]
fn low_memory_temporality_per_kind(#[case] kind: InstrumentKind, #[case] expected: Temporality) {
    let reader = ManualReader::builder()
        .with_temporality(Temporality::LowMemory)
        .with_aggregation_selector(|_: InstrumentKind| Aggregation::Sum)
        .build();
    let (_provider, meter) = setup(&reader);
    let desc = InstrumentDescriptor::new("value", kind, ValueKind::I64);
    if kind.is_observable() {
        let inst = meter.observable_instrument::<i64>(desc).unwrap();
        meter
            .register_callback(&inst, |obs| obs.observe(1, &[]))
            .unwrap();
    } else {
        meter.sync_instrument::<i64>(desc).unwrap().record(1, &[]);
    }

    let scopes = collect(&reader);
    match &metrics_named(&scopes, "value")[0].data {
        AggregatedMetrics::I64(MetricData::Sum(sum)) => assert_eq!(sum.temporality, expected),
        other => panic!("expected an i64 sum, got {other:?}"),
    }
}

#[test]
fn delta_start_time_follows_previous_collection() {
    let reader = ManualReader::builder()
        .with_temporality(Temporality::Delta)
        .build();
    let (_provider, meter) = setup(&reader);
    let requests = meter.sync_instrument::<u64>(counter("requests")).unwrap();

    requests.record(1, &[]);
    let first = collect(&reader);
    requests.record(1, &[]);
    let second = collect(&reader);
    assert_eq!(
        u64_sum(&second, "requests").start_time,
        u64_sum(&first, "requests").time
    );
}

#[test]
fn idle_delta_streams_are_omitted() {
    let reader = ManualReader::builder()
        .with_temporality(Temporality::Delta)
        .build();
    let (_provider, meter) = setup(&reader);
    let requests = meter.sync_instrument::<u64>(counter("requests")).unwrap();

    requests.record(1, &[]);
    assert_eq!(collect(&reader).len(), 1);
    assert!(collect(&reader).is_empty());
}

#[test]
fn sum_of_deltas_equals_cumulative() {
    let delta = ManualReader::builder()
        .with_temporality(Temporality::Delta)
        .build();
    let cumulative = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder()
        .with_reader(delta.clone())
        .with_reader(cumulative.clone())
        .build();
    let requests = provider
        .meter("test")
        .sync_instrument::<u64>(counter("requests"))
        .unwrap();

    let mut rng = rand::rng();
    let mut summed: HashMap<String, u64> = HashMap::new();
    for _ in 0..20 {
        for _ in 0..rng.random_range(0..50) {
            let key = rng.random_range(0..3i64);
            requests.record(rng.random_range(0..100u64), &[KeyValue::new("k", key)]);
        }
        if let Some(metric) = metrics_named(&collect(&delta), "requests").first() {
            if let AggregatedMetrics::U64(MetricData::Sum(sum)) = &metric.data {
                for point in &sum.data_points {
                    *summed.entry(format!("{:?}", point.attributes)).or_default() += point.value;
                }
            }
        }
    }

    let scopes = collect(&cumulative);
    let cumulative_points: HashMap<String, u64> = u64_sum(&scopes, "requests")
        .data_points
        .iter()
        .map(|p| (format!("{:?}", p.attributes), p.value))
        .collect();
    assert_eq!(summed, cumulative_points);
}

#[test]
fn bound_handles_are_stable_across_collections() {
    let reader = ManualReader::builder()
        .with_temporality(Temporality::Delta)
        .build();
    let (_provider, meter) = setup(&reader);
    let requests = meter.sync_instrument::<u64>(counter("requests")).unwrap();
    let attrs = [KeyValue::new("route", "/"), KeyValue::new("code", 200i64)];

    let bound = requests.bind(&attrs);
    assert_eq!(bound, requests.bind(&[attrs[1].clone(), attrs[0].clone()]));

    bound.record(3);
    requests.record(4, &attrs);
    assert_eq!(total(u64_sum(&collect(&reader), "requests")), 7);

    // nothing recorded, the bound slot must survive
    assert!(collect(&reader).is_empty());
    assert_eq!(bound, requests.bind(&attrs));

    bound.record(2);
    let scopes = collect(&reader);
    let sum = u64_sum(&scopes, "requests");
    assert_eq!(sum.data_points.len(), 1);
    assert_eq!(sum.data_points[0].value, 2);
}

#[test]
fn histogram_is_independent_of_record_order() {
    let reader = ManualReader::default();
    let (_provider, meter) = setup(&reader);
    let desc = |name: &'static str| InstrumentDescriptor::new(name, InstrumentKind::Histogram, ValueKind::F64);
    let forward = meter.sync_instrument::<f64>(desc("forward")).unwrap();
    let backward = meter.sync_instrument::<f64>(desc("backward")).unwrap();

    let mut rng = rand::rng();
    let values: Vec<f64> = (0..500).map(|_| rng.random_range(0..20_000u32) as f64).collect();
    for v in &values {
        forward.record(*v, &[]);
    }
    for v in values.iter().rev() {
        backward.record(*v, &[]);
    }

    let scopes = collect(&reader);
    let a = &f64_histogram(&scopes, "forward").data_points[0];
    let b = &f64_histogram(&scopes, "backward").data_points[0];
    assert_eq!(a.bucket_counts, b.bucket_counts);
    assert_eq!((a.count, a.sum, a.min, a.max), (b.count, b.sum, b.min, b.max));
}

#[test]
fn concurrent_writers_lose_no_updates() {
    const THREADS: usize = 8;
    const RECORDS: usize = 10_000;

    let reader = ManualReader::builder()
        .with_temporality(Temporality::Delta)
        .build();
    let (_provider, meter) = setup(&reader);
    let requests = meter.sync_instrument::<u64>(counter("requests")).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let collector = {
        let reader = reader.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut seen = 0;
            loop {
                let finished = done.load(Ordering::SeqCst);
                if let Some(metric) = metrics_named(&collect(&reader), "requests").first() {
                    if let AggregatedMetrics::U64(MetricData::Sum(sum)) = &metric.data {
                        seen += sum.data_points.iter().map(|p| p.value).sum::<u64>();
                    }
                }
                if finished {
                    return seen;
                }
            }
        })
    };

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let requests = requests.clone();
            thread::spawn(move || {
                let bound = requests.bind(&[KeyValue::new("thread", (t % 2) as i64)]);
                for i in 0..RECORDS {
                    if i % 2 == 0 {
                        bound.record(1);
                    } else {
                        requests.record(1, &[KeyValue::new("shard", (i % 4) as i64)]);
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);

    assert_eq!(collector.join().unwrap(), (THREADS * RECORDS) as u64);
}

#[test]
fn conflicting_definitions_emit_both_streams_and_warn_once() {
    let reader = ManualReader::default();
    let (provider, meter) = setup(&reader);
    let a = meter
        .sync_instrument::<u64>(counter("requests").with_description("a"))
        .unwrap();
    let b = meter
        .sync_instrument::<u64>(counter("requests").with_description("b"))
        .unwrap();
    // an identical definition is not a new conflict
    let a_again = meter
        .sync_instrument::<u64>(counter("requests").with_description("a"))
        .unwrap();

    a.record(1, &[]);
    a_again.record(1, &[]);
    b.record(5, &[]);
    let scopes = collect(&reader);
    let streams = metrics_named(&scopes, "requests");
    assert_eq!(streams.len(), 2);
    assert_eq!(provider.diagnostics().duplicate_definitions, 1);

    let by_description: HashMap<String, u64> = streams
        .iter()
        .map(|m| match &m.data {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => (m.description.to_string(), total(sum)),
            other => panic!("expected a sum, got {other:?}"),
        })
        .collect();
    assert_eq!(by_description["a"], 2);
    assert_eq!(by_description["b"], 5);
}

#[test]
fn names_differing_only_in_case_are_distinct_streams_that_conflict() {
    let reader = ManualReader::default();
    let (provider, meter) = setup(&reader);
    meter
        .sync_instrument::<u64>(counter("Requests"))
        .unwrap()
        .record(1, &[]);
    meter
        .sync_instrument::<u64>(counter("requests"))
        .unwrap()
        .record(2, &[]);

    let scopes = collect(&reader);
    assert_eq!(total(u64_sum(&scopes, "Requests")), 1);
    assert_eq!(total(u64_sum(&scopes, "requests")), 2);
    assert_eq!(provider.diagnostics().duplicate_definitions, 1);
}

#[test]
fn renaming_two_instruments_to_one_name_conflicts() {
    let reader = ManualReader::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(
            new_view(
                InstrumentSelector::default().with_name_pattern("req_.*").unwrap(),
                Stream::builder().with_name("requests").build().unwrap(),
            )
            .unwrap(),
        )
        .build();
    let meter = provider.meter("m");
    meter
        .sync_instrument::<u64>(counter("req_a"))
        .unwrap()
        .record(1, &[]);
    meter
        .sync_instrument::<u64>(counter("req_b"))
        .unwrap()
        .record(100, &[]);

    let scopes = collect(&reader);
    let mut totals: Vec<u64> = metrics_named(&scopes, "requests")
        .iter()
        .map(|m| match &m.data {
            AggregatedMetrics::U64(MetricData::Sum(sum)) => total(sum),
            other => panic!("expected a sum, got {other:?}"),
        })
        .collect();
    totals.sort_unstable();
    assert_eq!(totals, vec![1, 100]);
    assert_eq!(provider.diagnostics().duplicate_definitions, 1);
}

#[test]
fn counter_totals_wrap_instead_of_panicking() {
    let reader = ManualReader::default();
    let (_provider, meter) = setup(&reader);
    let requests = meter.sync_instrument::<u64>(counter("requests")).unwrap();
    requests.record(u64::MAX, &[]);
    requests.record(1, &[]);

    let scopes = collect(&reader);
    assert_eq!(total(u64_sum(&scopes, "requests")), 0);
}

#[test]
fn explicit_bucket_boundaries_are_upper_inclusive() {
    let reader = ManualReader::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(
            new_view(
                InstrumentSelector::default().with_name("latency"),
                Stream::builder()
                    .with_aggregation(Aggregation::ExplicitBucketHistogram {
                        boundaries: vec![10.0, 25.0, 50.0],
                        record_min_max: true,
                    })
                    .build()
                    .unwrap(),
            )
            .unwrap(),
        )
        .build();
    let latency = provider
        .meter("test")
        .sync_instrument::<f64>(InstrumentDescriptor::new(
            "latency",
            InstrumentKind::Histogram,
            ValueKind::F64,
        ))
        .unwrap();
    for v in [5.0, 15.0, 25.0, 35.0] {
        latency.record(v, &[]);
    }

    let scopes = collect(&reader);
    let dp = &f64_histogram(&scopes, "latency").data_points[0];
    assert_eq!(dp.bounds, vec![10.0, 25.0, 50.0]);
    assert_eq!(dp.bucket_counts, vec![1, 2, 1, 0]);
    assert_eq!(dp.count, 4);
    assert_eq!(dp.sum, 80.0);
    assert_eq!(dp.min, Some(5.0));
    assert_eq!(dp.max, Some(35.0));
}

#[test]
fn advice_boundaries_apply_without_a_view() {
    let reader = ManualReader::default();
    let (_provider, meter) = setup(&reader);
    let latency = meter
        .sync_instrument::<f64>(
            InstrumentDescriptor::new("latency", InstrumentKind::Histogram, ValueKind::F64)
                .with_advice(
                    opentelemetry_metrics_engine::Advice::default()
                        .with_explicit_bucket_boundaries(vec![1.0, 2.0]),
                ),
        )
        .unwrap();
    latency.record(1.5, &[]);

    let scopes = collect(&reader);
    let dp = &f64_histogram(&scopes, "latency").data_points[0];
    assert_eq!(dp.bucket_counts, vec![0, 1, 0]);
}

#[test]
fn negative_increments_are_discarded() {
    let reader = ManualReader::default();
    let (provider, meter) = setup(&reader);
    let requests = meter
        .sync_instrument::<i64>(InstrumentDescriptor::new(
            "requests",
            InstrumentKind::Counter,
            ValueKind::I64,
        ))
        .unwrap();
    requests.record(10, &[]);
    requests.record(-3, &[]);

    let scopes = collect(&reader);
    match &metrics_named(&scopes, "requests")[0].data {
        AggregatedMetrics::I64(MetricData::Sum(sum)) => assert_eq!(sum.data_points[0].value, 10),
        other => panic!("expected an i64 sum, got {other:?}"),
    }
    assert_eq!(provider.diagnostics().invalid_measurements, 1);
}

#[test]
fn gauge_ignores_nan() {
    let reader = ManualReader::default();
    let (_provider, meter) = setup(&reader);
    let temperature = meter
        .sync_instrument::<f64>(InstrumentDescriptor::new(
            "temperature",
            InstrumentKind::Gauge,
            ValueKind::F64,
        ))
        .unwrap();
    temperature.record(1.0, &[]);
    temperature.record(f64::NAN, &[]);
    temperature.record(3.0, &[]);
    temperature.record(f64::NAN, &[]);

    let scopes = collect(&reader);
    match &metrics_named(&scopes, "temperature")[0].data {
        AggregatedMetrics::F64(MetricData::Gauge(gauge)) => {
            assert_eq!(gauge.data_points[0].value, 3.0)
        }
        other => panic!("expected a gauge, got {other:?}"),
    }
}

#[test]
fn callback_runs_once_per_collection_for_all_streams() {
    let reader = ManualReader::default();
    let rename = |name: &'static str| {
        new_view(
            InstrumentSelector::default().with_name("jobs"),
            Stream::builder().with_name(name).build().unwrap(),
        )
        .unwrap()
    };
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(rename("jobs.a"))
        .with_view(rename("jobs.b"))
        .build();
    let meter = provider.meter("test");
    let jobs = meter
        .observable_instrument::<u64>(observable_counter("jobs"))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    meter
        .register_callback(&jobs, move |obs| {
            counted.fetch_add(1, Ordering::SeqCst);
            obs.observe(10, &[]);
        })
        .unwrap();

    let scopes = collect(&reader);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(total(u64_sum(&scopes, "jobs.a")), 10);
    assert_eq!(total(u64_sum(&scopes, "jobs.b")), 10);
}

#[test]
fn each_reader_runs_callbacks_on_its_own_collection() {
    let first = ManualReader::default();
    let second = ManualReader::builder()
        .with_temporality(Temporality::Delta)
        .build();
    let provider = SdkMeterProvider::builder()
        .with_reader(first.clone())
        .with_reader(second.clone())
        .build();
    let meter = provider.meter("test");
    let jobs = meter
        .observable_instrument::<u64>(observable_counter("jobs"))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    meter
        .register_callback(&jobs, move |obs| {
            let n = counted.fetch_add(1, Ordering::SeqCst) as u64;
            obs.observe(10 * (n + 1), &[]);
        })
        .unwrap();

    assert_eq!(total(u64_sum(&collect(&first), "jobs")), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // the delta reader has not seen anything yet, so it reports the full total
    assert_eq!(total(u64_sum(&collect(&second), "jobs")), 20);
    assert_eq!(total(u64_sum(&collect(&second), "jobs")), 10);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn attribute_filter_keeps_allowed_keys() {
    let reader = ManualReader::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(
            new_view(
                InstrumentSelector::default().with_name("requests"),
                Stream::builder()
                    .with_allowed_attribute_keys([Key::new("k2"), Key::new("k3")])
                    .build()
                    .unwrap(),
            )
            .unwrap(),
        )
        .build();
    let requests = provider
        .meter("test")
        .sync_instrument::<u64>(counter("requests"))
        .unwrap();
    requests.record(
        1,
        &[
            KeyValue::new("k1", "a"),
            KeyValue::new("k2", "b"),
            KeyValue::new("k3", "c"),
        ],
    );
    requests.record(
        2,
        &[
            KeyValue::new("k1", "x"),
            KeyValue::new("k2", "b"),
            KeyValue::new("k3", "c"),
        ],
    );

    let scopes = collect(&reader);
    let sum = u64_sum(&scopes, "requests");
    assert_eq!(sum.data_points.len(), 1);
    assert_eq!(
        sum.data_points[0].attributes,
        vec![KeyValue::new("k2", "b"), KeyValue::new("k3", "c")]
    );
    assert_eq!(sum.data_points[0].value, 3);
}

#[test]
fn reader_aggregation_takes_precedence_over_views() {
    let reader = ManualReader::builder()
        .with_aggregation_selector(|kind: InstrumentKind| match kind {
            InstrumentKind::Histogram => Aggregation::Summary,
            _ => Aggregation::Default,
        })
        .build();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(
            new_view(
                InstrumentSelector::default().with_kind(InstrumentKind::Histogram),
                Stream::builder()
                    .with_aggregation(Aggregation::Sum)
                    .build()
                    .unwrap(),
            )
            .unwrap(),
        )
        .build();
    let latency = provider
        .meter("test")
        .sync_instrument::<f64>(InstrumentDescriptor::new(
            "latency",
            InstrumentKind::Histogram,
            ValueKind::F64,
        ))
        .unwrap();
    latency.record(3.0, &[]);
    latency.record(5.0, &[]);

    let scopes = collect(&reader);
    match &metrics_named(&scopes, "latency")[0].data {
        AggregatedMetrics::F64(MetricData::Summary(summary)) => {
            let dp = &summary.data_points[0];
            assert_eq!((dp.count, dp.sum, dp.min, dp.max), (2, 8.0, 3.0, 5.0));
        }
        other => panic!("expected a summary, got {other:?}"),
    }
}

#[test]
fn exponential_histogram_from_reader_selector() {
    let reader = ManualReader::builder()
        .with_aggregation_selector(|kind: InstrumentKind| match kind {
            InstrumentKind::Histogram => Aggregation::base2_exponential_histogram(),
            _ => Aggregation::Default,
        })
        .build();
    let (_provider, meter) = setup(&reader);
    let sizes = meter
        .sync_instrument::<f64>(InstrumentDescriptor::new(
            "sizes",
            InstrumentKind::Histogram,
            ValueKind::F64,
        ))
        .unwrap();
    for v in [0.0, 1.0, 2.0, 4.0, -8.0, f64::INFINITY] {
        sizes.record(v, &[]);
    }

    let scopes = collect(&reader);
    match &metrics_named(&scopes, "sizes")[0].data {
        AggregatedMetrics::F64(MetricData::ExponentialHistogram(h)) => {
            let dp = &h.data_points[0];
            assert_eq!(dp.count, 5);
            assert_eq!(dp.zero_count, 1);
            assert_eq!(dp.positive_bucket.counts.iter().sum::<u64>(), 3);
            assert_eq!(dp.negative_bucket.counts.iter().sum::<u64>(), 1);
            assert_eq!(dp.min, Some(-8.0));
            assert_eq!(dp.max, Some(4.0));
            assert!(dp.positive_bucket.counts.len() <= 160);
        }
        other => panic!("expected an exponential histogram, got {other:?}"),
    }
}

#[test]
fn unregistered_callback_no_longer_runs() {
    let reader = ManualReader::default();
    let (_provider, meter) = setup(&reader);
    let jobs = meter
        .observable_instrument::<u64>(observable_counter("jobs"))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let mut registration = meter
        .register_callback(&jobs, move |obs| {
            counted.fetch_add(1, Ordering::SeqCst);
            obs.observe(1, &[]);
        })
        .unwrap();

    assert_eq!(collect(&reader).len(), 1);
    registration.unregister().unwrap();
    registration.unregister().unwrap();
    assert!(collect(&reader).is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_turns_recording_into_no_ops() {
    let reader = ManualReader::default();
    let (provider, meter) = setup(&reader);
    let requests = meter.sync_instrument::<u64>(counter("requests")).unwrap();
    let bound = requests.bind(&[KeyValue::new("k", "v")]);
    let jobs = meter
        .observable_instrument::<u64>(observable_counter("jobs"))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    meter
        .register_callback(&jobs, move |obs| {
            counted.fetch_add(1, Ordering::SeqCst);
            obs.observe(1, &[]);
        })
        .unwrap();

    requests.record(5, &[]);
    provider.shutdown().unwrap();
    requests.record(7, &[]);
    bound.record(7);

    let scopes = collect(&reader);
    assert_eq!(total(u64_sum(&scopes, "requests")), 5);
    assert!(metrics_named(&scopes, "jobs").is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(provider.diagnostics().dropped_measurements, 0);
    assert!(matches!(provider.shutdown(), Err(MetricError::AlreadyShutdown)));
}

#[test]
fn panicking_callback_is_isolated() {
    let reader = ManualReader::default();
    let (provider, meter) = setup(&reader);
    let failing = meter
        .observable_instrument::<u64>(observable_counter("failing"))
        .unwrap();
    let healthy = meter
        .observable_instrument::<u64>(observable_counter("healthy"))
        .unwrap();
    meter
        .register_callback(&failing, |obs| {
            obs.observe(1, &[]);
            panic!("callback failure");
        })
        .unwrap();
    meter
        .register_callback(&healthy, |obs| obs.observe(2, &[]))
        .unwrap();

    let scopes = collect(&reader);
    assert!(metrics_named(&scopes, "failing").is_empty());
    assert_eq!(total(u64_sum(&scopes, "healthy")), 2);
    assert_eq!(provider.diagnostics().callback_failures, 1);
}

struct ForeignGauge;

impl AsyncInstrument<u64> for ForeignGauge {
    fn observe(&self, _measurement: u64, _attributes: &[KeyValue]) {}

    fn as_any(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::new(())
    }
}

#[test]
fn foreign_handles_are_rejected() {
    let reader = ManualReader::default();
    let (provider, meter) = setup(&reader);
    let jobs = meter
        .observable_instrument::<u64>(observable_counter("jobs"))
        .unwrap();

    assert!(meter
        .register_batch_callback(&[ForeignGauge.as_any()], |_| {})
        .is_err());

    meter
        .register_batch_callback(&[jobs.as_any()], move |observer| {
            observer.observe_u64(&ForeignGauge, 5, &[]);
            observer.observe_u64(&jobs, 3, &[]);
        })
        .unwrap();
    let scopes = collect(&reader);
    assert_eq!(total(u64_sum(&scopes, "jobs")), 3);
    assert_eq!(provider.diagnostics().dropped_measurements, 1);
}

#[test]
fn observations_for_other_meters_are_dropped() {
    let reader = ManualReader::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .build();
    let a = provider.meter("a");
    let b = provider.meter("b");
    let mine = a.observable_instrument::<u64>(observable_counter("mine")).unwrap();
    let theirs = b.observable_instrument::<u64>(observable_counter("theirs")).unwrap();
    let unregistered = a
        .observable_instrument::<u64>(observable_counter("unregistered"))
        .unwrap();

    a.register_batch_callback(&[mine.as_any()], move |observer| {
        observer.observe_u64(&mine, 1, &[]);
        observer.observe_u64(&theirs, 1, &[]);
        observer.observe_u64(&unregistered, 1, &[]);
    })
    .unwrap();

    let scopes = collect(&reader);
    assert_eq!(total(u64_sum(&scopes, "mine")), 1);
    assert!(metrics_named(&scopes, "theirs").is_empty());
    assert!(metrics_named(&scopes, "unregistered").is_empty());
    assert_eq!(provider.diagnostics().dropped_measurements, 2);
}

#[test]
fn observing_outside_a_callback_is_dropped() {
    let reader = ManualReader::default();
    let (provider, meter) = setup(&reader);
    let jobs = meter
        .observable_instrument::<u64>(observable_counter("jobs"))
        .unwrap();

    jobs.observe(5, &[]);
    assert!(collect(&reader).is_empty());
    assert_eq!(provider.diagnostics().dropped_measurements, 1);
}

#[test]
fn cardinality_limit_overflows_new_attribute_sets() {
    let reader = ManualReader::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(
            new_view(
                InstrumentSelector::default().with_name("requests"),
                Stream::builder().with_cardinality_limit(3).build().unwrap(),
            )
            .unwrap(),
        )
        .build();
    let requests = provider
        .meter("test")
        .sync_instrument::<u64>(counter("requests"))
        .unwrap();
    for user in 0..5i64 {
        requests.record(1, &[KeyValue::new("user", user)]);
    }

    let scopes = collect(&reader);
    let sum = u64_sum(&scopes, "requests");
    assert_eq!(sum.data_points.len(), 3);
    let overflow = sum
        .data_points
        .iter()
        .find(|p| p.attributes == vec![KeyValue::new("otel.metric.overflow", true)])
        .expect("overflow series");
    assert_eq!(overflow.value, 3);
    assert_eq!(total(sum), 5);
}

#[test]
fn drop_view_removes_only_matching_streams() {
    let reader = ManualReader::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(
            new_view(
                InstrumentSelector::default().with_name_pattern("debug\\..*").unwrap(),
                Stream::builder()
                    .with_aggregation(Aggregation::Drop)
                    .build()
                    .unwrap(),
            )
            .unwrap(),
        )
        .build();
    let meter = provider.meter("test");
    meter
        .sync_instrument::<u64>(counter("debug.requests"))
        .unwrap()
        .record(1, &[]);
    meter
        .sync_instrument::<u64>(counter("requests"))
        .unwrap()
        .record(1, &[]);

    let scopes = collect(&reader);
    assert!(metrics_named(&scopes, "debug.requests").is_empty());
    assert_eq!(total(u64_sum(&scopes, "requests")), 1);
}

#[test]
fn invalid_setup_is_reported_synchronously() {
    assert!(matches!(
        InstrumentSelector::default().with_name_pattern("("),
        Err(MetricError::Config(_))
    ));
    assert!(Stream::builder().with_name("").build().is_err());
    assert!(Stream::builder().with_cardinality_limit(0).build().is_err());
    assert!(Stream::builder()
        .with_aggregation(Aggregation::Base2ExponentialHistogram {
            max_size: 160,
            max_scale: 21,
            record_min_max: true,
        })
        .build()
        .is_err());
    assert!(Stream::builder()
        .with_aggregation(Aggregation::ExplicitBucketHistogram {
            boundaries: vec![5.0, 1.0],
            record_min_max: false,
        })
        .build()
        .is_err());
}

#[test]
fn meters_group_streams_by_scope() {
    let reader = ManualReader::default();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader.clone())
        .build();
    for name in ["first", "second"] {
        provider
            .meter(name)
            .sync_instrument::<u64>(counter("requests"))
            .unwrap()
            .record(1, &[]);
    }

    let scopes = collect(&reader);
    let names: Vec<&str> = scopes.iter().map(|s| s.scope.name()).collect();
    assert_eq!(names, vec!["first", "second"]);
    // different meters never conflict
    assert_eq!(provider.diagnostics().duplicate_definitions, 0);
}
