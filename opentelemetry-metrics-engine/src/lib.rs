//! An in-process metrics aggregation and collection engine.
//!
//! Applications record numeric measurements tagged with attributes through
//! synchronous instruments, or observe them from callbacks through observable
//! instruments. The engine aggregates them per attribute set and hands
//! point-in-time snapshots to one or more readers, each with its own
//! temporality and aggregation preferences.
//!
//! ## Configuration
//!
//! The configuration is stored with each [SdkMeterProvider]: [View]s,
//! [MetricReader]s such as the [ManualReader], the default histogram
//! boundaries and the default cardinality limit.
//!
//! ### Example
//!
//! ```
//! use opentelemetry::KeyValue;
//! use opentelemetry_metrics_engine::{
//!     InstrumentDescriptor, InstrumentKind, ManualReader, SdkMeterProvider, ValueKind,
//! };
//!
//! let reader = ManualReader::builder().build();
//! let provider = SdkMeterProvider::builder()
//!     .with_reader(reader.clone())
//!     .build();
//!
//! // Use the meter provider to create meter instances
//! let meter = provider.meter("my_app");
//!
//! // Create instruments scoped to the meter
//! let counter = meter
//!     .sync_instrument::<u64>(
//!         InstrumentDescriptor::new("power_consumption", InstrumentKind::Counter, ValueKind::U64)
//!             .with_unit("kWh"),
//!     )
//!     .unwrap();
//!
//! // use instruments to record measurements
//! counter.record(10, &[KeyValue::new("rate", "standard")]);
//!
//! let scopes = reader.collect_scopes().unwrap();
//! assert_eq!(scopes[0].metrics[0].name, "power_consumption");
//!
//! provider.shutdown().unwrap();
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![allow(clippy::needless_doctest_main)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod aggregation;
mod attributes;
pub mod data;
mod diagnostics;
mod error;
mod instrument;
mod instruments;
mod internal;
mod manual_reader;
mod meter;
mod meter_provider;
mod pipeline;
pub mod reader;
mod view;

pub use aggregation::{Aggregation, DEFAULT_HISTOGRAM_BOUNDARIES};
pub use attributes::AttributeSet;
pub use data::Temporality;
pub use diagnostics::DiagnosticsSnapshot;
pub use error::{MetricError, MetricResult};
pub use instrument::{
    Advice, Instrument, InstrumentDescriptor, InstrumentKind, Stream, StreamBuilder, ValueKind,
};
pub use instruments::{
    AsyncInstrument, BoundInstrument, ObservableInstrument, Observer, SyncInstrument,
};
pub use internal::Number;
pub use manual_reader::{ManualReader, ManualReaderBuilder};
pub use meter::{CallbackRegistration, SdkMeter};
pub use meter_provider::{MeterProviderBuilder, SdkMeterProvider, DEFAULT_CARDINALITY_LIMIT};
#[doc(hidden)]
pub use pipeline::Pipeline;
pub use reader::{AggregationSelector, DefaultAggregationSelector, MetricReader};
pub use view::{new_view, InstrumentSelector, View};
