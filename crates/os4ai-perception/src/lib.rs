//! `os4ai-perception` – turns individual sensor readings into one fused view.
//!
//! # Modules
//!
//! - [`fusion`] – [`FusionEngine`][fusion::FusionEngine]: single writer of the
//!   current [`FusedSnapshot`][os4ai_types::FusedSnapshot]; applies readings,
//!   recomputes dependent metrics and publishes immutable copies.
//! - [`metrics`] – the [`DerivedMetric`][metrics::DerivedMetric] trait, the
//!   bounded per-sensor signal history and the built-in metric set.

pub mod fusion;
pub mod metrics;

pub use fusion::FusionEngine;
pub use metrics::{DerivedMetric, MetricContext, SignalHistory, builtin_metrics};
