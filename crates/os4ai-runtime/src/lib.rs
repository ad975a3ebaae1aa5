//! `os4ai-runtime` – the running sensor hub.
//!
//! # Modules
//!
//! - [`cache`] – [`ReadingCache`][cache::ReadingCache]: TTL entries tagged
//!   with the operating mode, with single-flight refresh so concurrent reads
//!   of one sensor cost one hardware probe.
//! - [`scheduler`] – [`PollScheduler`][scheduler::PollScheduler]: one poll
//!   loop per adapter, exponential backoff while a circuit is open, fan-in to
//!   the fusion engine and coordinated shutdown.
//! - [`hub`] – [`SensorHub`][hub::SensorHub]: builds the registry, gateway,
//!   cache, scheduler, fusion engine and hypervisor, and exposes the
//!   snapshot, entity, mode and device-control operations.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP span export.

pub mod cache;
pub mod hub;
pub mod scheduler;
pub mod telemetry;

pub use cache::ReadingCache;
pub use hub::{HubStatus, SensorHub, SensorStatus};
pub use scheduler::{PollScheduler, backoff_delay};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
