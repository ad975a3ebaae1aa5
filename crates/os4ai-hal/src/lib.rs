//! Hardware abstraction layer for the sensor hub.
//!
//! Each hardware domain implements [`SensorAdapter`]: a probe that reaches the
//! OS only through the kernel's [`CommandGateway`][os4ai_kernel::CommandGateway],
//! and a deterministic simulation used in cloud mode.  [`ManagedAdapter`]
//! wraps an adapter with its circuit breaker and last good reading, and
//! [`AdapterRegistry`] holds the fixed set of managed adapters.
//!
//! | Module | Contents |
//! |---|---|
//! | [`bluetooth`], [`wifi`], [`thermal`], [`acoustic`], [`emi`] | Probes, parsers, simulations |
//! | [`circuit`] | Closed / open / half-open breaker |
//! | [`managed`] | Poll semantics per mode and circuit state |
//! | [`mode`] | Hardware / simulated switch |
//! | [`registry`] | Registry and gateway assembly |
//! | [`control`] | Bluetooth and wifi control commands |
//! | [`sim`] | Scripted command runner for tests |

pub mod acoustic;
pub mod adapter;
pub mod bluetooth;
pub mod circuit;
pub mod control;
pub mod emi;
pub mod managed;
pub mod mode;
pub mod registry;
pub mod sim;
mod sox;
pub mod thermal;
pub mod wifi;

pub use adapter::{Platform, ProbeContext, SensorAdapter};
pub use circuit::{Admission, CircuitBreaker};
pub use control::{BluetoothAction, DeviceControl};
pub use managed::ManagedAdapter;
pub use mode::{ModeSwitch, OperatingMode};
pub use registry::{AdapterRegistry, RegistryBuilder, builtin_adapter};
pub use sim::ScriptedRunner;
