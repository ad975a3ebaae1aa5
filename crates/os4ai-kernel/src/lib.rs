//! `os4ai-kernel` – safety boundary and entity orchestration.
//!
//! It does not read sensors itself; it decides what may run and who may see
//! what.
//!
//! # Modules
//!
//! - [`command_schema`] – [`SchemaSet`][command_schema::SchemaSet]: the
//!   allow-list of programs and the argument shapes each accepts (literal
//!   choices, MAC addresses, numeric bounds).
//! - [`command_gateway`] – [`CommandGateway`][command_gateway::CommandGateway]:
//!   the single path to the operating system.  Validates every
//!   [`CommandSpec`][command_gateway::CommandSpec], rate-limits spawns and
//!   kills children that overrun their timeout.
//! - [`allocation`] – [`AllocationTable`][allocation::AllocationTable]: which
//!   sensors each entity may observe, restricted to the adapter registry.
//! - [`hypervisor`] – [`Hypervisor`][hypervisor::Hypervisor]: entity
//!   lifecycle plus one filtered-view subscriber per running entity.

pub mod allocation;
pub mod command_gateway;
pub mod command_schema;
pub mod hypervisor;

pub use allocation::{AllocationTable, resolve_request};
pub use command_gateway::{CommandGateway, CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use command_schema::{ArgPattern, CommandSchema, SchemaSet, is_mac_address};
pub use hypervisor::Hypervisor;
