//! `os4ai-middleware` – moves fused state and system events between the
//! hub's components without interpreting them.
//!
//! # Modules
//!
//! - [`bus`] – topic-partitioned broadcast bus for [`os4ai_types::Event`]s.
//! - [`snapshot_channel`] – latest-value-wins channel of fused snapshots.

pub mod bus;
pub mod snapshot_channel;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use snapshot_channel::{SnapshotChannel, SnapshotReceiver};
