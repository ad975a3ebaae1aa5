//! Latest-value-wins distribution of fused snapshots.
//!
//! Built on [`tokio::sync::watch`]: publishing replaces the held value and
//! never blocks, and a slow subscriber only ever sees the newest snapshot
//! when it next looks.  Snapshots travel as `Arc<FusedSnapshot>` so readers
//! share the immutable value instead of copying it.

use std::sync::Arc;

use os4ai_types::FusedSnapshot;
use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct SnapshotChannel {
    tx: Arc<watch::Sender<Arc<FusedSnapshot>>>,
}

impl SnapshotChannel {
    /// New channel holding an empty snapshot.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(FusedSnapshot::empty()));
        Self { tx: Arc::new(tx) }
    }

    /// Swap in `snapshot` as the current value.  Succeeds with or without
    /// subscribers.
    pub fn publish(&self, snapshot: Arc<FusedSnapshot>) {
        self.tx.send_replace(snapshot);
    }

    pub fn current(&self) -> Arc<FusedSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        SnapshotReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for SnapshotChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Push-side handle on the snapshot stream.
#[derive(Clone, Debug)]
pub struct SnapshotReceiver {
    rx: watch::Receiver<Arc<FusedSnapshot>>,
}

impl SnapshotReceiver {
    /// Wait for a snapshot newer than the last one seen.
    ///
    /// Returns `None` once the channel has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<FusedSnapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// The newest snapshot, marking it seen.
    pub fn latest(&mut self) -> Arc<FusedSnapshot> {
        self.rx.borrow_and_update().clone()
    }
}
