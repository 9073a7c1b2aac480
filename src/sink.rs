//! Delivery of snapshots to the presentation layer

use tokio::sync::mpsc;
use tracing::debug;

use crate::snapshot::Snapshot;

/// Receiver side of the pipeline.
///
/// Implementations must not block; the worker calls `deliver` inline.
pub trait SnapshotSink: Send {
    fn deliver(&self, snapshot: Snapshot);
}

impl SnapshotSink for mpsc::UnboundedSender<Snapshot> {
    fn deliver(&self, snapshot: Snapshot) {
        if self.send(snapshot).is_err() {
            debug!("Snapshot consumer is gone, dropping snapshot");
        }
    }
}

impl<F> SnapshotSink for F
where
    F: Fn(Snapshot) + Send,
{
    fn deliver(&self, snapshot: Snapshot) {
        self(snapshot)
    }
}
