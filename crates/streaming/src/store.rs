use std::sync::Arc;

use tokio::sync::watch;

use crate::target::Snapshot;

/// Holds the latest snapshot for rendering.
///
/// Each `apply` replaces the held snapshot wholesale; there is no merge.
/// Renderers either poll `current()` or wait on a `subscribe()` receiver.
/// Cloning the store yields another handle to the same snapshot.
#[derive(Debug, Clone)]
pub struct TargetStore {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl TargetStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Snapshot::default()));
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the held snapshot and returns its revision.
    pub fn apply(&self, mut snapshot: Snapshot) -> u64 {
        let mut revision = 0;
        self.tx.send_modify(|current| {
            revision = current.revision + 1;
            snapshot.revision = revision;
            *current = Arc::new(snapshot);
        });
        revision
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.tx.borrow().revision
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }
}

impl Default for TargetStore {
    fn default() -> Self {
        Self::new()
    }
}
