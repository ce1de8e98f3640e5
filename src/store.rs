use crate::snapshot::Snapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
}

impl SnapshotStore {
    pub fn new(placeholder: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(placeholder)),
        }
    }

    pub async fn get(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    pub async fn publish(&self, mut snapshot: Snapshot) -> Arc<Snapshot> {
        let mut guard = self.current.write().await;
        if guard.cycle > 0 {
            snapshot.derive_rates(&guard);
        }
        let next = Arc::new(snapshot);
        *guard = next.clone();
        next
    }
}
