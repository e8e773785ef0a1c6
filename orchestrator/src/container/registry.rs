//! In-memory registry of managed containers

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::models::ContainerRecord;

/// One registry entry: the record plus its lifecycle lock
#[derive(Debug)]
pub struct ManagedContainer {
    record: RwLock<ContainerRecord>,

    /// Serializes start/stop/destroy. Commands never take it.
    lifecycle: Mutex<()>,
}

impl ManagedContainer {
    fn new(record: ContainerRecord) -> Self {
        Self {
            record: RwLock::new(record),
            lifecycle: Mutex::new(()),
        }
    }

    /// Snapshot of the current record
    pub async fn record(&self) -> ContainerRecord {
        self.record.read().await.clone()
    }

    /// Mutate the record in place and return the updated copy
    pub async fn update<F>(&self, f: F) -> ContainerRecord
    where
        F: FnOnce(&mut ContainerRecord),
    {
        let mut record = self.record.write().await;
        f(&mut record);
        record.clone()
    }

    /// Lock out other lifecycle changes on this container
    pub async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }
}

pub type ContainerHandle = Arc<ManagedContainer>;

/// Maps container id to its entry. State is lost on restart.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    entries: RwLock<HashMap<String, ContainerHandle>>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for `id`
    pub async fn get(&self, id: &str) -> Option<ContainerRecord> {
        let handle = self.handle(id).await?;
        Some(handle.record().await)
    }

    /// Entry for `id`, for callers that need its lock
    pub async fn handle(&self, id: &str) -> Option<ContainerHandle> {
        self.entries.read().await.get(id).cloned()
    }

    /// Insert a new record or replace the stored one
    pub async fn upsert(&self, record: ContainerRecord) {
        let existing = self.handle(&record.id).await;
        match existing {
            Some(handle) => {
                handle.update(|stored| *stored = record).await;
            }
            None => {
                let mut entries = self.entries.write().await;
                // Lost a race with a concurrent insert; keep its lock
                if let Some(handle) = entries.get(&record.id).cloned() {
                    drop(entries);
                    handle.update(|stored| *stored = record).await;
                } else {
                    entries.insert(record.id.clone(), Arc::new(ManagedContainer::new(record)));
                }
            }
        }
    }

    /// Drop `id` from the registry, returning its last record
    pub async fn remove(&self, id: &str) -> Option<ContainerRecord> {
        let handle = self.entries.write().await.remove(id)?;
        Some(handle.record().await)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// All records, oldest first
    pub async fn list(&self) -> Vec<ContainerRecord> {
        let handles: Vec<ContainerHandle> = self.entries.read().await.values().cloned().collect();

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            records.push(handle.record().await);
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
