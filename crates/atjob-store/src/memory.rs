use async_trait::async_trait;
use atjob_core::{ObjectKey, Resource};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{Result, StoreError},
    store::{ObjectStore, WatchEvent, WATCH_CAPACITY},
};

/// In-process store backed by a sharded concurrent map.
///
/// Each key is guarded by its shard lock for the duration of a
/// compare-and-swap, so `create` and `update` are atomic per object.
pub struct MemoryStore<T: Resource> {
    objects: DashMap<ObjectKey, T>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: Resource> MemoryStore<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: DashMap::new(),
            events,
        }
    }

    fn notify(&self, event: WatchEvent<T>) {
        // No subscribers is fine; nothing to deliver.
        let _ = self.events.send(event);
    }
}

impl<T: Resource> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for MemoryStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T> {
        self.objects
            .get(key)
            .map(|o| o.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: T::KIND,
                key: key.clone(),
            })
    }

    async fn list(&self) -> Result<Vec<T>> {
        let mut all: Vec<T> = self.objects.iter().map(|o| o.value().clone()).collect();
        all.sort_by_key(|o| o.key());
        Ok(all)
    }

    async fn create(&self, mut obj: T) -> Result<T> {
        let key = obj.key();
        let stored = match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(StoreError::AlreadyExists { kind: T::KIND, key });
            }
            Entry::Vacant(slot) => {
                let meta = obj.meta_mut();
                meta.uid = Uuid::new_v4().to_string();
                meta.resource_version = 1;
                meta.created_at = Some(Utc::now());
                slot.insert(obj.clone());
                obj
            }
        };
        debug!(kind = T::KIND, key = %key, "object created");
        self.notify(WatchEvent::Added(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, mut obj: T) -> Result<T> {
        let key = obj.key();
        let stored = match self.objects.entry(key.clone()) {
            Entry::Vacant(_) => {
                return Err(StoreError::NotFound { kind: T::KIND, key });
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get().meta();
                let expected = obj.meta().resource_version;
                if current.resource_version != expected {
                    return Err(StoreError::Conflict {
                        kind: T::KIND,
                        key,
                        expected,
                        actual: current.resource_version,
                    });
                }
                let (uid, created_at) = (current.uid.clone(), current.created_at);
                let meta = obj.meta_mut();
                meta.uid = uid;
                meta.created_at = created_at;
                meta.resource_version = expected + 1;
                slot.insert(obj.clone());
                obj
            }
        };
        debug!(kind = T::KIND, key = %key, version = stored.meta().resource_version, "object updated");
        self.notify(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let (_, removed) = self.objects.remove(key).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        })?;
        debug!(kind = T::KIND, key = %key, "object deleted");
        self.notify(WatchEvent::Deleted(removed));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}
