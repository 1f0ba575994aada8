use async_trait::async_trait;
use atjob_core::{ObjectKey, Resource};
use tokio::sync::broadcast;

use crate::error::Result;

/// Buffered watch events per subscriber before it starts lagging.
pub const WATCH_CAPACITY: usize = 1024;

/// A change notification. Carries the object as it was after the change
/// (or, for `Deleted`, as it was last stored).
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Storage capability consumed by the controller, garbage collector and runner.
///
/// Implementations own `uid`, `resource_version` and `created_at`: they are
/// assigned on `create`, and `update` bumps `resource_version` only when the
/// caller's copy still carries the stored version.
#[async_trait]
pub trait ObjectStore<T: Resource>: Send + Sync {
    /// Fetch by key. Returns `NotFound` if absent.
    async fn get(&self, key: &ObjectKey) -> Result<T>;

    /// All objects of this kind, ordered by key.
    async fn list(&self) -> Result<Vec<T>>;

    /// Insert a new object. Returns `AlreadyExists` if the key is taken.
    async fn create(&self, obj: T) -> Result<T>;

    /// Replace an object if `obj.meta().resource_version` matches the stored
    /// version. Returns `Conflict` otherwise and `NotFound` if it is gone.
    async fn update(&self, obj: T) -> Result<T>;

    /// Remove an object. Returns `NotFound` if absent.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Subscribe to changes made after this call.
    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;
}
