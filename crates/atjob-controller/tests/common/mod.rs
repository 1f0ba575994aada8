// Shared fixtures: an instrumented store wrapper and job/clock builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use atjob_controller::{ManualClock, Reconciler};
use atjob_core::{ExecutionUnit, ObjectKey, Resource, ScheduledJob};
use atjob_store::{MemoryStore, ObjectStore, StoreError, WatchEvent};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::broadcast;

pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Wraps a [`MemoryStore`] and counts writes. Can also inject faults.
pub struct Recording<T: Resource> {
    pub inner: MemoryStore<T>,
    pub creates: AtomicU32,
    pub updates: AtomicU32,
    /// Yield before every `get`, so concurrent callers interleave.
    pub yield_on_get: AtomicBool,
    /// Fail this many upcoming `get`s with a transient error.
    pub failing_gets: AtomicU32,
    /// For this many upcoming `update`s, bump the stored object first so
    /// the caller's copy is stale.
    pub stale_updates: AtomicU32,
}

impl<T: Resource> Recording<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            creates: AtomicU32::new(0),
            updates: AtomicU32::new(0),
            yield_on_get: AtomicBool::new(false),
            failing_gets: AtomicU32::new(0),
            stale_updates: AtomicU32::new(0),
        })
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for Recording<T> {
    async fn get(&self, key: &ObjectKey) -> Result<T, StoreError> {
        if self.yield_on_get.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if Self::take(&self.failing_gets) {
            return Err(StoreError::Poisoned);
        }
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        self.inner.list().await
    }

    async fn create(&self, obj: T) -> Result<T, StoreError> {
        let created = self.inner.create(obj).await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update(&self, obj: T) -> Result<T, StoreError> {
        if Self::take(&self.stale_updates) {
            // A concurrent writer lands first.
            let current = self.inner.get(&obj.key()).await?;
            self.inner.update(current).await?;
        }
        let updated = self.inner.update(obj).await?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.inner.watch()
    }
}

pub struct Fixture {
    pub jobs: Arc<Recording<ScheduledJob>>,
    pub units: Arc<Recording<ExecutionUnit>>,
    pub clock: Arc<ManualClock>,
    pub reconciler: Reconciler,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
}

pub fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn fixture() -> Fixture {
    let jobs = Recording::<ScheduledJob>::new();
    let units = Recording::<ExecutionUnit>::new();
    let clock = Arc::new(ManualClock::new(t0()));
    let reconciler = Reconciler::new(
        jobs.clone(),
        units.clone(),
        clock.clone(),
        MAX_CONFLICT_RETRIES,
    );
    Fixture {
        jobs,
        units,
        clock,
        reconciler,
    }
}

impl Fixture {
    /// Store a job due `offset` from the fixture clock's now.
    pub async fn job_due_in(&self, name: &str, command: &str, offset: Duration) -> ScheduledJob {
        let schedule = stamp(t0() + offset);
        self.jobs
            .inner
            .create(ScheduledJob::new("default", name, command, schedule))
            .await
            .unwrap()
    }

    pub async fn job(&self, key: &ObjectKey) -> ScheduledJob {
        self.jobs.inner.get(key).await.unwrap()
    }

    pub async fn unit(&self, key: &ObjectKey) -> Option<ExecutionUnit> {
        self.units.inner.get(key).await.ok()
    }
}
