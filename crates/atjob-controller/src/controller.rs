use std::sync::Arc;
use std::time::Duration;

use atjob_core::{config::ControllerConfig, ExecutionUnit, ObjectKey, Resource, ScheduledJob};
use atjob_store::{ObjectStore, WatchEvent};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, error, info, warn};

use crate::{
    queue::WorkQueue,
    reconciler::{Action, Reconcile},
};

/// What woke a job up, merged from both watch streams.
enum Trigger {
    Job(ObjectKey),
    /// A watch stream dropped events; only a full re-list recovers them.
    Lagged(u64),
    Ignore,
}

/// Dispatcher: feeds job keys to a pool of reconcile workers.
///
/// Guarantees at most one in-flight reconcile per job. Turns each
/// [`Action`] into a requeue (now, later, or not at all) and each error
/// into a per-key exponential backoff.
pub struct Controller {
    reconciler: Arc<dyn Reconcile>,
    jobs: Arc<dyn ObjectStore<ScheduledJob>>,
    units: Arc<dyn ObjectStore<ExecutionUnit>>,
    queue: Arc<WorkQueue>,
    /// Consecutive failed reconciles per key.
    failures: DashMap<ObjectKey, u32>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        reconciler: Arc<dyn Reconcile>,
        jobs: Arc<dyn ObjectStore<ScheduledJob>>,
        units: Arc<dyn ObjectStore<ExecutionUnit>>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            reconciler,
            jobs,
            units,
            queue: Arc::new(WorkQueue::new()),
            failures: DashMap::new(),
            config,
        }
    }

    /// Shared handle on the work queue, e.g. to enqueue a job by hand.
    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    /// Run until `shutdown` broadcasts `true`.
    ///
    /// Reconciles already in flight when shutdown is signalled run to
    /// completion; nothing new is started.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let this = Arc::new(self);
        let workers = this.config.workers.max(1);
        info!(workers, "controller started");

        // Subscribe before the initial list so no change falls in between.
        let job_events = BroadcastStream::new(this.jobs.watch());
        let unit_events = BroadcastStream::new(this.units.watch());

        let timers = {
            let queue = Arc::clone(&this.queue);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { queue.run_timers(shutdown).await })
        };
        let watcher = {
            let this = Arc::clone(&this);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.watch_loop(job_events, unit_events, shutdown).await })
        };
        let pool: Vec<_> = (0..workers)
            .map(|id| {
                let this = Arc::clone(&this);
                tokio::spawn(async move { this.worker(id).await })
            })
            .collect();

        this.resync().await;
        let mut resync =
            tokio::time::interval(Duration::from_secs(this.config.resync_secs.max(1)));
        resync.tick().await;

        loop {
            tokio::select! {
                _ = resync.tick() => this.resync().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("controller shutting down");
        this.queue.shutdown();
        for worker in futures_util::future::join_all(pool).await {
            if let Err(e) = worker {
                error!(error = %e, "reconcile worker panicked");
            }
        }
        watcher.abort();
        timers.abort();
        info!("controller stopped");
    }

    async fn worker(&self, id: usize) {
        while let Some(key) = self.queue.next().await {
            let result = self.reconciler.reconcile(&key).await;
            self.handle_result(&key, result);
            self.queue.done(&key);
        }
        debug!(worker = id, "reconcile worker exited");
    }

    fn handle_result(&self, key: &ObjectKey, result: crate::error::Result<Action>) {
        match result {
            Ok(action) => {
                self.failures.remove(key);
                match action {
                    Action::None => {}
                    Action::Immediate => self.queue.add(key.clone()),
                    Action::After(delay) => {
                        debug!(job = %key, delay_ms = delay.as_millis() as u64, "requeue after");
                        self.queue.add_after(key.clone(), delay);
                    }
                }
            }
            Err(e) => {
                let delay = self.backoff(key);
                warn!(
                    job = %key,
                    code = e.code(),
                    error = %e,
                    retry_after_ms = delay.as_millis() as u64,
                    "reconcile failed, retrying with backoff"
                );
                self.queue.add_after(key.clone(), delay);
            }
        }
    }

    /// Next retry delay for `key`: base × 2^failures, capped.
    fn backoff(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.entry(key.clone()).or_insert(0);
        let exp = (*failures).min(32);
        *failures = failures.saturating_add(1);
        backoff_delay(
            self.config.backoff_base_ms,
            self.config.backoff_max_secs,
            exp,
        )
    }

    async fn watch_loop(
        &self,
        job_events: BroadcastStream<WatchEvent<ScheduledJob>>,
        unit_events: BroadcastStream<WatchEvent<ExecutionUnit>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let jobs = job_events.map(|event| match event {
            Ok(event) => Trigger::Job(event.object().key()),
            Err(BroadcastStreamRecvError::Lagged(n)) => Trigger::Lagged(n),
        });
        let units = unit_events.map(|event| match event {
            Ok(event) => owner_of(event.object()).map_or(Trigger::Ignore, Trigger::Job),
            Err(BroadcastStreamRecvError::Lagged(n)) => Trigger::Lagged(n),
        });
        let mut triggers = jobs.merge(units);

        loop {
            tokio::select! {
                trigger = triggers.next() => match trigger {
                    Some(Trigger::Job(key)) => self.queue.add(key),
                    Some(Trigger::Lagged(missed)) => {
                        warn!(missed, "watch stream lagged, re-listing jobs");
                        self.resync().await;
                    }
                    Some(Trigger::Ignore) => {}
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Enqueue every job in the store.
    async fn resync(&self) {
        match self.jobs.list().await {
            Ok(jobs) => {
                debug!(count = jobs.len(), "resync");
                for job in jobs {
                    self.queue.add(job.key());
                }
            }
            Err(e) => error!(error = %e, "resync list failed"),
        }
    }
}

/// Key of the job controlling `unit`, if any.
fn owner_of(unit: &ExecutionUnit) -> Option<ObjectKey> {
    unit.meta
        .controller_ref()
        .filter(|owner| owner.kind == ScheduledJob::KIND)
        .map(|owner| owner.key())
}

/// `base_ms × 2^exp`, capped at `max_secs`.
fn backoff_delay(base_ms: u64, max_secs: u64, exp: u32) -> Duration {
    let max = Duration::from_secs(max_secs);
    let factor = 2u64.checked_pow(exp).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(5, 1000, 0), Duration::from_millis(5));
        assert_eq!(backoff_delay(5, 1000, 1), Duration::from_millis(10));
        assert_eq!(backoff_delay(5, 1000, 4), Duration::from_millis(80));
        assert_eq!(backoff_delay(5, 1000, 20), Duration::from_secs(1000));
        assert_eq!(backoff_delay(5, 1000, 32), Duration::from_secs(1000));
    }
}
