use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use atjob_core::ObjectKey;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, warn};

/// Longest single timer. Later wake-ups re-arm after a reconcile recomputes
/// the remaining wait; `DelayQueue` rejects deadlines about two years out.
pub const MAX_REQUEUE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct QueueState {
    /// FIFO of keys ready to be handed to a worker.
    ready: VecDeque<ObjectKey>,
    /// Mirror of `ready` for O(1) de-duplication.
    queued: HashSet<ObjectKey>,
    /// Keys a worker is reconciling right now.
    in_flight: HashSet<ObjectKey>,
    /// Keys added while in flight; re-queued when the worker finishes.
    dirty: HashSet<ObjectKey>,
    shutting_down: bool,
}

impl QueueState {
    fn push(&mut self, key: ObjectKey) -> bool {
        if self.queued.insert(key.clone()) {
            self.ready.push_back(key);
            true
        } else {
            false
        }
    }
}

/// Keyed work queue handing out at most one in-flight copy of each key.
///
/// A key added any number of times before a worker takes it is processed
/// once. A key added while it is being processed is processed once more
/// after the current pass finishes, never concurrently with it.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    delays_tx: mpsc::UnboundedSender<(ObjectKey, Instant)>,
    delays_rx: Mutex<Option<mpsc::UnboundedReceiver<(ObjectKey, Instant)>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (delays_tx, delays_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            delays_tx,
            delays_rx: Mutex::new(Some(delays_rx)),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // The state is a handful of sets; a panicking holder cannot leave it torn.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `key` for processing now.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.push(key) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue `key` once `delay` has elapsed.
    ///
    /// If the key is already waiting on a timer, the earlier deadline wins.
    /// Delays beyond [`MAX_REQUEUE_DELAY`] are shortened to it. Timers only
    /// fire while [`WorkQueue::run_timers`] is running.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        let delay = delay.min(MAX_REQUEUE_DELAY);
        if self
            .delays_tx
            .send((key, Instant::now() + delay))
            .is_err()
        {
            debug!("requeue timers stopped; delayed add dropped");
        }
    }

    /// Wait for the next key. `None` once the queue is shut down and drained.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    let more = !state.ready.is_empty();
                    drop(state);
                    if more {
                        // Pass the wake-up on so idle workers pick up the rest.
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a key handed out by [`WorkQueue::next`] as finished.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.in_flight.remove(key);
        if state.dirty.remove(key) && !state.shutting_down && state.push(key.clone()) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out new keys; `next` returns `None` to every worker.
    pub fn shutdown(&self) {
        let mut state = self.state();
        state.shutting_down = true;
        state.ready.clear();
        state.queued.clear();
        state.dirty.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.state().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drive requeue timers until `shutdown` flips to `true`.
    ///
    /// Must be running for [`WorkQueue::add_after`] to have any effect; only
    /// the first caller gets the timer channel.
    pub async fn run_timers(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(mut requests) = self
            .delays_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            warn!("requeue timers already running");
            return;
        };

        let mut timers: DelayQueue<ObjectKey> = DelayQueue::new();
        let mut waiting: HashMap<ObjectKey, (delay_queue::Key, Instant)> = HashMap::new();

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some((key, deadline)) = request else { break };
                    match waiting.get_mut(&key) {
                        Some((timer, at)) => {
                            if deadline < *at {
                                timers.reset_at(timer, deadline);
                                *at = deadline;
                            }
                        }
                        None => {
                            let timer = timers.insert_at(key.clone(), deadline);
                            waiting.insert(key, (timer, deadline));
                        }
                    }
                }
                Some(expired) = timers.next(), if !timers.is_empty() => {
                    let key = expired.into_inner();
                    waiting.remove(&key);
                    debug!(job = %key, "requeue timer fired");
                    self.add(key);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("ns", name)
    }

    async fn next_now(queue: &WorkQueue) -> Option<ObjectKey> {
        tokio::time::timeout(Duration::from_millis(50), queue.next())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn duplicate_adds_are_collapsed() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        queue.add(key("a"));
        queue.add(key("b"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await, Some(key("a")));
        assert_eq!(queue.next().await, Some(key("b")));
        assert_eq!(next_now(&queue).await, None);
    }

    #[tokio::test]
    async fn in_flight_key_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        let taken = queue.next().await.unwrap();

        queue.add(key("a"));
        assert_eq!(next_now(&queue).await, None, "key re-issued while in flight");

        queue.done(&taken);
        assert_eq!(next_now(&queue).await, Some(key("a")), "dirty key lost");
    }

    #[tokio::test]
    async fn done_without_readd_forgets_key() {
        let queue = WorkQueue::new();
        queue.add(key("a"));
        let taken = queue.next().await.unwrap();
        queue.done(&taken);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_workers() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add(key("late"));
        assert!(queue.is_empty(), "adds after shutdown must be dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_add_fires_after_deadline() {
        let queue = Arc::new(WorkQueue::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let timers = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.run_timers(stop_rx).await })
        };

        queue.add_after(key("a"), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(queue.is_empty(), "fired early");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);

        stop_tx.send(true).unwrap();
        timers.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let queue = Arc::new(WorkQueue::new());
        let (_stop_tx, stop_rx) = watch::channel(false);
        {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.run_timers(stop_rx).await });
        }

        queue.add_after(key("a"), Duration::from_secs(60));
        queue.add_after(key("a"), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.next().await, Some(key("a")));

        queue.done(&key("a"));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty(), "superseded timer still fired");
    }

    #[tokio::test(start_paused = true)]
    async fn far_future_delay_is_capped_and_keeps_timers_alive() {
        let queue = Arc::new(WorkQueue::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let timers = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.run_timers(stop_rx).await })
        };

        let three_years = Duration::from_secs(3 * 365 * 24 * 60 * 60);
        queue.add_after(key("far"), three_years);
        queue.add_after(key("near"), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!timers.is_finished(), "timer task died");
        assert_eq!(queue.next().await, Some(key("near")));
        queue.done(&key("near"));

        tokio::time::sleep(MAX_REQUEUE_DELAY).await;
        assert_eq!(queue.next().await, Some(key("far")));

        stop_tx.send(true).unwrap();
        timers.await.unwrap();
    }
}
