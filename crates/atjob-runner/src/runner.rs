use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use atjob_core::{
    config::RunnerConfig, ExecutionUnit, ObjectKey, Resource, RestartPolicy, UnitPhase,
    UnitStatus,
};
use atjob_store::{ObjectStore, WatchEvent};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::process::Command;
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{error::Result, truncate::truncate_middle};

/// Period of the full re-list that picks up `Pending` units missed by the watch.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
/// Ceiling on the delay between restarts.
const MAX_RESTART_DELAY: Duration = Duration::from_secs(300);
/// Status writes that race a concurrent edit are retried this many times.
const MAX_WRITE_RETRIES: u32 = 5;

/// How one attempt at running `argv` ended.
#[derive(Debug)]
enum Attempt {
    Succeeded { stdout: String },
    Exited { code: Option<i32>, stderr: String },
    StartError(String),
    TimedOut(Duration),
}

impl Attempt {
    /// `(reason, message)` recorded on the unit for a failed attempt.
    fn failure(&self) -> (&'static str, String) {
        match self {
            Attempt::Succeeded { .. } => ("Completed", String::new()),
            Attempt::Exited { code, stderr } => {
                let status = match code {
                    Some(code) => format!("exit code {code}"),
                    None => "terminated by signal".to_string(),
                };
                let stderr = stderr.trim();
                let message = if stderr.is_empty() {
                    status
                } else {
                    format!("{status}: {stderr}")
                };
                ("Error", message)
            }
            Attempt::StartError(e) => ("StartError", e.clone()),
            Attempt::TimedOut(limit) => (
                "DeadlineExceeded",
                format!("timed out after {}s", limit.as_secs()),
            ),
        }
    }
}

/// Runs execution units in this process.
///
/// At most one task runs a given unit at a time. Across processes, the
/// conditional `Pending` -> `Running` write decides which runner owns it.
pub struct UnitRunner {
    units: Arc<dyn ObjectStore<ExecutionUnit>>,
    config: RunnerConfig,
    /// Units being run right now, with the token that stops them.
    in_flight: DashMap<ObjectKey, CancellationToken>,
    /// Parent of every per-unit token; cancelled on shutdown.
    stopping: CancellationToken,
}

impl UnitRunner {
    pub fn new(units: Arc<dyn ObjectStore<ExecutionUnit>>, config: RunnerConfig) -> Self {
        Self {
            units,
            config,
            in_flight: DashMap::new(),
            stopping: CancellationToken::new(),
        }
    }

    /// Run `Pending` units as they appear, until `shutdown` broadcasts `true`.
    ///
    /// Attempts still running at shutdown are killed and their units put
    /// back to `Pending`, so the next start runs them again.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let this = Arc::new(self);
        let mut events = this.units.watch();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        let mut tasks = JoinSet::new();
        info!(
            timeout_secs = this.config.timeout_secs,
            max_restarts = this.config.max_restarts,
            "unit runner started"
        );

        loop {
            tokio::select! {
                _ = sweep.tick() => this.sweep(&mut tasks).await,
                event = events.recv() => match event {
                    Ok(WatchEvent::Added(unit) | WatchEvent::Modified(unit)) => {
                        if unit.status.phase == UnitPhase::Pending {
                            Arc::clone(&this).spawn(&mut tasks, unit.key());
                        }
                    }
                    Ok(WatchEvent::Deleted(unit)) => this.cancel(&unit.key()),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "unit watch lagged, re-listing");
                        this.sweep(&mut tasks).await;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "unit task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "unit runner shutting down");
        this.stopping.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "unit task failed");
            }
        }
        info!("unit runner stopped");
    }

    async fn sweep(self: &Arc<Self>, tasks: &mut JoinSet<()>) {
        match self.units.list().await {
            Ok(units) => {
                for unit in units {
                    if unit.status.phase == UnitPhase::Pending {
                        Arc::clone(self).spawn(tasks, unit.key());
                    }
                }
            }
            Err(e) => error!(error = %e, "unit sweep failed"),
        }
    }

    fn spawn(self: Arc<Self>, tasks: &mut JoinSet<()>, key: ObjectKey) {
        if self.in_flight.contains_key(&key) {
            return;
        }
        tasks.spawn(async move {
            if let Err(e) = self.run_unit(&key).await {
                error!(unit = %key, code = e.code(), error = %e, "running execution unit failed");
            }
        });
    }

    /// Stop the attempt for `key`, if one is running here.
    fn cancel(&self, key: &ObjectKey) {
        if let Some(token) = self.in_flight.get(key) {
            info!(unit = %key, "execution unit deleted, killing it");
            token.cancel();
        }
    }

    /// Claim the unit at `key` and run it to a terminal phase.
    ///
    /// Returns the final unit, or `None` if the unit was not `Pending`,
    /// another runner claimed it, it was deleted, or the runner stopped.
    #[instrument(skip(self), fields(unit = %key))]
    pub async fn run_unit(&self, key: &ObjectKey) -> Result<Option<ExecutionUnit>> {
        let token = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(_) => return Ok(None),
            Entry::Vacant(slot) => slot.insert(self.stopping.child_token()).clone(),
        };
        let result = self.execute(key, &token).await;
        self.in_flight.remove(key);
        result
    }

    async fn execute(
        &self,
        key: &ObjectKey,
        token: &CancellationToken,
    ) -> Result<Option<ExecutionUnit>> {
        let mut unit = match self.units.get(key).await {
            Ok(unit) => unit,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if unit.status.phase != UnitPhase::Pending {
            return Ok(None);
        }

        unit.status.phase = UnitPhase::Running;
        let mut unit = match self.units.update(unit).await {
            Ok(unit) => unit,
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!("execution unit claimed elsewhere");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        info!(argv = ?unit.spec.argv, restarts = unit.status.restarts, "execution unit started");

        if unit.spec.argv.is_empty() {
            return self
                .finish(unit, UnitPhase::Failed, "InvalidCommand", "empty command".into())
                .await;
        }

        // Zero disables the per-attempt limit.
        let timeout = (self.config.timeout_secs > 0)
            .then(|| Duration::from_secs(self.config.timeout_secs));
        let max_chars = self.config.max_output_chars;
        loop {
            let attempt = tokio::select! {
                attempt = run_attempt(&unit.spec.argv, timeout, max_chars) => attempt,
                _ = token.cancelled() => return self.interrupted(unit).await,
            };

            if let Attempt::Succeeded { stdout } = &attempt {
                let message = stdout.trim().to_string();
                return self
                    .finish(unit, UnitPhase::Succeeded, "Completed", message)
                    .await;
            }

            let (reason, message) = attempt.failure();
            let restarts = unit.status.restarts;
            if unit.spec.restart_policy == RestartPolicy::Never
                || restarts >= self.config.max_restarts
            {
                return self.finish(unit, UnitPhase::Failed, reason, message).await;
            }

            let delay = restart_delay(self.config.restart_backoff_secs, restarts);
            warn!(
                reason,
                message = %message,
                restarts,
                delay_secs = delay.as_secs(),
                "attempt failed, restarting"
            );
            unit = match self
                .write_status(unit, |status| {
                    status.restarts = restarts + 1;
                    status.reason = Some(reason.to_string());
                    status.message = Some(message.clone());
                })
                .await?
            {
                Some(unit) => unit,
                None => return Ok(None),
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return self.interrupted(unit).await,
            }
        }
    }

    async fn finish(
        &self,
        unit: ExecutionUnit,
        phase: UnitPhase,
        reason: &str,
        message: String,
    ) -> Result<Option<ExecutionUnit>> {
        let finished = self
            .write_status(unit, |status| {
                status.phase = phase;
                status.reason = Some(reason.to_string());
                status.message = Some(message.clone());
            })
            .await?;
        if let Some(unit) = &finished {
            info!(
                phase = %unit.status.phase,
                reason,
                restarts = unit.status.restarts,
                "execution unit finished"
            );
        }
        Ok(finished)
    }

    /// The attempt was killed: on shutdown hand the unit back, on deletion
    /// there is nothing left to write.
    async fn interrupted(&self, unit: ExecutionUnit) -> Result<Option<ExecutionUnit>> {
        if !self.stopping.is_cancelled() {
            return Ok(None);
        }
        info!("runner stopping, returning execution unit to pending");
        self.write_status(unit, |status| {
            status.phase = UnitPhase::Pending;
            status.reason = Some("Interrupted".into());
            status.message = Some("runner shut down before the command finished".into());
        })
        .await?;
        Ok(None)
    }

    /// Apply `edit` to the unit's status and store it, re-reading on
    /// conflict. `None` if the unit was deleted meanwhile.
    async fn write_status<F>(
        &self,
        mut unit: ExecutionUnit,
        edit: F,
    ) -> Result<Option<ExecutionUnit>>
    where
        F: Fn(&mut UnitStatus),
    {
        let key = unit.key();
        let mut attempts = 0;
        loop {
            edit(&mut unit.status);
            match self.units.update(unit).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(e) if e.is_not_found() => {
                    debug!("execution unit deleted, dropping status");
                    return Ok(None);
                }
                Err(e) if e.is_conflict() && attempts < MAX_WRITE_RETRIES => {
                    attempts += 1;
                    unit = match self.units.get(&key).await {
                        Ok(fresh) => fresh,
                        Err(e) if e.is_not_found() => return Ok(None),
                        Err(e) => return Err(e.into()),
                    };
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Spawn `argv` and wait for it, bounded by `timeout`.
///
/// The child is killed if this future is dropped before it exits.
async fn run_attempt(
    argv: &[String],
    timeout: Option<Duration>,
    max_output_chars: usize,
) -> Attempt {
    let Some((program, args)) = argv.split_first() else {
        return Attempt::StartError("empty command".into());
    };
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) => return Attempt::StartError(format!("{program}: {e}")),
    };

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output,
            Err(_elapsed) => return Attempt::TimedOut(limit),
        },
        None => child.wait_with_output().await,
    };

    match output {
        Err(e) => Attempt::Exited {
            code: None,
            stderr: format!("waiting for {program}: {e}"),
        },
        Ok(output) => {
            if output.status.success() {
                Attempt::Succeeded {
                    stdout: truncate_middle(
                        &String::from_utf8_lossy(&output.stdout),
                        max_output_chars,
                    ),
                }
            } else {
                Attempt::Exited {
                    code: output.status.code(),
                    stderr: truncate_middle(
                        &String::from_utf8_lossy(&output.stderr),
                        max_output_chars,
                    ),
                }
            }
        }
    }
}

/// `base_secs × 2^restarts`, capped at five minutes.
fn restart_delay(base_secs: u64, restarts: u32) -> Duration {
    let factor = 2u64.checked_pow(restarts).unwrap_or(u64::MAX);
    Duration::from_secs(base_secs.saturating_mul(factor)).min(MAX_RESTART_DELAY)
}
