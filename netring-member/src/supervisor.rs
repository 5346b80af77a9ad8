//! Supervised periodic loops
//!
//! Every background loop runs under a resilient runner that records a task
//! heartbeat each cycle, logs and re-enters after failures, and exits
//! promptly on cancellation. A watchdog monitor scans the heartbeat table
//! and replaces any runner whose heartbeat has aged past the task timeout,
//! catching loops that hang instead of failing.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause before re-entering a loop body that returned an error.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Produces one iteration of a supervised loop.
pub type IterationFactory = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct LoopSpec {
    interval: Duration,
    factory: IterationFactory,
}

struct RunningTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    spec: LoopSpec,
}

/// Per-task health as reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct TaskHealth {
    pub last_heartbeat: i64,
    pub seconds_since_heartbeat: f64,
    pub status: String,
}

/// Watchdog-supervised task runner.
pub struct Supervisor {
    heartbeats: Arc<DashMap<String, Instant>>,
    tasks: Arc<tokio::sync::Mutex<HashMap<String, RunningTask>>>,
    task_timeout: Duration,
    monitor_interval: Duration,
    cancel: CancellationToken,
    monitor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    #[must_use]
    pub fn new(task_timeout: Duration, monitor_interval: Duration) -> Self {
        Self {
            heartbeats: Arc::new(DashMap::new()),
            tasks: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            task_timeout,
            monitor_interval,
            cancel: CancellationToken::new(),
            monitor: tokio::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        self.monitor_interval
    }

    /// Register a periodic loop and start it immediately.
    ///
    /// `initial_delay` staggers the first execution so a freshly started
    /// member does not fire every probe against a half-populated peer set.
    pub async fn register(
        &self,
        name: &str,
        interval: Duration,
        initial_delay: Duration,
        factory: IterationFactory,
    ) {
        let cancel = self.cancel.child_token();
        let handle = spawn_runner(
            name.to_string(),
            interval,
            initial_delay,
            factory.clone(),
            self.heartbeats.clone(),
            cancel.clone(),
        );
        // The grace window starts at registration, not at the first beat,
        // so delayed loops are not flagged before they ever run.
        self.heartbeats.insert(name.to_string(), Instant::now());
        let mut tasks = self.tasks.lock().await;
        tasks.insert(
            name.to_string(),
            RunningTask {
                handle,
                cancel,
                spec: LoopSpec { interval, factory },
            },
        );
    }

    /// Start the watchdog monitor. Call once, after registering the loops.
    pub async fn start_monitor(&self) {
        let heartbeats = self.heartbeats.clone();
        let tasks = self.tasks.clone();
        let root_cancel = self.cancel.clone();
        let cancel = self.cancel.child_token();
        let task_timeout = self.task_timeout;
        let monitor_interval = self.monitor_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick would scan before any loop has run.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("task monitor shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        restart_overdue_tasks(&heartbeats, &tasks, task_timeout, &root_cancel).await;
                    }
                }
            }
        });
        *self.monitor.lock().await = Some(handle);
    }

    /// Snapshot of every task's heartbeat age and health.
    #[must_use]
    pub fn task_health(&self) -> HashMap<String, TaskHealth> {
        let now = Instant::now();
        let now_epoch = netring_core::protocol::now_epoch();
        self.heartbeats
            .iter()
            .map(|entry| {
                let age = now.duration_since(*entry.value()).as_secs_f64();
                let status = if age < self.task_timeout.as_secs_f64() {
                    "healthy"
                } else {
                    "unhealthy"
                };
                (
                    entry.key().clone(),
                    TaskHealth {
                        last_heartbeat: now_epoch - age as i64,
                        seconds_since_heartbeat: age,
                        status: status.to_string(),
                    },
                )
            })
            .collect()
    }

    /// Names of tasks whose heartbeat is overdue.
    #[must_use]
    pub fn unhealthy_tasks(&self) -> Vec<String> {
        let now = Instant::now();
        let mut names: Vec<String> = self
            .heartbeats
            .iter()
            .filter(|entry| now.duration_since(*entry.value()) >= self.task_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Cancel every runner and the monitor, then wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        for (name, task) in tasks.drain() {
            if let Err(e) = task.handle.await {
                error!(task = %name, error = %e, "task panicked during shutdown");
            }
        }
        if let Some(handle) = self.monitor.lock().await.take() {
            let _ = handle.await;
        }
        debug!("supervisor shut down");
    }
}

/// Replace every runner whose heartbeat has aged past the task timeout.
async fn restart_overdue_tasks(
    heartbeats: &Arc<DashMap<String, Instant>>,
    tasks: &Arc<tokio::sync::Mutex<HashMap<String, RunningTask>>>,
    task_timeout: Duration,
    root_cancel: &CancellationToken,
) {
    let now = Instant::now();
    let overdue: Vec<String> = heartbeats
        .iter()
        .filter(|entry| now.duration_since(*entry.value()) > task_timeout)
        .map(|entry| entry.key().clone())
        .collect();

    for name in overdue {
        let mut tasks = tasks.lock().await;
        let Some(task) = tasks.remove(&name) else {
            continue;
        };
        let age = heartbeats
            .get(&name)
            .map(|beat| now.duration_since(*beat.value()).as_secs())
            .unwrap_or_default();
        warn!(
            task = %name,
            heartbeat_age_seconds = age,
            "task heartbeat overdue, restarting"
        );

        // Cancel first and wait for the old runner to actually stop so
        // two instances of the same loop never overlap.
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            error!(task = %name, error = %e, "cancelled task panicked");
        }

        let cancel = root_cancel.child_token();
        let handle = spawn_runner(
            name.clone(),
            task.spec.interval,
            Duration::ZERO,
            task.spec.factory.clone(),
            heartbeats.clone(),
            cancel.clone(),
        );
        // Reset the beat so the replacement gets a full grace window.
        heartbeats.insert(name.clone(), Instant::now());
        tasks.insert(
            name,
            RunningTask {
                handle,
                cancel,
                spec: task.spec,
            },
        );
    }
}

fn spawn_runner(
    name: String,
    interval: Duration,
    initial_delay: Duration,
    factory: IterationFactory,
    heartbeats: Arc<DashMap<String, Instant>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(resilient_runner(
        name,
        interval,
        initial_delay,
        factory,
        heartbeats,
        cancel,
    ))
}

/// Run one loop under exception isolation and heartbeat recording.
async fn resilient_runner(
    name: String,
    interval: Duration,
    initial_delay: Duration,
    factory: IterationFactory,
    heartbeats: Arc<DashMap<String, Instant>>,
    cancel: CancellationToken,
) {
    if initial_delay > Duration::ZERO {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = sleep(initial_delay) => {}
        }
    }

    loop {
        heartbeats.insert(name.clone(), Instant::now());

        let iteration = (factory)();
        tokio::select! {
            () = cancel.cancelled() => {
                heartbeats.insert(name.clone(), Instant::now());
                debug!(task = %name, "loop cancelled");
                return;
            }
            result = iteration => {
                if let Err(e) = result {
                    error!(task = %name, error = ?e, "task iteration failed, re-entering after pause");
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = sleep(RESTART_DELAY) => {}
                    }
                    continue;
                }
            }
        }

        tokio::select! {
            () = cancel.cancelled() => return,
            () = sleep(interval) => {}
        }
    }
}
