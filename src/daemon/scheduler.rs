//! Scheduler manager: the two periodic jobs and their lifecycle.
//!
//! - Refresh job: fires immediately, then every resync interval
//! - Evaluate job: fires every minute, first tick one minute after start
//!
//! Both run on a small tokio runtime owned by the manager. Each tick body
//! runs under `spawn_blocking`, so an error or a panic in one tick is
//! caught, logged, and the next tick still fires. `restart()` tears the
//! runtime down (bounded wait, then stragglers are abandoned) and builds a
//! fresh one, which re-reads the configured interval.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::config::ConfigStore;
use super::worker::panic_message;

/// Body of a scheduled job.
pub type JobFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Wraps a closure as a [`JobFn`].
pub fn job<F>(f: F) -> JobFn
where
    F: Fn() -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Worker threads in the scheduler runtime.
const SCHEDULER_WORKERS: usize = 2;

// ============================================================================
// SchedulerTimings
// ============================================================================

/// Periods used by the scheduler. Tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTimings {
    /// Period of the evaluate job
    pub evaluate_period: Duration,
    /// Length of one "minute" of the resync interval
    pub minute: Duration,
    /// How long `stop()` waits for running ticks
    pub shutdown_grace: Duration,
}

impl Default for SchedulerTimings {
    fn default() -> Self {
        Self {
            evaluate_period: Duration::from_secs(60),
            minute: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// SchedulerManager
// ============================================================================

#[derive(Default)]
struct SchedulerState {
    running: bool,
    runtime: Option<Runtime>,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the refresh and evaluate jobs.
///
/// `start`, `stop` and `restart` are serialized by a private lock and are
/// idempotent. They must be called from plain threads, never from inside
/// an async task.
pub struct SchedulerManager {
    refresh_job: JobFn,
    evaluate_job: JobFn,
    config: Arc<dyn ConfigStore>,
    timings: SchedulerTimings,
    state: Mutex<SchedulerState>,
    starts: AtomicUsize,
}

impl std::fmt::Debug for SchedulerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerManager")
            .field("timings", &self.timings)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SchedulerManager {
    pub fn new(refresh_job: JobFn, evaluate_job: JobFn, config: Arc<dyn ConfigStore>) -> Self {
        Self {
            refresh_job,
            evaluate_job,
            config,
            timings: SchedulerTimings::default(),
            state: Mutex::new(SchedulerState::default()),
            starts: AtomicUsize::new(0),
        }
    }

    pub fn with_timings(mut self, timings: SchedulerTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    /// Number of times the jobs have been (re)started.
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Starts both jobs. No-op if already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be created.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.start_locked(&mut state)
    }

    /// Stops both jobs. No-op if not running.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.stop_locked(&mut state);
    }

    /// Stops, recreates the runtime, and starts again with fresh settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the new runtime cannot be created.
    pub fn restart(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!("スケジューラを再起動します");
        self.stop_locked(&mut state);
        self.start_locked(&mut state)
    }

    fn resync_period(&self) -> Duration {
        self.timings.minute * self.config.resync_interval_minutes().max(1)
    }

    fn start_locked(&self, state: &mut SchedulerState) -> Result<()> {
        if state.running {
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(SCHEDULER_WORKERS)
            .thread_name("scheduler")
            .enable_time()
            .build()
            .context("スケジューラのランタイムを作成できませんでした")?;

        let resync = self.resync_period();
        let evaluate = self.timings.evaluate_period;
        state.handles = vec![
            runtime.spawn(run_periodic(
                "refresh",
                Arc::clone(&self.refresh_job),
                Duration::ZERO,
                resync,
            )),
            runtime.spawn(run_periodic(
                "evaluate",
                Arc::clone(&self.evaluate_job),
                evaluate,
                evaluate,
            )),
        ];
        state.runtime = Some(runtime);
        state.running = true;
        self.starts.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            resync_secs = resync.as_secs(),
            evaluate_secs = evaluate.as_secs(),
            "スケジューラを開始しました"
        );
        Ok(())
    }

    fn stop_locked(&self, state: &mut SchedulerState) {
        if !state.running {
            return;
        }
        for handle in state.handles.drain(..) {
            handle.abort();
        }
        if let Some(runtime) = state.runtime.take() {
            runtime.shutdown_timeout(self.timings.shutdown_grace);
        }
        state.running = false;
        tracing::info!("スケジューラを停止しました");
    }
}

impl Drop for SchedulerManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(runtime) = state.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Ticks `job` every `period`, first after `initial_delay`.
async fn run_periodic(name: &'static str, job: JobFn, initial_delay: Duration, period: Duration) {
    let mut ticker = interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        run_guarded(name, Arc::clone(&job)).await;
    }
}

/// Runs one tick, catching errors and panics. Returns true on success.
pub async fn run_guarded(name: &'static str, job: JobFn) -> bool {
    match tokio::task::spawn_blocking(move || job()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!(job = name, "定期ジョブでエラーが発生しました: {:#}", e);
            false
        }
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            tracing::error!(
                job = name,
                "定期ジョブでパニックが発生しました: {}",
                panic_message(payload.as_ref())
            );
            false
        }
        Err(_) => {
            tracing::debug!(job = name, "定期ジョブがキャンセルされました");
            false
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
