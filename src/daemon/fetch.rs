//! Fetch coordinator: single-flight calendar refresh with a watchdog.
//!
//! At most one fetch runs at a time. A second `refresh()` while one is in
//! flight is a no-op, unless the running fetch has been going for longer
//! than the watchdog timeout, in which case it is presumed dead, its claim
//! is cleared and a new fetch starts. The presumed-dead fetch may still
//! finish later; its result is discarded because a newer generation owns
//! the snapshot by then.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};

use crate::gateway::{CalendarGateway, GatewayError};
use crate::types::{IconState, Snapshot};
use crate::ui::{UiCommand, UiHandle};

use super::worker::spawn_worker;

/// A fetch running longer than this is presumed dead.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// `started_at_ms` value meaning "no timestamp yet"; never stale.
const NOT_STARTED: u64 = u64::MAX;

// ============================================================================
// FetchState
// ============================================================================

/// Single-flight flag plus start timestamp.
///
/// Every acquisition bumps the generation and is tagged with the new value.
/// Releasing or force-clearing bumps it again with a compare-and-set, so a
/// fetch that was force-cleared cannot release the claim of its successor,
/// and a watchdog that observed an older claim cannot clear a newer one.
#[derive(Debug)]
pub struct FetchState {
    in_progress: AtomicBool,
    started_at_ms: AtomicU64,
    generation: AtomicU64,
    epoch: Instant,
}

impl Default for FetchState {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchState {
    pub fn new() -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            started_at_ms: AtomicU64::new(NOT_STARTED),
            generation: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(NOT_STARTED - 1)
    }

    /// Claims the flag. Returns the generation of the claim.
    pub fn try_acquire(&self) -> Option<u64> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.started_at_ms.store(self.now_ms(), Ordering::SeqCst);
        Some(generation)
    }

    /// Releases a claim. Returns false if the claim was already superseded.
    pub fn release(&self, generation: u64) -> bool {
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.started_at_ms.store(NOT_STARTED, Ordering::SeqCst);
        self.in_progress.store(false, Ordering::SeqCst);
        true
    }

    /// Clears the flag if the current claim is older than `timeout`.
    pub fn force_clear_if_stale(&self, timeout: Duration) -> bool {
        self.observe_stale(timeout)
            .is_some_and(|claim| self.clear_stale(claim))
    }

    fn observe_stale(&self, timeout: Duration) -> Option<StaleClaim> {
        let generation = self.generation.load(Ordering::SeqCst);
        let started = self.started_at_ms.load(Ordering::SeqCst);
        if started == NOT_STARTED {
            return None;
        }
        let elapsed = Duration::from_millis(self.now_ms().saturating_sub(started));
        (elapsed > timeout).then_some(StaleClaim { generation, elapsed })
    }

    /// Clears `claim` unless the generation has moved on since it was observed.
    fn clear_stale(&self, claim: StaleClaim) -> bool {
        if self
            .generation
            .compare_exchange(
                claim.generation,
                claim.generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }
        tracing::warn!(
            elapsed_secs = claim.elapsed.as_secs(),
            "カレンダー取得が応答しないため強制的に解除しました"
        );
        self.started_at_ms.store(NOT_STARTED, Ordering::SeqCst);
        self.in_progress.store(false, Ordering::SeqCst);
        true
    }

    /// Returns true if `generation` still owns the flag.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// How long the current claim has been held.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at_ms.load(Ordering::SeqCst);
        (started != NOT_STARTED).then(|| Duration::from_millis(self.now_ms().saturating_sub(started)))
    }
}

/// A claim the watchdog saw running past its timeout.
#[derive(Debug, Clone, Copy)]
struct StaleClaim {
    generation: u64,
    elapsed: Duration,
}

/// Releases its claim on drop, including during unwinding.
struct FetchGuard<'a> {
    state: &'a FetchState,
    generation: u64,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.state.release(self.generation);
    }
}

// ============================================================================
// FetchStatus
// ============================================================================

/// Outcome of the last fetch, for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchStatus {
    #[default]
    Idle,
    Ok {
        count: usize,
        at: DateTime<Utc>,
    },
    /// Sign-in was cancelled; the previous snapshot is still shown
    AuthCancelled,
    AuthFailure,
    NetworkUnreachable,
    Timeout,
    Failed(String),
}

impl FetchStatus {
    /// Classifies a gateway error.
    pub fn from_error(error: &GatewayError) -> Self {
        match error {
            GatewayError::AuthenticationCancelled => FetchStatus::AuthCancelled,
            GatewayError::Unauthorized(_) => FetchStatus::AuthFailure,
            GatewayError::NetworkUnreachable(_) => FetchStatus::NetworkUnreachable,
            GatewayError::Timeout(_) => FetchStatus::Timeout,
            GatewayError::Other(detail) => FetchStatus::Failed(detail.clone()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, FetchStatus::Ok { .. })
    }

    /// Short status line for the tray menu and `status` command.
    pub fn message(&self) -> String {
        match self {
            FetchStatus::Idle => "未取得".to_string(),
            FetchStatus::Ok { count, at } => format!(
                "{}件取得 ({})",
                count,
                at.with_timezone(&Local).format("%H:%M")
            ),
            FetchStatus::AuthCancelled => "サインインがキャンセルされました (前回の予定を表示中)".to_string(),
            FetchStatus::AuthFailure => "認証エラー".to_string(),
            FetchStatus::NetworkUnreachable => "ネットワークに接続できません".to_string(),
            FetchStatus::Timeout => "タイムアウトしました".to_string(),
            FetchStatus::Failed(detail) => format!("取得に失敗しました: {}", detail),
        }
    }
}

/// What a `refresh()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new fetch was started
    Started,
    /// A stale fetch was force-cleared and a new one started
    Recovered,
    /// A fetch is already in flight; nothing was done
    Skipped,
}

impl RefreshOutcome {
    pub fn started(&self) -> bool {
        !matches!(self, RefreshOutcome::Skipped)
    }
}

// ============================================================================
// FetchCoordinator
// ============================================================================

/// Owns the snapshot and the single-flight refresh around the gateway.
pub struct FetchCoordinator {
    gateway: Arc<dyn CalendarGateway>,
    ui: Option<UiHandle>,
    state: FetchState,
    watchdog_timeout: Duration,
    snapshot: RwLock<Arc<Snapshot>>,
    last_success: Mutex<Option<DateTime<Utc>>>,
    last_status: Mutex<FetchStatus>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("state", &self.state)
            .field("watchdog_timeout", &self.watchdog_timeout)
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    pub fn new(gateway: Arc<dyn CalendarGateway>) -> Self {
        Self {
            gateway,
            ui: None,
            state: FetchState::new(),
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
            last_success: Mutex::new(None),
            last_status: Mutex::new(FetchStatus::Idle),
        }
    }

    /// Reports status and icon changes to the UI thread.
    pub fn with_ui(mut self, ui: UiHandle) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn CalendarGateway> {
        &self.gateway
    }

    /// Returns the current snapshot. Never blocks on a fetch.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> FetchStatus {
        self.last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_fetching(&self) -> bool {
        self.state.is_in_progress()
    }

    /// Returns true if no fetch has succeeded within `resync` of `now`.
    ///
    /// Uses the wall clock so time spent suspended counts.
    pub fn is_stale(&self, resync: Duration, now: DateTime<Utc>) -> bool {
        match self.last_refresh() {
            None => true,
            Some(at) => (now - at).to_std().is_ok_and(|elapsed| elapsed > resync),
        }
    }

    /// Starts a fetch on a worker thread unless one is already running.
    pub fn refresh(self: &Arc<Self>) -> RefreshOutcome {
        let Some((generation, outcome)) = self.claim() else {
            return RefreshOutcome::Skipped;
        };

        let coordinator = Arc::clone(self);
        if spawn_worker("fetch", move || coordinator.run_fetch(generation)).is_none() {
            self.state.release(generation);
            return RefreshOutcome::Skipped;
        }
        outcome
    }

    /// Runs a fetch on the calling thread unless one is already running.
    pub fn refresh_now(&self) -> RefreshOutcome {
        let Some((generation, outcome)) = self.claim() else {
            return RefreshOutcome::Skipped;
        };
        self.run_fetch(generation);
        outcome
    }

    fn claim(&self) -> Option<(u64, RefreshOutcome)> {
        if let Some(generation) = self.state.try_acquire() {
            return Some((generation, RefreshOutcome::Started));
        }
        if self.state.force_clear_if_stale(self.watchdog_timeout) {
            if let Some(generation) = self.state.try_acquire() {
                return Some((generation, RefreshOutcome::Recovered));
            }
        }
        tracing::debug!(
            elapsed_ms = self.state.elapsed().map(|d| d.as_millis() as u64),
            "カレンダー取得中のためスキップしました"
        );
        None
    }

    fn run_fetch(&self, generation: u64) {
        let _guard = FetchGuard {
            state: &self.state,
            generation,
        };
        tracing::debug!(generation, "カレンダーを取得します");

        let result = self.gateway.fetch_upcoming();

        if !self.state.is_current(generation) {
            tracing::warn!(generation, "強制解除後に完了した取得結果を破棄しました");
            return;
        }

        match result {
            Ok(events) => {
                let now = Utc::now();
                let count = events.len();
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) =
                    Arc::new(Snapshot::fetched_at(events, now));
                *self.last_success.lock().unwrap_or_else(PoisonError::into_inner) = Some(now);
                tracing::info!(count, "カレンダーを更新しました");
                self.set_status(FetchStatus::Ok { count, at: now });
                self.post(UiCommand::SetIconState(IconState::Valid));
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!("サインインがキャンセルされたため前回の予定を保持します");
                self.set_status(FetchStatus::AuthCancelled);
            }
            Err(e) => {
                tracing::warn!("{} ({})", e, e.suggestion());
                if e.is_auth_error() {
                    self.post(UiCommand::SetIconState(IconState::Invalid));
                }
                self.set_status(FetchStatus::from_error(&e));
            }
        }
    }

    fn set_status(&self, status: FetchStatus) {
        let message = status.message();
        *self.last_status.lock().unwrap_or_else(PoisonError::into_inner) = status;
        self.post(UiCommand::SetStatus(message));
    }

    fn post(&self, command: UiCommand) {
        if let Some(ui) = &self.ui {
            ui.post(command);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
