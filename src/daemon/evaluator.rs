//! Alert evaluator and the per-minute evaluate tick.
//!
//! Each tick reads the current snapshot, picks the events that have just
//! crossed the alert threshold and have not been alerted yet, marks them,
//! and hands them to the alert sink. The tick also triggers an
//! out-of-band refresh when the snapshot is older than the resync interval
//! (typically after a long suspend) and a throttled credential check.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::credential::{CredentialGate, DEFAULT_PROMPT_TIMEOUT};
use crate::types::{IconState, Snapshot};
use crate::ui::{NextMeeting, UiCommand, UiHandle};

use super::config::ConfigStore;
use super::dispatcher::{AlertRequest, AlertSink};
use super::fetch::FetchCoordinator;
use super::worker::spawn_worker;

/// Above this many entries the alerted set is cleared wholesale.
pub const ALERTED_SET_CAP: usize = 100;

/// Events this many minutes past their start are still alerted.
const LATE_ALERT_MINUTES: i64 = -1;

/// Minimum time between two credential validity checks.
pub const CREDENTIAL_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// AlertedSet
// ============================================================================

/// Ids of events that have already been alerted.
#[derive(Debug, Default)]
pub struct AlertedSet {
    ids: Mutex<HashSet<String>>,
}

impl AlertedSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    /// Adds an id. Returns false if it was already present.
    pub fn insert(&self, id: impl Into<String>) -> bool {
        self.lock().insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns the ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Keeps only ids that belong to an event of `snapshot` that has not
    /// ended. Returns the number removed.
    pub fn retain_live(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> usize {
        let live: HashSet<&str> = snapshot
            .events()
            .iter()
            .filter(|event| !event.has_ended(now))
            .map(|event| event.id.as_str())
            .collect();
        let mut ids = self.lock();
        let before = ids.len();
        ids.retain(|id| live.contains(id.as_str()));
        before - ids.len()
    }

    /// Clears the set if it holds more than `cap` ids.
    pub fn clear_if_over(&self, cap: usize) -> bool {
        let mut ids = self.lock();
        if ids.len() > cap {
            tracing::info!(len = ids.len(), "通知済みリストが上限を超えたためクリアしました");
            ids.clear();
            true
        } else {
            false
        }
    }
}

// ============================================================================
// AlertEvaluator
// ============================================================================

/// Decides which events to alert.
pub struct AlertEvaluator {
    alerted: AlertedSet,
    sink: Arc<dyn AlertSink>,
    config: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for AlertEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEvaluator")
            .field("alerted", &self.alerted)
            .finish_non_exhaustive()
    }
}

impl AlertEvaluator {
    pub fn new(sink: Arc<dyn AlertSink>, config: Arc<dyn ConfigStore>) -> Self {
        Self {
            alerted: AlertedSet::new(),
            sink,
            config,
        }
    }

    pub fn alerted(&self) -> &AlertedSet {
        &self.alerted
    }

    /// Evaluates `snapshot` against the current time.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<String> {
        self.evaluate_at(snapshot, Utc::now())
    }

    /// Evaluates `snapshot` at `now`. Returns the ids alerted by this call.
    pub fn evaluate_at(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> Vec<String> {
        self.alerted.clear_if_over(ALERTED_SET_CAP);

        let evicted = self.alerted.retain_live(snapshot, now);
        if evicted > 0 {
            tracing::debug!(evicted, "終了した会議を通知済みリストから削除しました");
        }

        let threshold = i64::from(self.config.alert_threshold_minutes());
        // Marked before dispatch so a failed dispatch cannot alert twice
        let due: Vec<_> = snapshot
            .events()
            .iter()
            .filter(|event| !event.has_ended(now))
            .filter(|event| {
                let minutes = event.minutes_to_start(now);
                (LATE_ALERT_MINUTES..=threshold).contains(&minutes)
            })
            .filter(|event| self.alerted.insert(event.id.clone()))
            .cloned()
            .collect();

        if due.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = due.iter().map(|event| event.id.clone()).collect();
        tracing::info!(?ids, "会議のアラートを送信します");
        if let Err(e) = self.sink.dispatch_alert(AlertRequest::for_events(due, now)) {
            tracing::error!("アラートの送信に失敗しました: {:#}", e);
        }
        ids
    }
}

// ============================================================================
// CredentialCheck
// ============================================================================

/// Result of one credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The credential still works
    Valid,
    /// It did not, and the human supplied a new one
    Renewed,
    /// It did not, and no new one was supplied
    NotRenewed,
    /// Validity could not be determined
    Unknown,
}

/// Throttled credential validation, run off the UI thread.
pub struct CredentialCheck {
    coordinator: Arc<FetchCoordinator>,
    gate: Arc<CredentialGate>,
    config: Arc<dyn ConfigStore>,
    ui: UiHandle,
    interval: Duration,
    prompt_timeout: Duration,
    last_check: Mutex<Option<Instant>>,
    in_progress: AtomicBool,
}

impl std::fmt::Debug for CredentialCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCheck")
            .field("interval", &self.interval)
            .field("in_progress", &self.in_progress)
            .finish_non_exhaustive()
    }
}

/// Clears the in-progress flag on drop.
struct CheckGuard<'a>(&'a AtomicBool);

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CredentialCheck {
    pub fn new(
        coordinator: Arc<FetchCoordinator>,
        gate: Arc<CredentialGate>,
        config: Arc<dyn ConfigStore>,
        ui: UiHandle,
    ) -> Self {
        Self {
            coordinator,
            gate,
            config,
            ui,
            interval: CREDENTIAL_CHECK_INTERVAL,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
            last_check: Mutex::new(None),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Starts a check on a worker unless one ran within the interval or is
    /// still running. Returns true if a check was started.
    pub fn maybe_check(self: &Arc<Self>) -> bool {
        {
            let mut last = self.last_check.lock().unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|at| at.elapsed() < self.interval) {
                return false;
            }
            if self.in_progress.swap(true, Ordering::SeqCst) {
                return false;
            }
            *last = Some(Instant::now());
        }

        let check = Arc::clone(self);
        let spawned = spawn_worker("credential-check", move || {
            let _guard = CheckGuard(&check.in_progress);
            check.check_now();
        });
        if spawned.is_none() {
            self.in_progress.store(false, Ordering::SeqCst);
        }
        spawned.is_some()
    }

    /// Starts a sign-in on a worker regardless of validity (menu action).
    ///
    /// If a prompt is already open the worker joins it and the prompt is
    /// brought to the front.
    pub fn sign_in(self: &Arc<Self>) -> bool {
        let check = Arc::clone(self);
        spawn_worker("sign-in", move || {
            check.renew();
        })
        .is_some()
    }

    /// Checks validity on the calling thread and prompts if needed.
    pub fn check_now(&self) -> CheckOutcome {
        match self.coordinator.gateway().is_credential_valid() {
            Ok(true) => {
                tracing::debug!("資格情報は有効です");
                CheckOutcome::Valid
            }
            Ok(false) => {
                tracing::info!("資格情報が無効になっています");
                self.renew()
            }
            Err(e) => {
                tracing::warn!("資格情報の確認に失敗しました: {}", e);
                CheckOutcome::Unknown
            }
        }
    }

    fn renew(&self) -> CheckOutcome {
        self.ui.post(UiCommand::SetIconState(IconState::Invalid));
        match self
            .gate
            .prompt_and_wait(&self.config.sign_in_url(), self.prompt_timeout)
        {
            Ok(Some(credential)) => {
                self.coordinator.gateway().accept_credential(credential);
                self.ui.post(UiCommand::SetIconState(IconState::Valid));
                self.coordinator.refresh();
                CheckOutcome::Renewed
            }
            Ok(None) => {
                tracing::info!("サインインは行われませんでした");
                CheckOutcome::NotRenewed
            }
            Err(e) => {
                tracing::warn!("{} ({})", e, e.suggestion());
                CheckOutcome::NotRenewed
            }
        }
    }
}

// ============================================================================
// EvaluateTick
// ============================================================================

/// Body of the per-minute evaluate job.
pub struct EvaluateTick {
    pub evaluator: Arc<AlertEvaluator>,
    pub coordinator: Arc<FetchCoordinator>,
    pub credentials: Arc<CredentialCheck>,
    pub config: Arc<dyn ConfigStore>,
    pub ui: UiHandle,
}

impl EvaluateTick {
    /// Runs one tick.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches other scheduled jobs.
    pub fn run(&self) -> Result<()> {
        let snapshot = self.coordinator.snapshot();
        let now = Utc::now();

        self.evaluator.evaluate_at(&snapshot, now);

        let next = snapshot.next_upcoming(now).map(|event| NextMeeting {
            subject: event.subject.clone(),
            minutes_to_start: event.minutes_to_start(now),
        });
        self.ui.post(UiCommand::SetNextMeeting(next));

        let resync = Duration::from_secs(u64::from(self.config.resync_interval_minutes()) * 60);
        if self.coordinator.is_stale(resync, now) {
            tracing::info!("前回の取得から時間が経過しているため再取得します");
            self.coordinator.refresh();
        }

        self.credentials.maybe_check();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
