//! Credential gate: one sign-in prompt at a time.
//!
//! Any background thread that needs a fresh credential calls
//! [`CredentialGate::prompt_and_wait`]. The first caller creates a
//! [`CredentialSession`] and asks the UI thread to show the prompt; later
//! callers join the same session and block on the same barrier. The barrier
//! is released exactly once, by submission, cancellation or timeout. A
//! caller whose own timeout runs out while others still wait leaves
//! without releasing it.
//!
//! ```text
//!  idle ──prompt_and_wait──▶ showing ──┬─ on_submit ──▶ submitted
//!                                       ├─ on_cancel ──▶ cancelled
//!                                       └─ timeout ────▶ timed out
//! ```
//!
//! The UI thread never waits here: it only renders the prompt and calls
//! the [`PromptResponder`] callbacks, which return immediately.

pub mod error;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use uuid::Uuid;

pub use error::CredentialError;

use crate::daemon::wake::WakeClock;
use crate::types::Credential;
use crate::ui::{UiCommand, UiHandle};

/// Default time a caller waits for the human.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// Resolution
// ============================================================================

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The human supplied a credential
    Submitted(Credential),
    /// The prompt was cancelled; `explicit` is true for user-initiated
    /// cancellation (button or close gesture)
    Cancelled { explicit: bool },
    /// Nobody answered in time
    TimedOut,
}

impl Resolution {
    fn label(&self) -> &'static str {
        match self {
            Resolution::Submitted(_) => "submitted",
            Resolution::Cancelled { explicit: true } => "cancelled",
            Resolution::Cancelled { explicit: false } => "cancelled (implicit)",
            Resolution::TimedOut => "timed out",
        }
    }
}

// ============================================================================
// CredentialSession
// ============================================================================

/// One prompt and the barrier its callers wait on.
#[derive(Debug)]
pub struct CredentialSession {
    id: Uuid,
    url: String,
    slot: Mutex<Option<Resolution>>,
    released: Condvar,
    showing: AtomicBool,
    disposed: AtomicBool,
    waiters: AtomicUsize,
}

impl CredentialSession {
    fn new(url: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            slot: Mutex::new(None),
            released: Condvar::new(),
            showing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            waiters: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true while the prompt is on screen.
    pub fn is_showing(&self) -> bool {
        self.showing.load(Ordering::SeqCst)
    }

    /// Returns true once the barrier has been released.
    pub fn is_resolved(&self) -> bool {
        self.resolution().is_some()
    }

    fn resolution(&self) -> Option<Resolution> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Releases the barrier. Only the first resolution is kept.
    fn resolve(&self, resolution: Resolution) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        tracing::debug!(session = %self.id, outcome = resolution.label(), "サインイン画面の結果を受信");
        *slot = Some(resolution);
        self.released.notify_all();
        true
    }

    /// Blocks until resolved or `timeout` elapses.
    ///
    /// Each waiter has its own deadline. Only the last waiter to time out
    /// resolves the session as timed out; earlier ones return `TimedOut`
    /// and leave the prompt to the others.
    fn wait(&self, timeout: Duration) -> Resolution {
        let deadline = Instant::now() + timeout;

        // `waiters` only changes under the slot lock
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let resolution = loop {
            if let Some(resolution) = slot.as_ref() {
                break resolution.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                if self.waiters.load(Ordering::SeqCst) == 1 {
                    tracing::debug!(session = %self.id, "サインイン待機がタイムアウトしました");
                    *slot = Some(Resolution::TimedOut);
                    self.released.notify_all();
                } else {
                    tracing::debug!(session = %self.id, "他の待機者を残してサインイン待機を終了します");
                }
                break Resolution::TimedOut;
            }
            let (guard, _) = self
                .released
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        drop(slot);

        resolution
    }
}

// ============================================================================
// PromptResponder / PromptRequest
// ============================================================================

/// Callbacks the prompt surface uses to answer. Safe to call from the UI
/// thread; they never block.
#[derive(Debug, Clone)]
pub struct PromptResponder {
    session: Arc<CredentialSession>,
}

impl PromptResponder {
    /// Submits a credential.
    ///
    /// Returns false (and keeps the prompt open) if the input is empty or
    /// the session was already resolved.
    pub fn on_submit(&self, secret: &str) -> bool {
        match Credential::new(secret) {
            Some(credential) => self.session.resolve(Resolution::Submitted(credential)),
            None => false,
        }
    }

    /// Cancels the prompt.
    pub fn on_cancel(&self, explicit: bool) -> bool {
        self.session.resolve(Resolution::Cancelled { explicit })
    }
}

/// What the UI thread needs to show a prompt.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    /// Session identifier, used by focus and dispose
    pub id: Uuid,
    /// Sign-in page to open
    pub url: String,
    /// Answers the prompt
    pub responder: PromptResponder,
}

// ============================================================================
// GateTimings
// ============================================================================

/// Readiness polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateTimings {
    /// How long a UI ping may take
    pub ping_timeout: Duration,
    /// Readiness checks before showing the prompt anyway
    pub readiness_retries: u32,
    /// Sleep between readiness checks
    pub retry_delay: Duration,
    /// No prompt within this long after a resume from sleep
    pub wake_stabilization: Duration,
}

impl Default for GateTimings {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(500),
            readiness_retries: 20,
            retry_delay: Duration::from_millis(500),
            wake_stabilization: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// CredentialGate
// ============================================================================

/// Process-wide owner of the single [`CredentialSession`].
#[derive(Debug)]
pub struct CredentialGate {
    ui: UiHandle,
    wake: Arc<WakeClock>,
    timings: GateTimings,
    current: Mutex<Option<Arc<CredentialSession>>>,
    sessions_created: AtomicUsize,
}

impl CredentialGate {
    pub fn new(ui: UiHandle, wake: Arc<WakeClock>) -> Self {
        Self {
            ui,
            wake,
            timings: GateTimings::default(),
            current: Mutex::new(None),
            sessions_created: AtomicUsize::new(0),
        }
    }

    /// Overrides readiness polling (tests use short values).
    pub fn with_timings(mut self, timings: GateTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Shows the sign-in prompt (or joins the one already showing) and
    /// blocks until it is answered or `timeout` elapses.
    ///
    /// Returns `Ok(None)` when the prompt was cancelled or timed out.
    /// `timeout` bounds this caller only: a prompt other callers still wait
    /// on stays open when it runs out.
    ///
    /// # Errors
    ///
    /// - `OnUiThread` if called on the UI-owning thread
    /// - `UiUnavailable` if the UI loop has stopped
    pub fn prompt_and_wait(
        &self,
        sign_in_url: &str,
        timeout: Duration,
    ) -> Result<Option<Credential>, CredentialError> {
        if self.ui.is_ui_thread() {
            return Err(CredentialError::OnUiThread);
        }

        let (session, created) = self.join_or_create(sign_in_url);

        if created {
            self.wait_until_ready(&session);
            if !session.is_resolved() && !self.show(&session) {
                session.resolve(Resolution::Cancelled { explicit: false });
                self.finish(&session, &Resolution::Cancelled { explicit: false });
                return Err(CredentialError::UiUnavailable);
            }
        } else if session.is_showing() {
            self.ui.post(UiCommand::FocusPrompt(session.id()));
        }

        let resolution = session.wait(timeout);
        if let Some(settled) = session.resolution() {
            self.finish(&session, &settled);
        }

        Ok(match resolution {
            Resolution::Submitted(credential) => Some(credential),
            Resolution::Cancelled { .. } | Resolution::TimedOut => None,
        })
    }

    /// Answers the open prompt with a credential.
    ///
    /// # Errors
    ///
    /// `EmptyCredential` for blank input, `NoActivePrompt` if nothing is
    /// waiting.
    pub fn submit(&self, secret: &str) -> Result<(), CredentialError> {
        if Credential::new(secret).is_none() {
            return Err(CredentialError::EmptyCredential);
        }
        let session = self.live_session().ok_or(CredentialError::NoActivePrompt)?;
        if (PromptResponder { session }).on_submit(secret) {
            Ok(())
        } else {
            Err(CredentialError::NoActivePrompt)
        }
    }

    /// Cancels the open prompt.
    ///
    /// # Errors
    ///
    /// `NoActivePrompt` if nothing is waiting.
    pub fn cancel(&self, explicit: bool) -> Result<(), CredentialError> {
        let session = self.live_session().ok_or(CredentialError::NoActivePrompt)?;
        if (PromptResponder { session }).on_cancel(explicit) {
            Ok(())
        } else {
            Err(CredentialError::NoActivePrompt)
        }
    }

    /// Returns true while a prompt is on screen.
    pub fn is_showing(&self) -> bool {
        self.live_session().is_some_and(|s| s.is_showing())
    }

    /// Returns true while any caller is waiting for a credential.
    pub fn is_pending(&self) -> bool {
        self.live_session().is_some()
    }

    /// Total sessions created since startup.
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    fn live_session(&self) -> Option<Arc<CredentialSession>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|s| !s.is_resolved())
            .cloned()
    }

    fn join_or_create(&self, url: &str) -> (Arc<CredentialSession>, bool) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref().filter(|s| !s.is_resolved()) {
            tracing::debug!(session = %existing.id(), "既存のサインイン画面に合流します");
            return (Arc::clone(existing), false);
        }

        let session = Arc::new(CredentialSession::new(url));
        *current = Some(Arc::clone(&session));
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        tracing::info!(session = %session.id(), "サインイン画面を作成します");
        (session, true)
    }

    /// Polls until the UI thread answers a ping and the system is not in
    /// the post-wake window. Gives up after the retry budget and proceeds.
    fn wait_until_ready(&self, session: &CredentialSession) -> bool {
        for attempt in 1..=self.timings.readiness_retries {
            if session.is_resolved() {
                return false;
            }
            let responsive = self.ui.ping(self.timings.ping_timeout);
            let stabilizing = self.wake.is_stabilizing(self.timings.wake_stabilization);
            if responsive && !stabilizing {
                return true;
            }
            tracing::debug!(attempt, responsive, stabilizing, "サインイン画面の表示を待機中");
            thread::sleep(self.timings.retry_delay);
        }
        tracing::warn!(
            retries = self.timings.readiness_retries,
            "UIの準備が確認できないままサインイン画面を表示します"
        );
        false
    }

    fn show(&self, session: &Arc<CredentialSession>) -> bool {
        session.showing.store(true, Ordering::SeqCst);
        self.post_prompt(session)
    }

    /// Posts the prompt to the UI thread. A session finished before or
    /// during the post gets a dispose queued behind it.
    fn post_prompt(&self, session: &Arc<CredentialSession>) -> bool {
        let posted = self.ui.post(UiCommand::ShowPrompt(PromptRequest {
            id: session.id(),
            url: session.url().to_string(),
            responder: PromptResponder {
                session: Arc::clone(session),
            },
        }));
        if !posted {
            session.showing.store(false, Ordering::SeqCst);
            return false;
        }

        // `finish` may have disposed before the show was queued; a second
        // dispose is harmless
        if session.disposed.load(Ordering::SeqCst) {
            session.showing.store(false, Ordering::SeqCst);
            self.ui.post(UiCommand::DisposePrompt {
                id: session.id(),
                show_cancel_message: false,
            });
        }
        true
    }

    /// Clears the singleton and disposes the prompt. Runs once per session.
    fn finish(&self, session: &Arc<CredentialSession>, resolution: &Resolution) {
        if session.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, session)) {
                *current = None;
            }
        }

        if session.showing.swap(false, Ordering::SeqCst) {
            self.ui.post(UiCommand::DisposePrompt {
                id: session.id(),
                show_cancel_message: matches!(resolution, Resolution::Cancelled { explicit: true }),
            });
        }
        tracing::info!(session = %session.id(), outcome = resolution.label(), "サインイン画面を閉じました");
    }
}

// ============================================================================
// Tests
// ============================================================================
