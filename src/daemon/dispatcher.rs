//! Alert dispatcher: fans one alert out to every channel.
//!
//! ```text
//!                 ┌─▶ audio worker ── beeps (optional repeat after overlay)
//! dispatch() ─────┼─▶ overlay worker ── flash ──(ready)──┐
//!   (returns      ├─▶ banner worker ── wait ready ───────┴─▶ UI: ShowBanner
//!    at once)     └─▶ UI: ShowTrayNotice
//! ```
//!
//! Every leg is independent. A failing or panicking leg is logged at its
//! own boundary and never stops the others. The banner waits for the
//! overlay's ready signal (or a short fixed delay when the backend has
//! none), so the overlay is never stacked on top of the banner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::overlay::{format_overlay_lines, ready_channel, OverlayRenderer, OverlayRequest, ReadyOutcome};
use crate::sound::AudioCue;
use crate::types::CalendarEvent;
use crate::ui::{UiCommand, UiHandle};

use super::config::ConfigStore;
use super::worker::spawn_worker;

// ============================================================================
// AlertRequest
// ============================================================================

/// One alert, ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    /// Banner text
    pub alert_text: String,
    /// Tray notice title
    pub notification_title: String,
    /// Tray notice body
    pub notification_body: String,
    /// Events shown on the overlay; empty means no overlay
    pub events: Vec<CalendarEvent>,
}

impl AlertRequest {
    pub fn new(
        alert_text: impl Into<String>,
        notification_title: impl Into<String>,
        notification_body: impl Into<String>,
        events: Vec<CalendarEvent>,
    ) -> Self {
        Self {
            alert_text: alert_text.into(),
            notification_title: notification_title.into(),
            notification_body: notification_body.into(),
            events,
        }
    }

    /// Builds the texts for a set of due events.
    pub fn for_events(events: Vec<CalendarEvent>, now: DateTime<Utc>) -> Self {
        let alert_text = match events.as_slice() {
            [event] => {
                let minutes = event.minutes_to_start(now);
                if minutes > 0 {
                    format!("「{}」が{}分後に始まります", event.subject, minutes)
                } else {
                    format!("「{}」が始まります", event.subject)
                }
            }
            _ => format!("{}件の会議がまもなく始まります", events.len()),
        };
        let body = format_overlay_lines(&events, now).join("\n");
        Self::new(alert_text, "まもなく会議が始まります", body, events)
    }
}

/// Anything that can take an alert. Must not block the caller.
pub trait AlertSink: Send + Sync {
    /// Hands off an alert.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert could not be handed off at all.
    fn dispatch_alert(&self, request: AlertRequest) -> Result<()>;
}

// ============================================================================
// AlertDispatcher
// ============================================================================

/// Delays between channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTimings {
    /// Gap between consecutive beeps
    pub beep_spacing: Duration,
    /// Banner delay when the overlay cannot signal readiness
    pub banner_fallback_delay: Duration,
    /// Longest wait for the overlay's ready signal
    pub ready_timeout: Duration,
}

impl Default for DispatchTimings {
    fn default() -> Self {
        Self {
            beep_spacing: Duration::from_millis(400),
            banner_fallback_delay: Duration::from_millis(300),
            ready_timeout: Duration::from_secs(3),
        }
    }
}

/// Workers started by one dispatch.
///
/// Dropping the handle detaches them; [`wait`](Self::wait) is for tests and
/// orderly shutdown.
#[derive(Debug, Default)]
pub struct DispatchHandle {
    workers: Vec<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Number of worker threads started.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Blocks until every worker has finished.
    pub fn wait(self) {
        for worker in self.workers {
            // Panics were already caught and logged inside the worker
            let _ = worker.join();
        }
    }
}

/// Sequences the alert channels.
pub struct AlertDispatcher {
    audio: Arc<dyn AudioCue>,
    overlay: Arc<dyn OverlayRenderer>,
    ui: UiHandle,
    config: Arc<dyn ConfigStore>,
    timings: DispatchTimings,
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl AlertDispatcher {
    pub fn new(
        audio: Arc<dyn AudioCue>,
        overlay: Arc<dyn OverlayRenderer>,
        ui: UiHandle,
        config: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            audio,
            overlay,
            ui,
            config,
            timings: DispatchTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: DispatchTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Fires every channel and returns immediately.
    pub fn dispatch(&self, request: AlertRequest) -> DispatchHandle {
        let overlay_duration = Duration::from_secs(u64::from(self.config.overlay_duration_seconds()));
        let mut handle = DispatchHandle::default();

        tracing::info!(events = request.events.len(), "アラートを発火します: {}", request.alert_text);

        if let Some(worker) = self.start_audio(overlay_duration) {
            handle.workers.push(worker);
        }
        handle.workers.extend(self.start_overlay_and_banner(&request, overlay_duration));

        self.ui.post(UiCommand::ShowTrayNotice {
            title: request.notification_title,
            body: request.notification_body,
        });

        handle
    }

    fn start_audio(&self, overlay_duration: Duration) -> Option<JoinHandle<()>> {
        let count = self.config.beep_count();
        if count == 0 {
            return None;
        }
        let repeat_after_overlay = self.config.post_overlay_beep();
        let audio = Arc::clone(&self.audio);
        let spacing = self.timings.beep_spacing;

        spawn_worker("audio", move || {
            if let Err(e) = audio.play_sequence(count, spacing) {
                tracing::warn!("{} ({})", e, e.suggestion());
            }
            if repeat_after_overlay {
                thread::sleep(overlay_duration);
                if let Err(e) = audio.play_sequence(count, spacing) {
                    tracing::warn!("{} ({})", e, e.suggestion());
                }
            }
        })
    }

    fn start_overlay_and_banner(
        &self,
        request: &AlertRequest,
        overlay_duration: Duration,
    ) -> Vec<JoinHandle<()>> {
        let banner = UiCommand::ShowBanner {
            text: request.alert_text.clone(),
            duration: overlay_duration,
        };

        if request.events.is_empty() {
            self.ui.post(banner);
            return Vec::new();
        }

        let mut workers = Vec::with_capacity(2);
        let (signal, waiter) = ready_channel();
        let supports_ready = self.overlay.supports_ready_signal();

        let overlay = Arc::clone(&self.overlay);
        let overlay_request = OverlayRequest {
            events: request.events.clone(),
            opacity: u8::try_from(self.config.overlay_opacity().min(100)).unwrap_or(100),
            duration: overlay_duration,
        };
        // On spawn failure the closure (and the signal) is dropped, which
        // releases the banner below
        workers.extend(spawn_worker("overlay", move || {
            if let Err(e) = overlay.flash(&overlay_request, signal) {
                tracing::warn!("{} ({})", e, e.suggestion());
            }
        }));

        let ui = self.ui.clone();
        let timings = self.timings;
        workers.extend(spawn_worker("banner", move || {
            if supports_ready {
                match waiter.wait(timings.ready_timeout) {
                    ReadyOutcome::Ready(_) => {}
                    ReadyOutcome::Abandoned => {
                        tracing::debug!("オーバーレイが表示されなかったためバナーを即時表示します");
                    }
                    ReadyOutcome::TimedOut => {
                        tracing::warn!("オーバーレイの表示待ちがタイムアウトしました");
                    }
                }
            } else {
                thread::sleep(timings.banner_fallback_delay);
            }
            ui.post(banner);
        }));

        workers
    }
}

impl AlertSink for AlertDispatcher {
    fn dispatch_alert(&self, request: AlertRequest) -> Result<()> {
        // Detached: the evaluator never waits for the channels
        drop(self.dispatch(request));
        Ok(())
    }
}

// ============================================================================
// MockAlertSink
// ============================================================================

/// Records alerts instead of showing them.
#[derive(Debug, Default)]
pub struct MockAlertSink {
    requests: Mutex<Vec<AlertRequest>>,
    should_fail: AtomicBool,
}

impl MockAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn dispatch_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<AlertRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl AlertSink for MockAlertSink {
    fn dispatch_alert(&self, request: AlertRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request);
        if self.should_fail.load(Ordering::SeqCst) {
            anyhow::bail!("mock dispatch failure");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
