//! Full-screen overlay channel.
//!
//! An [`OverlayRenderer`] flashes the upcoming meetings across the screen.
//! Backends that can tell when the overlay is actually visible fire a
//! one-shot [`ReadySignal`]; the dispatcher holds the banner back until
//! then so the overlay never covers it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::types::CalendarEvent;

// ============================================================================
// OverlayError
// ============================================================================

/// Overlay rendering errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverlayError {
    /// No display to draw on
    #[error("オーバーレイを表示できるディスプレイがありません")]
    NoDisplay,

    /// The backend failed while drawing
    #[error("オーバーレイの描画に失敗しました: {0}")]
    RenderFailed(String),
}

impl OverlayError {
    /// Returns true if retrying later cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, OverlayError::NoDisplay)
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            OverlayError::NoDisplay => "ディスプレイの接続を確認してください",
            OverlayError::RenderFailed(_) => "ログを確認してください",
        }
    }
}

// ============================================================================
// Ready signal
// ============================================================================

/// Fired once by the renderer when the overlay becomes visible.
#[derive(Debug)]
pub struct ReadySignal {
    tx: Sender<Instant>,
}

impl ReadySignal {
    /// Reports that the overlay is visible now.
    pub fn notify(self) {
        let _ = self.tx.try_send(Instant::now());
    }
}

/// Receiving side of a [`ReadySignal`].
#[derive(Debug)]
pub struct ReadyWaiter {
    rx: Receiver<Instant>,
}

/// How waiting for the overlay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// The overlay became visible at this instant
    Ready(Instant),
    /// The renderer dropped the signal without firing it (usually a failure)
    Abandoned,
    /// Nothing happened in time
    TimedOut,
}

impl ReadyWaiter {
    /// Blocks until the signal fires, is dropped, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> ReadyOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(at) => ReadyOutcome::Ready(at),
            Err(RecvTimeoutError::Disconnected) => ReadyOutcome::Abandoned,
            Err(RecvTimeoutError::Timeout) => ReadyOutcome::TimedOut,
        }
    }
}

/// Creates a connected signal/waiter pair.
pub fn ready_channel() -> (ReadySignal, ReadyWaiter) {
    let (tx, rx) = bounded(1);
    (ReadySignal { tx }, ReadyWaiter { rx })
}

// ============================================================================
// OverlayRenderer
// ============================================================================

/// What to flash.
#[derive(Debug, Clone)]
pub struct OverlayRequest {
    pub events: Vec<CalendarEvent>,
    /// Background opacity in percent
    pub opacity: u8,
    /// How long the overlay stays up
    pub duration: Duration,
}

/// Full-screen overlay backend. Called on a dedicated worker thread.
pub trait OverlayRenderer: Send + Sync {
    /// Returns true if `flash` fires the ready signal once visible.
    fn supports_ready_signal(&self) -> bool;

    /// Shows the overlay. May block for the whole display duration.
    ///
    /// # Errors
    ///
    /// Returns an error if the overlay could not be shown.
    fn flash(&self, request: &OverlayRequest, ready: ReadySignal) -> Result<(), OverlayError>;
}

/// Formats one line per event, e.g. `10:00 定例会議 (3分後)`.
pub fn format_overlay_lines(events: &[CalendarEvent], now: DateTime<Utc>) -> Vec<String> {
    events
        .iter()
        .map(|event| {
            let minutes = event.minutes_to_start(now);
            let when = if minutes <= 0 {
                "開始".to_string()
            } else {
                format!("{}分後", minutes)
            };
            let mut line = format!("{} {} ({})", event.start.format("%H:%M"), event.subject, when);
            if let Some(location) = event.location.as_deref() {
                line.push_str(&format!(" @ {}", location));
            }
            line
        })
        .collect()
}

// ============================================================================
// LogOverlay
// ============================================================================

/// Headless backend that writes the overlay to the log.
#[derive(Debug, Default)]
pub struct LogOverlay;

impl LogOverlay {
    pub fn new() -> Self {
        Self
    }
}

impl OverlayRenderer for LogOverlay {
    fn supports_ready_signal(&self) -> bool {
        true
    }

    fn flash(&self, request: &OverlayRequest, ready: ReadySignal) -> Result<(), OverlayError> {
        for line in format_overlay_lines(&request.events, Utc::now()) {
            tracing::warn!(opacity = request.opacity, "📅 {}", line);
        }
        ready.notify();
        Ok(())
    }
}

// ============================================================================
// MockOverlayRenderer
// ============================================================================

/// Overlay backend for tests.
#[derive(Debug)]
pub struct MockOverlayRenderer {
    supports_ready: AtomicBool,
    ready_delay: Mutex<Duration>,
    should_fail: AtomicBool,
    should_panic: AtomicBool,
    flashes: Mutex<Vec<OverlayRequest>>,
    ready_times: Mutex<Vec<Instant>>,
}

impl Default for MockOverlayRenderer {
    fn default() -> Self {
        Self {
            supports_ready: AtomicBool::new(true),
            ready_delay: Mutex::new(Duration::ZERO),
            should_fail: AtomicBool::new(false),
            should_panic: AtomicBool::new(false),
            flashes: Mutex::new(Vec::new()),
            ready_times: Mutex::new(Vec::new()),
        }
    }
}

impl MockOverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_supports_ready_signal(&self, supports: bool) {
        self.supports_ready.store(supports, Ordering::SeqCst);
    }

    /// Delays the ready signal, simulating a slow window server.
    pub fn set_ready_delay(&self, delay: Duration) {
        *self.ready_delay.lock().unwrap() = delay;
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_should_panic(&self, panic: bool) {
        self.should_panic.store(panic, Ordering::SeqCst);
    }

    pub fn flash_count(&self) -> usize {
        self.flashes.lock().unwrap().len()
    }

    pub fn flashes(&self) -> Vec<OverlayRequest> {
        self.flashes.lock().unwrap().clone()
    }

    /// Instants at which the ready signal fired.
    pub fn ready_times(&self) -> Vec<Instant> {
        self.ready_times.lock().unwrap().clone()
    }
}

impl OverlayRenderer for MockOverlayRenderer {
    fn supports_ready_signal(&self) -> bool {
        self.supports_ready.load(Ordering::SeqCst)
    }

    fn flash(&self, request: &OverlayRequest, ready: ReadySignal) -> Result<(), OverlayError> {
        self.flashes.lock().unwrap().push(request.clone());
        if self.should_panic.load(Ordering::SeqCst) {
            panic!("mock overlay crashed");
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(OverlayError::RenderFailed("mock failure".to_string()));
        }

        let delay = *self.ready_delay.lock().unwrap();
        thread::sleep(delay);
        if self.supports_ready_signal() {
            // Recorded before notify so the banner can never be earlier
            self.ready_times.lock().unwrap().push(Instant::now());
            ready.notify();
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
