//! Sleep/resume detection.
//!
//! On macOS and Linux the monotonic clock stops while the machine is
//! suspended, but the wall clock keeps going. Polling both and comparing
//! the deltas reveals a resume. Other platforms get no monitor.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

/// How often the monitor compares clocks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum unexplained wall-clock gap treated as a suspend.
pub const DEFAULT_GAP_THRESHOLD: Duration = Duration::from_secs(30);

// ============================================================================
// WakeClock
// ============================================================================

/// Remembers the last resume so the credential gate can wait for the
/// desktop to settle.
#[derive(Debug, Default)]
pub struct WakeClock {
    last_resume: Mutex<Option<Instant>>,
}

impl WakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a resume at the current instant.
    pub fn record_resume(&self) {
        *self.last_resume.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn last_resume(&self) -> Option<Instant> {
        *self.last_resume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if a resume happened less than `window` ago.
    pub fn is_stabilizing(&self, window: Duration) -> bool {
        self.last_resume()
            .is_some_and(|resumed| resumed.elapsed() < window)
    }
}

/// Returns the suspended duration if the wall clock ran ahead of the
/// monotonic clock by at least `threshold`.
pub fn detect_resume_gap(
    monotonic_elapsed: Duration,
    wall_elapsed: Duration,
    threshold: Duration,
) -> Option<Duration> {
    wall_elapsed
        .checked_sub(monotonic_elapsed)
        .filter(|gap| *gap >= threshold)
}

/// Returns true on platforms where [`detect_resume_gap`] works.
pub const fn is_supported() -> bool {
    cfg!(any(target_os = "macos", target_os = "linux"))
}

// ============================================================================
// WakeMonitor
// ============================================================================

/// Background thread that calls `on_resume` after each detected resume.
#[derive(Debug)]
pub struct WakeMonitor {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl WakeMonitor {
    /// Starts the monitor, or returns `None` on unsupported platforms.
    ///
    /// `on_resume` runs on the monitor thread after the resume has been
    /// recorded in `clock`.
    pub fn spawn<F>(
        clock: Arc<WakeClock>,
        poll_interval: Duration,
        threshold: Duration,
        on_resume: F,
    ) -> Option<Self>
    where
        F: Fn() + Send + 'static,
    {
        if !is_supported() {
            tracing::debug!("この環境ではスリープ復帰の検出に対応していません");
            return None;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let spawned = thread::Builder::new()
            .name("wake-monitor".to_string())
            .spawn(move || {
                let mut last_mono = Instant::now();
                let mut last_wall = SystemTime::now();
                loop {
                    match stop_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let mono_now = Instant::now();
                    let wall_now = SystemTime::now();
                    let mono_elapsed = mono_now.duration_since(last_mono);
                    // A wall clock that went backwards is an NTP correction, not a resume
                    let wall_elapsed = wall_now.duration_since(last_wall).unwrap_or_default();
                    last_mono = mono_now;
                    last_wall = wall_now;

                    if let Some(gap) = detect_resume_gap(mono_elapsed, wall_elapsed, threshold) {
                        tracing::info!(suspended_secs = gap.as_secs(), "スリープからの復帰を検出しました");
                        clock.record_resume();
                        on_resume();
                    }
                }
                tracing::debug!("スリープ監視を終了しました");
            });

        match spawned {
            Ok(handle) => Some(Self { stop_tx, handle }),
            Err(e) => {
                tracing::warn!("スリープ監視スレッドを起動できませんでした: {}", e);
                None
            }
        }
    }

    /// Stops the monitor and waits for its thread.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::error!("スリープ監視スレッドがパニックで終了しました");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
