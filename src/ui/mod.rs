//! UI-owning thread for the Meeting Alarm daemon.
//!
//! This module provides:
//! - `UiHandle`: a cloneable, non-blocking way to post work to the UI thread
//! - `UiLoop`: the loop that owns all rendering state and never blocks on
//!   I/O or on the credential barrier
//! - Tray title and menu generation (`icon.rs`, `menu.rs`)
//! - Rendering surfaces (`surface.rs`)
//!
//! # Architecture
//!
//! Scheduler jobs and workers run on other threads and send [`UiCommand`]s
//! through a crossbeam channel. The UI thread drains the channel with a
//! short receive timeout, expires the banner, and polls the surface for
//! menu clicks.
//!
//! ```ignore
//! use meeting_alarm::ui::{self, LogSurface};
//!
//! let (handle, ui_loop) = ui::channel();
//! // From any thread
//! handle.post(UiCommand::SetStatus("3件取得".into()));
//! // On the main thread
//! ui_loop.run(&mut LogSurface::new(), |_| {});
//! ```

pub mod event;
pub mod icon;
pub mod menu;
pub mod surface;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

pub use event::{EventHandler, MenuAction, MenuItemId, NextMeeting, UiCommand};
pub use icon::{IconManager, TrayStatus};
pub use menu::{MenuBuilder, MenuConfig, MenuItemConfig};
pub use surface::{LogSurface, PromptReply, RecordingSurface, SurfaceCall, UiSurface};

#[cfg(target_os = "macos")]
pub use surface::TraySurface;

use crate::daemon::worker::panic_message;

/// How long the UI loop waits for a command before running idle work.
const UI_TICK: Duration = Duration::from_millis(50);

/// Shown after the user explicitly cancels the sign-in prompt.
pub const SIGN_IN_CANCELLED_MESSAGE: &str = "サインインがキャンセルされました";

/// Creates a connected handle/loop pair.
pub fn channel() -> (UiHandle, UiLoop) {
    let (tx, rx) = unbounded();
    let ui_thread = Arc::new(OnceLock::new());
    (
        UiHandle {
            tx,
            ui_thread: Arc::clone(&ui_thread),
        },
        UiLoop { rx, ui_thread },
    )
}

// ============================================================================
// UiHandle
// ============================================================================

/// Cloneable sender side of the UI thread.
#[derive(Debug, Clone)]
pub struct UiHandle {
    tx: Sender<UiCommand>,
    ui_thread: Arc<OnceLock<ThreadId>>,
}

impl UiHandle {
    /// Posts a command without waiting.
    ///
    /// Returns false if the UI loop has stopped.
    pub fn post(&self, command: UiCommand) -> bool {
        let kind = command.kind();
        match self.tx.send(command) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(command = kind, "UIスレッドが停止しているためコマンドを破棄しました");
                false
            }
        }
    }

    /// Round-trips a no-op through the UI thread.
    ///
    /// Returns true if the UI thread answered within `timeout`.
    pub fn ping(&self, timeout: Duration) -> bool {
        let (tx, rx) = bounded(1);
        if !self.post(UiCommand::Ping(tx)) {
            return false;
        }
        rx.recv_timeout(timeout).is_ok()
    }

    /// Returns true when called on the UI-owning thread.
    pub fn is_ui_thread(&self) -> bool {
        self.ui_thread.get() == Some(&thread::current().id())
    }

    /// Asks the UI loop to stop.
    pub fn shutdown(&self) {
        self.post(UiCommand::Shutdown);
    }
}

// ============================================================================
// UiLoop
// ============================================================================

/// Receiver side of the UI thread.
#[derive(Debug)]
pub struct UiLoop {
    rx: Receiver<UiCommand>,
    ui_thread: Arc<OnceLock<ThreadId>>,
}

impl UiLoop {
    /// Runs the loop on the current thread until shutdown or Quit.
    ///
    /// The current thread becomes the UI-owning thread. `on_action`
    /// receives menu clicks on this thread and must not block.
    pub fn run(self, surface: &mut dyn UiSurface, mut on_action: impl FnMut(MenuAction)) {
        if self.ui_thread.set(thread::current().id()).is_err() {
            tracing::warn!("UIループは既に別スレッドで起動されています");
            return;
        }
        tracing::debug!("UIループを開始しました");

        let mut state = LoopState::default();
        loop {
            match self.rx.recv_timeout(UI_TICK) {
                Ok(UiCommand::Shutdown) => break,
                Ok(command) => {
                    let kind = command.kind();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        state.handle(surface, command);
                    }));
                    if let Err(payload) = result {
                        tracing::error!(
                            command = kind,
                            "UIコマンドの処理中にパニックが発生しました: {}",
                            panic_message(payload.as_ref())
                        );
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            state.expire_banner(surface, Instant::now());
            surface.idle();

            while let Some(action) = surface.poll_action() {
                on_action(action);
                if action == MenuAction::Quit {
                    tracing::info!("メニューから終了が選択されました");
                    return;
                }
            }
        }
        tracing::debug!("UIループを終了しました");
    }

    /// Runs the loop on a new thread named `ui`.
    ///
    /// The surface is created on that thread. Used by tests and headless
    /// runs where the main thread is busy elsewhere.
    pub fn spawn<S, F>(self, make_surface: F) -> std::io::Result<JoinHandle<()>>
    where
        S: UiSurface,
        F: FnOnce() -> S + Send + 'static,
    {
        thread::Builder::new().name("ui".to_string()).spawn(move || {
            let mut surface = make_surface();
            self.run(&mut surface, |_| {});
        })
    }
}

#[derive(Debug, Default)]
struct LoopState {
    status: TrayStatus,
    banner_deadline: Option<Instant>,
}

impl LoopState {
    fn handle(&mut self, surface: &mut dyn UiSurface, command: UiCommand) {
        match command {
            UiCommand::ShowBanner { text, duration } => {
                surface.show_banner(&text);
                self.banner_deadline = Some(Instant::now() + duration);
            }
            UiCommand::ShowTrayNotice { title, body } => surface.show_tray_notice(&title, &body),
            UiCommand::SetIconState(icon_state) => {
                if self.status.icon_state != icon_state {
                    self.status.icon_state = icon_state;
                    surface.render_status(&self.status);
                }
            }
            UiCommand::SetStatus(line) => {
                if self.status.status.as_deref() != Some(line.as_str()) {
                    self.status.status = Some(line);
                    surface.render_status(&self.status);
                }
            }
            UiCommand::SetNextMeeting(next) => {
                if self.status.next_meeting != next {
                    self.status.next_meeting = next;
                    surface.render_status(&self.status);
                }
            }
            UiCommand::ShowPrompt(request) => {
                self.status.prompt_showing = true;
                surface.show_prompt(request);
                surface.render_status(&self.status);
            }
            UiCommand::FocusPrompt(id) => surface.focus_prompt(id),
            UiCommand::DisposePrompt {
                id,
                show_cancel_message,
            } => {
                surface.dispose_prompt(id);
                if show_cancel_message {
                    surface.show_message(SIGN_IN_CANCELLED_MESSAGE);
                }
                self.status.prompt_showing = false;
                surface.render_status(&self.status);
            }
            UiCommand::Ping(reply) => {
                let _ = reply.send(());
            }
            UiCommand::Shutdown => {}
        }
    }

    fn expire_banner(&mut self, surface: &mut dyn UiSurface, now: Instant) {
        if self.banner_deadline.is_some_and(|deadline| now >= deadline) {
            self.banner_deadline = None;
            surface.dismiss_banner();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
