//! Rendering surfaces driven by the UI loop.
//!
//! A surface is owned by the UI thread and is never shared, so it does not
//! need to be `Send`. Every method must return quickly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use uuid::Uuid;

use crate::credential::PromptRequest;

use super::event::MenuAction;
use super::icon::{IconManager, TrayStatus};

// ============================================================================
// UiSurface
// ============================================================================

/// Everything the UI thread can render.
pub trait UiSurface {
    /// Shows the alert banner.
    fn show_banner(&mut self, text: &str);

    /// Hides the alert banner.
    fn dismiss_banner(&mut self);

    /// Shows a tray notification.
    fn show_tray_notice(&mut self, title: &str, body: &str);

    /// Re-renders the tray icon, title and menu.
    fn render_status(&mut self, status: &TrayStatus);

    /// Shows the sign-in prompt. The surface keeps `request` until disposed.
    fn show_prompt(&mut self, request: PromptRequest);

    /// Brings the open prompt to the front.
    fn focus_prompt(&mut self, id: Uuid);

    /// Closes the prompt.
    fn dispose_prompt(&mut self, id: Uuid);

    /// Shows a short informational message.
    fn show_message(&mut self, text: &str);

    /// Returns a pending menu action, if any.
    fn poll_action(&mut self) -> Option<MenuAction> {
        None
    }

    /// Called on every idle tick of the UI loop.
    fn idle(&mut self) {}
}

// ============================================================================
// LogSurface
// ============================================================================

/// Headless surface that renders everything to the log.
///
/// The sign-in prompt is answered with `meeting-alarm sign-in <TOKEN>`.
#[derive(Debug, Default)]
pub struct LogSurface {
    icon_manager: IconManager,
    open_prompt: Option<Uuid>,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UiSurface for LogSurface {
    fn show_banner(&mut self, text: &str) {
        tracing::warn!("🔔 {}", text);
    }

    fn dismiss_banner(&mut self) {
        tracing::debug!("バナーを閉じました");
    }

    fn show_tray_notice(&mut self, title: &str, body: &str) {
        tracing::info!(title = %title, "{}", body);
    }

    fn render_status(&mut self, status: &TrayStatus) {
        if let Some(title) = self.icon_manager.title_if_changed(status) {
            tracing::info!(title = %title, "ステータス更新");
        }
    }

    fn show_prompt(&mut self, request: PromptRequest) {
        tracing::warn!(
            url = %request.url,
            "サインインが必要です。ブラウザでURLを開き、`meeting-alarm sign-in <TOKEN>` を実行してください"
        );
        self.open_prompt = Some(request.id);
    }

    fn focus_prompt(&mut self, id: Uuid) {
        if self.open_prompt == Some(id) {
            tracing::warn!("サインイン待ちです");
        }
    }

    fn dispose_prompt(&mut self, id: Uuid) {
        if self.open_prompt == Some(id) {
            self.open_prompt = None;
        }
    }

    fn show_message(&mut self, text: &str) {
        tracing::info!("{}", text);
    }
}

// ============================================================================
// RecordingSurface
// ============================================================================

/// A call observed by [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Banner(String),
    BannerDismissed,
    TrayNotice { title: String, body: String },
    Status(TrayStatus),
    PromptShown(Uuid),
    PromptFocused(Uuid),
    PromptDisposed(Uuid),
    Message(String),
}

/// How a [`RecordingSurface`] answers a prompt as soon as it is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptReply {
    Submit(String),
    Cancel,
}

/// Surface that records every call with a timestamp.
///
/// Clones share the same log, so a test keeps one clone while the UI
/// thread owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    calls: Arc<Mutex<Vec<(Instant, SurfaceCall)>>>,
    actions: Arc<Mutex<VecDeque<MenuAction>>>,
    reply: Arc<Mutex<Option<PromptReply>>>,
    panic_on_banner: Arc<AtomicBool>,
}

impl RecordingSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every future prompt with `reply`.
    pub fn set_prompt_reply(&self, reply: Option<PromptReply>) {
        *self.reply.lock().unwrap() = reply;
    }

    /// Makes `show_banner` panic.
    pub fn set_panic_on_banner(&self, panic: bool) {
        self.panic_on_banner.store(panic, Ordering::SeqCst);
    }

    /// Queues a menu action as if the user clicked it.
    pub fn push_action(&self, action: MenuAction) {
        self.actions.lock().unwrap().push_back(action);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Timestamps of every banner shown.
    #[must_use]
    pub fn banner_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, call)| matches!(call, SurfaceCall::Banner(_)))
            .map(|(at, _)| *at)
            .collect()
    }

    #[must_use]
    pub fn count(&self, predicate: impl Fn(&SurfaceCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, call)| predicate(call))
            .count()
    }

    fn record(&self, call: SurfaceCall) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }
}

impl UiSurface for RecordingSurface {
    fn show_banner(&mut self, text: &str) {
        if self.panic_on_banner.load(Ordering::SeqCst) {
            panic!("banner renderer crashed");
        }
        self.record(SurfaceCall::Banner(text.to_string()));
    }

    fn dismiss_banner(&mut self) {
        self.record(SurfaceCall::BannerDismissed);
    }

    fn show_tray_notice(&mut self, title: &str, body: &str) {
        self.record(SurfaceCall::TrayNotice {
            title: title.to_string(),
            body: body.to_string(),
        });
    }

    fn render_status(&mut self, status: &TrayStatus) {
        self.record(SurfaceCall::Status(status.clone()));
    }

    fn show_prompt(&mut self, request: PromptRequest) {
        self.record(SurfaceCall::PromptShown(request.id));
        let reply = self.reply.lock().unwrap().clone();
        match reply {
            Some(PromptReply::Submit(secret)) => {
                request.responder.on_submit(&secret);
            }
            Some(PromptReply::Cancel) => {
                request.responder.on_cancel(true);
            }
            None => {}
        }
    }

    fn focus_prompt(&mut self, id: Uuid) {
        self.record(SurfaceCall::PromptFocused(id));
    }

    fn dispose_prompt(&mut self, id: Uuid) {
        self.record(SurfaceCall::PromptDisposed(id));
    }

    fn show_message(&mut self, text: &str) {
        self.record(SurfaceCall::Message(text.to_string()));
    }

    fn poll_action(&mut self) -> Option<MenuAction> {
        self.actions.lock().unwrap().pop_front()
    }
}

// ============================================================================
// TraySurface (macOS)
// ============================================================================

#[cfg(target_os = "macos")]
pub use self::tray::TraySurface;

#[cfg(target_os = "macos")]
mod tray {
    use std::collections::HashMap;

    use anyhow::{Context, Result};
    use tray_icon::menu::{Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem};
    use tray_icon::{TrayIcon, TrayIconBuilder};
    use uuid::Uuid;

    use super::{LogSurface, UiSurface};
    use crate::credential::PromptRequest;
    use crate::notification::TrayNotifier;
    use crate::ui::event::{EventHandler, MenuAction, MenuItemId};
    use crate::ui::icon::{IconManager, TrayStatus};
    use crate::ui::menu::{MenuBuilder, MenuConfig};

    /// Menu bar surface backed by tray-icon and Notification Center.
    ///
    /// Must be created on the main thread.
    pub struct TraySurface {
        tray_icon: TrayIcon,
        icon_manager: IconManager,
        menu_builder: MenuBuilder,
        event_handler: EventHandler,
        notifier: TrayNotifier,
        item_ids: HashMap<MenuId, MenuItemId>,
        status: TrayStatus,
        banner: Option<String>,
        fallback: LogSurface,
    }

    impl TraySurface {
        /// Creates the tray icon.
        ///
        /// # Errors
        ///
        /// Returns an error if the tray icon cannot be created.
        pub fn new() -> Result<Self> {
            let status = TrayStatus::default();
            let icon_manager = IconManager::new();
            let menu_builder = MenuBuilder::new();
            let (menu, item_ids) = build_native_menu(&menu_builder.build(&status))?;

            let tray_icon = TrayIconBuilder::new()
                .with_title(icon_manager.generate_title(&status))
                .with_menu(Box::new(menu))
                .with_tooltip("Meeting Alarm")
                .build()
                .context("トレイアイコンの作成に失敗しました")?;

            tracing::info!("メニューバーアイコンを初期化しました");
            Ok(Self {
                tray_icon,
                icon_manager,
                menu_builder,
                event_handler: EventHandler::new(),
                notifier: TrayNotifier::new(),
                item_ids,
                status,
                banner: None,
                fallback: LogSurface::new(),
            })
        }

        fn refresh_title(&mut self) {
            let title = match self.banner {
                Some(ref text) => format!("🔔 {}", text),
                None => self.icon_manager.generate_title(&self.status),
            };
            self.tray_icon.set_title(Some(title));
        }

        fn rebuild_menu(&mut self) {
            match build_native_menu(&self.menu_builder.build(&self.status)) {
                Ok((menu, ids)) => {
                    self.item_ids = ids;
                    self.tray_icon.set_menu(Some(Box::new(menu)));
                }
                Err(e) => tracing::warn!("メニューの再構築に失敗しました: {}", e),
            }
        }
    }

    impl UiSurface for TraySurface {
        fn show_banner(&mut self, text: &str) {
            let first_line = text.lines().next().unwrap_or_default().to_string();
            self.banner = Some(first_line);
            self.refresh_title();
            self.fallback.show_banner(text);
        }

        fn dismiss_banner(&mut self) {
            self.banner = None;
            self.refresh_title();
        }

        fn show_tray_notice(&mut self, title: &str, body: &str) {
            if let Err(e) = self.notifier.notify(title, body) {
                tracing::warn!("{} ({})", e, e.suggestion());
            }
        }

        fn render_status(&mut self, status: &TrayStatus) {
            self.status = status.clone();
            self.refresh_title();
            self.rebuild_menu();
        }

        fn show_prompt(&mut self, request: PromptRequest) {
            self.fallback.show_prompt(request);
            self.tray_icon.set_tooltip(Some("サインインが必要です")).ok();
        }

        fn focus_prompt(&mut self, id: Uuid) {
            self.fallback.focus_prompt(id);
        }

        fn dispose_prompt(&mut self, id: Uuid) {
            self.fallback.dispose_prompt(id);
            self.tray_icon.set_tooltip(Some("Meeting Alarm")).ok();
        }

        fn show_message(&mut self, text: &str) {
            if let Err(e) = self.notifier.notify("Meeting Alarm", text) {
                tracing::warn!("{}", e);
            }
        }

        fn poll_action(&mut self) -> Option<MenuAction> {
            let event = MenuEvent::receiver().try_recv().ok()?;
            let item = self
                .item_ids
                .get(event.id())
                .copied()
                .unwrap_or(MenuItemId::Unknown);
            self.event_handler.handle_click(item)
        }

        fn idle(&mut self) {
            pump_run_loop();
        }
    }

    /// Lets AppKit process tray events for a short slice of time.
    fn pump_run_loop() {
        use objc2_foundation::{NSDate, NSRunLoop};

        let run_loop = unsafe { NSRunLoop::currentRunLoop() };
        let until = unsafe { NSDate::dateWithTimeIntervalSinceNow(0.01) };
        unsafe { run_loop.runUntilDate(&until) };
    }

    fn build_native_menu(config: &MenuConfig) -> Result<(Menu, HashMap<MenuId, MenuItemId>)> {
        let menu = Menu::new();
        let mut ids = HashMap::new();

        menu.append(&MenuItem::new(&config.title.text, false, None))?;
        menu.append(&PredefinedMenuItem::separator())?;

        for item in &config.status_items {
            menu.append(&MenuItem::new(&item.text, false, None))?;
        }
        menu.append(&PredefinedMenuItem::separator())?;

        for (item_config, item_id) in [
            (&config.refresh, MenuItemId::Refresh),
            (&config.sign_in, MenuItemId::SignIn),
        ] {
            let item = MenuItem::new(&item_config.text, item_config.enabled, None);
            ids.insert(item.id().clone(), item_id);
            menu.append(&item)?;
        }
        menu.append(&PredefinedMenuItem::separator())?;

        let quit = MenuItem::new(&config.quit.text, config.quit.enabled, None);
        ids.insert(quit.id().clone(), MenuItemId::Quit);
        menu.append(&quit)?;

        Ok((menu, ids))
    }
}

// ============================================================================
// Tests
// ============================================================================
