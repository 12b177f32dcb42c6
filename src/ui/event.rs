//! Messages exchanged with the UI-owning thread.
//!
//! This module handles:
//! - Commands posted to the UI thread from workers and scheduler jobs
//! - Tray menu actions flowing back out of the UI thread
//!
//! Everything here is platform-independent.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::credential::PromptRequest;
use crate::types::IconState;

// ============================================================================
// MenuAction
// ============================================================================

/// Actions that can be triggered from the tray menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    /// Fetch the calendar now
    Refresh,
    /// Open the sign-in prompt
    SignIn,
    /// Quit the daemon
    Quit,
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_command())
    }
}

impl MenuAction {
    /// Returns the control command name for this action.
    pub fn as_command(&self) -> &'static str {
        match self {
            MenuAction::Refresh => "refresh",
            MenuAction::SignIn => "signin",
            MenuAction::Quit => "quit",
        }
    }

    /// Returns a human-readable description of this action.
    pub fn description(&self) -> &'static str {
        match self {
            MenuAction::Refresh => "今すぐ同期",
            MenuAction::SignIn => "サインイン",
            MenuAction::Quit => "終了",
        }
    }
}

// ============================================================================
// MenuItemId
// ============================================================================

/// Identifiers for tray menu items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuItemId {
    Refresh,
    SignIn,
    Quit,
    /// Title, status lines and anything else without an action
    Unknown,
}

impl MenuItemId {
    /// Converts a menu item ID to the corresponding action.
    pub fn to_action(&self) -> Option<MenuAction> {
        match self {
            MenuItemId::Refresh => Some(MenuAction::Refresh),
            MenuItemId::SignIn => Some(MenuAction::SignIn),
            MenuItemId::Quit => Some(MenuAction::Quit),
            MenuItemId::Unknown => None,
        }
    }
}

// ============================================================================
// EventHandler
// ============================================================================

/// Converts menu clicks into actions.
#[derive(Debug, Default)]
pub struct EventHandler;

impl EventHandler {
    /// Creates a new EventHandler.
    pub fn new() -> Self {
        Self
    }

    /// Processes a menu item click and returns the corresponding action.
    pub fn handle_click(&self, item_id: MenuItemId) -> Option<MenuAction> {
        let action = item_id.to_action();
        if let Some(ref action) = action {
            tracing::info!(action = %action, "メニューからアクションを受信");
        }
        action
    }
}

// ============================================================================
// NextMeeting
// ============================================================================

/// The upcoming meeting summarized for the tray title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextMeeting {
    /// Meeting subject
    pub subject: String,
    /// Whole minutes until start
    pub minutes_to_start: i64,
}

// ============================================================================
// UiCommand
// ============================================================================

/// Work posted to the UI-owning thread.
///
/// Every variant is handled without blocking; posting never waits for the
/// UI thread.
#[derive(Debug)]
pub enum UiCommand {
    /// Show the alert banner, auto-dismissed after `duration`
    ShowBanner { text: String, duration: Duration },
    /// Show a tray notification
    ShowTrayNotice { title: String, body: String },
    /// Reflect credential health in the tray icon
    SetIconState(IconState),
    /// Short human-readable fetch status
    SetStatus(String),
    /// Update the next-meeting countdown in the tray title
    SetNextMeeting(Option<NextMeeting>),
    /// Show the sign-in prompt
    ShowPrompt(PromptRequest),
    /// Bring the existing sign-in prompt to the front
    FocusPrompt(Uuid),
    /// Close the sign-in prompt
    DisposePrompt { id: Uuid, show_cancel_message: bool },
    /// No-op round trip used to check that the UI thread is responsive
    Ping(Sender<()>),
    /// Stop the UI loop
    Shutdown,
}

impl UiCommand {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UiCommand::ShowBanner { .. } => "show_banner",
            UiCommand::ShowTrayNotice { .. } => "show_tray_notice",
            UiCommand::SetIconState(_) => "set_icon_state",
            UiCommand::SetStatus(_) => "set_status",
            UiCommand::SetNextMeeting(_) => "set_next_meeting",
            UiCommand::ShowPrompt(_) => "show_prompt",
            UiCommand::FocusPrompt(_) => "focus_prompt",
            UiCommand::DisposePrompt { .. } => "dispose_prompt",
            UiCommand::Ping(_) => "ping",
            UiCommand::Shutdown => "shutdown",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
