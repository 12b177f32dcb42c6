//! Tray menu configuration.
//!
//! This module decides which menu items exist and which are enabled for
//! the current display state. Actual menu creation with tray-icon happens
//! in the platform-specific surface.

use crate::types::IconState;

use super::icon::{IconManager, TrayStatus};

// ============================================================================
// MenuItemConfig
// ============================================================================

/// Configuration for a menu item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItemConfig {
    /// Display text for the menu item
    pub text: String,
    /// Whether the menu item is enabled (clickable)
    pub enabled: bool,
}

impl MenuItemConfig {
    /// Creates a new menu item configuration.
    pub fn new(text: impl Into<String>, enabled: bool) -> Self {
        Self {
            text: text.into(),
            enabled,
        }
    }
}

// ============================================================================
// MenuConfig
// ============================================================================

/// Complete menu configuration for one display state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuConfig {
    /// Title item (always disabled)
    pub title: MenuItemConfig,
    /// Status lines (always disabled)
    pub status_items: Vec<MenuItemConfig>,
    /// Refresh now
    pub refresh: MenuItemConfig,
    /// Sign in (enabled while the credential is invalid and no prompt is open)
    pub sign_in: MenuItemConfig,
    /// Quit (always enabled)
    pub quit: MenuItemConfig,
}

// ============================================================================
// MenuBuilder
// ============================================================================

/// Builds menu configuration from the display state.
#[derive(Debug, Default)]
pub struct MenuBuilder;

impl MenuBuilder {
    /// Creates a new MenuBuilder.
    pub fn new() -> Self {
        Self
    }

    /// Builds a complete menu configuration.
    pub fn build(&self, status: &TrayStatus) -> MenuConfig {
        MenuConfig {
            title: MenuItemConfig::new("Meeting Alarm", false),
            status_items: self.build_status_items(status),
            refresh: MenuItemConfig::new("🔄 今すぐ同期", true),
            sign_in: MenuItemConfig::new("🔑 サインイン", Self::is_sign_in_enabled(status)),
            quit: MenuItemConfig::new("終了", true),
        }
    }

    fn build_status_items(&self, status: &TrayStatus) -> Vec<MenuItemConfig> {
        let mut items = Vec::new();

        let credential = match status.icon_state {
            IconState::Valid => "認証: 有効",
            IconState::Invalid => "認証: 要サインイン",
        };
        items.push(MenuItemConfig::new(credential, false));

        if let Some(ref line) = status.status {
            items.push(MenuItemConfig::new(format!("同期: {}", line), false));
        }

        match status.next_meeting {
            Some(ref next) => items.push(MenuItemConfig::new(
                format!(
                    "次の会議: {} ({})",
                    next.subject,
                    IconManager::format_countdown(next.minutes_to_start)
                ),
                false,
            )),
            None => items.push(MenuItemConfig::new("次の会議: なし", false)),
        }

        items
    }

    /// Sign-in is offered while the credential is invalid and no prompt is open.
    pub fn is_sign_in_enabled(status: &TrayStatus) -> bool {
        status.icon_state == IconState::Invalid && !status.prompt_showing
    }
}

// ============================================================================
// Tests
// ============================================================================
