//! Tray title generation.
//!
//! This module handles:
//! - The display state mirrored on the UI thread
//! - Generating the tray title (e.g., "📅 5分後 定例")
//!
//! The text generation logic is platform-independent and fully testable.

use crate::types::IconState;

use super::event::NextMeeting;

// ============================================================================
// Constants
// ============================================================================

/// Shown while the credential is valid
const CALENDAR_EMOJI: &str = "📅";

/// Shown when a meeting is about to start
const ALERT_EMOJI: &str = "🔔";

/// Shown when sign-in is required
const WARNING_EMOJI: &str = "⚠️";

/// Subjects longer than this are truncated in the title.
const MAX_SUBJECT_CHARS: usize = 16;

/// Countdowns further out than this are not shown in the title.
const COUNTDOWN_HORIZON_MINUTES: i64 = 60;

// ============================================================================
// TrayStatus
// ============================================================================

/// Display state owned by the UI thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrayStatus {
    /// Credential health
    pub icon_state: IconState,
    /// Last fetch status line
    pub status: Option<String>,
    /// Upcoming meeting for the countdown
    pub next_meeting: Option<NextMeeting>,
    /// Whether a sign-in prompt is open
    pub prompt_showing: bool,
}

// ============================================================================
// IconManager
// ============================================================================

/// Generates the tray title from the display state.
#[derive(Debug, Default)]
pub struct IconManager {
    /// Last rendered title, used to skip redundant updates
    last_title: Option<String>,
}

impl IconManager {
    /// Creates a new IconManager.
    pub fn new() -> Self {
        Self { last_title: None }
    }

    /// Generates the title text for the tray.
    ///
    /// Format:
    /// - Sign-in required: "⚠️ 要サインイン"
    /// - Meeting within the horizon: "📅 12分後 定例" ("🔔" once it is 1 minute away or less)
    /// - Otherwise: "📅"
    pub fn generate_title(&self, status: &TrayStatus) -> String {
        if status.icon_state == IconState::Invalid {
            return format!("{} 要サインイン", WARNING_EMOJI);
        }

        match &status.next_meeting {
            Some(next) if next.minutes_to_start <= COUNTDOWN_HORIZON_MINUTES => {
                let emoji = if next.minutes_to_start <= 1 {
                    ALERT_EMOJI
                } else {
                    CALENDAR_EMOJI
                };
                format!(
                    "{} {} {}",
                    emoji,
                    Self::format_countdown(next.minutes_to_start),
                    truncate_subject(&next.subject)
                )
            }
            _ => CALENDAR_EMOJI.to_string(),
        }
    }

    /// Returns the title if it differs from the last one returned.
    pub fn title_if_changed(&mut self, status: &TrayStatus) -> Option<String> {
        let title = self.generate_title(status);
        if self.last_title.as_deref() == Some(title.as_str()) {
            return None;
        }
        self.last_title = Some(title.clone());
        Some(title)
    }

    /// Formats minutes-to-start for display.
    pub fn format_countdown(minutes_to_start: i64) -> String {
        if minutes_to_start <= 0 {
            "開始".to_string()
        } else {
            format!("{}分後", minutes_to_start)
        }
    }
}

fn truncate_subject(subject: &str) -> String {
    if subject.chars().count() <= MAX_SUBJECT_CHARS {
        subject.to_string()
    } else {
        let head: String = subject.chars().take(MAX_SUBJECT_CHARS).collect();
        format!("{}…", head)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn next(subject: &str, minutes: i64) -> Option<NextMeeting> {
        Some(NextMeeting {
            subject: subject.to_string(),
            minutes_to_start: minutes,
        })
    }

    mod title_generation_tests {
        use super::*;

        #[test]
        fn test_idle_title() {
            let manager = IconManager::new();
            assert_eq!(manager.generate_title(&TrayStatus::default()), "📅");
        }

        #[test]
        fn test_invalid_credential_title() {
            let manager = IconManager::new();
            let status = TrayStatus {
                icon_state: IconState::Invalid,
                next_meeting: next("定例", 3),
                ..TrayStatus::default()
            };
            assert_eq!(manager.generate_title(&status), "⚠️ 要サインイン");
        }

        #[test]
        fn test_countdown_title() {
            let manager = IconManager::new();
            let status = TrayStatus {
                next_meeting: next("定例", 12),
                ..TrayStatus::default()
            };
            assert_eq!(manager.generate_title(&status), "📅 12分後 定例");
        }

        #[test]
        fn test_imminent_title() {
            let manager = IconManager::new();
            let status = TrayStatus {
                next_meeting: next("定例", 0),
                ..TrayStatus::default()
            };
            assert_eq!(manager.generate_title(&status), "🔔 開始 定例");
        }

        #[test]
        fn test_beyond_horizon_hides_countdown() {
            let manager = IconManager::new();
            let status = TrayStatus {
                next_meeting: next("定例", 61),
                ..TrayStatus::default()
            };
            assert_eq!(manager.generate_title(&status), "📅");
        }

        #[test]
        fn test_long_subject_truncated() {
            let manager = IconManager::new();
            let status = TrayStatus {
                next_meeting: next("Quarterly business review with finance", 5),
                ..TrayStatus::default()
            };
            let title = manager.generate_title(&status);
            assert!(title.ends_with('…'));
            assert!(title.starts_with("📅 5分後 Quarterly"));
        }
    }

    mod change_detection_tests {
        use super::*;

        #[test]
        fn test_title_if_changed() {
            let mut manager = IconManager::new();
            let status = TrayStatus::default();

            assert_eq!(manager.title_if_changed(&status), Some("📅".to_string()));
            assert_eq!(manager.title_if_changed(&status), None);

            let status = TrayStatus {
                icon_state: IconState::Invalid,
                ..TrayStatus::default()
            };
            assert!(manager.title_if_changed(&status).is_some());
        }
    }
}
