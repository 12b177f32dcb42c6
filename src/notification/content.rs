//! Notice content construction.

use objc2::rc::Retained;
use objc2_foundation::NSString;
use objc2_user_notifications::UNMutableNotificationContent;

/// Maximum length for notice text.
const MAX_TEXT_LENGTH: usize = 200;

/// Builder for tray notice content.
pub struct NoticeContentBuilder {
    content: Retained<UNMutableNotificationContent>,
}

impl NoticeContentBuilder {
    #[must_use]
    pub fn new() -> Self {
        let content = unsafe { UNMutableNotificationContent::new() };
        Self { content }
    }

    #[must_use]
    pub fn title(self, title: &str) -> Self {
        let title = NSString::from_str(title);
        unsafe {
            self.content.setTitle(&title);
        }
        self
    }

    #[must_use]
    pub fn body(self, body: &str) -> Self {
        let body = NSString::from_str(body);
        unsafe {
            self.content.setBody(&body);
        }
        self
    }

    /// Uses the silent variant; the alert beep comes from the audio channel.
    #[must_use]
    pub fn silent(self) -> Self {
        unsafe {
            self.content.setSound(None);
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Retained<UNMutableNotificationContent> {
        self.content
    }
}

impl Default for NoticeContentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates and strips control characters (newlines are kept).
///
/// Returns None if nothing printable remains.
pub fn sanitize_text(text: &str) -> Option<String> {
    let sanitized: String = text
        .chars()
        .take(MAX_TEXT_LENGTH)
        .filter(|c| *c == '\n' || !c.is_control())
        .collect();

    if sanitized.trim().is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("定例\u{7}"), Some("定例".to_string()));
        assert_eq!(sanitize_text("a\nb"), Some("a\nb".to_string()));
        assert_eq!(sanitize_text("  "), None);
        assert_eq!(sanitize_text(&"x".repeat(500)).map(|s| s.len()), Some(200));
    }
}
