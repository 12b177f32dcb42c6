//! macOS tray notices.
//!
//! Posts the "meeting starting soon" notice to Notification Center using
//! `objc2-user-notifications`. Delivery is fire-and-forget: failures reported
//! by the system are logged and never reach the alert dispatcher.
//!
//! # Requirements
//!
//! - macOS 10.14+
//! - The binary must be code-signed for notices to appear
//!
//! For development, use ad-hoc signing:
//! ```bash
//! codesign --force --deep --sign - target/release/meeting-alarm
//! ```

mod center;
mod content;
pub mod error;

use uuid::Uuid;

pub use self::content::{sanitize_text, NoticeContentBuilder};
pub use self::error::NotificationError;

use self::center::NotificationCenter;

/// Posts tray notices through Notification Center.
#[derive(Debug)]
pub struct TrayNotifier {
    _private: (),
}

impl TrayNotifier {
    /// Creates the notifier and asks for permission.
    pub fn new() -> Self {
        NotificationCenter::request_authorization();
        Self { _private: () }
    }

    /// Queues a notice.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the title is empty after sanitizing.
    pub fn notify(&self, title: &str, body: &str) -> Result<(), NotificationError> {
        let title = sanitize_text(title)
            .ok_or_else(|| NotificationError::InvalidInput("title".to_string()))?;
        let body = sanitize_text(body).unwrap_or_default();

        let content = NoticeContentBuilder::new()
            .title(&title)
            .body(&body)
            .silent()
            .build();

        NotificationCenter::add(&Uuid::new_v4().to_string(), &content);
        tracing::debug!(title = %title, "トレイ通知を送信しました");
        Ok(())
    }
}

impl Default for TrayNotifier {
    fn default() -> Self {
        Self::new()
    }
}
