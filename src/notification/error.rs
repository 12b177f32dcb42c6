//! Tray notice error types.

use thiserror::Error;

/// Errors that can occur while posting a tray notice.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The user has not allowed notifications.
    #[error("通知許可が拒否されています")]
    PermissionDenied,

    /// The notice could not be queued.
    #[error("通知の送信に失敗しました: {0}")]
    SendFailed(String),

    /// The notice text is empty after sanitizing.
    #[error("無効な入力: {0}")]
    InvalidInput(String),
}

impl NotificationError {
    /// Returns true if this error is related to permissions.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "システム設定 > 通知 で meeting-alarm の通知を許可してください",
            Self::SendFailed(_) => "通知センターを確認してください",
            Self::InvalidInput(_) => "入力値を確認してください",
        }
    }
}
