//! Calendar gateway error types.

use thiserror::Error;

/// Errors raised by a calendar gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The human cancelled or ignored the sign-in prompt
    #[error("サインインがキャンセルされました")]
    AuthenticationCancelled,

    /// The credential was rejected or is missing
    #[error("認証に失敗しました: {0}")]
    Unauthorized(String),

    /// The calendar service could not be reached
    #[error("ネットワークに接続できません: {0}")]
    NetworkUnreachable(String),

    /// The request did not finish in time
    #[error("カレンダーの取得がタイムアウトしました: {0}")]
    Timeout(String),

    /// Anything else
    #[error("カレンダーの取得に失敗しました: {0}")]
    Other(String),
}

impl GatewayError {
    /// Returns true for the distinguished cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::AuthenticationCancelled)
    }

    /// Returns true if a new credential would fix this.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, GatewayError::Unauthorized(_))
    }

    /// Returns true if retrying on the next tick may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::NetworkUnreachable(_) | GatewayError::Timeout(_)
        )
    }

    /// Returns a suggestion for resolving the error.
    pub fn suggestion(&self) -> &'static str {
        match self {
            GatewayError::AuthenticationCancelled => {
                "メニューの「サインイン…」または `meeting-alarm sign-in` で再度サインインしてください"
            }
            GatewayError::Unauthorized(_) => "サインインし直してください",
            GatewayError::NetworkUnreachable(_) => "ネットワーク接続を確認してください",
            GatewayError::Timeout(_) => "しばらく待ってから再試行してください",
            GatewayError::Other(_) => "ログを確認してください",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(GatewayError::AuthenticationCancelled.is_cancelled());
        assert!(GatewayError::Unauthorized("expired".into()).is_auth_error());
        assert!(GatewayError::NetworkUnreachable("dns".into()).is_transient());
        assert!(GatewayError::Timeout("30s".into()).is_transient());
        assert!(!GatewayError::Other("x".into()).is_transient());
        assert!(!GatewayError::Other("x".into()).is_cancelled());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            GatewayError::AuthenticationCancelled.to_string(),
            "サインインがキャンセルされました"
        );
        assert!(GatewayError::Timeout("30s".into()).to_string().contains("30s"));
    }

    #[test]
    fn test_suggestions_not_empty() {
        for err in [
            GatewayError::AuthenticationCancelled,
            GatewayError::Unauthorized(String::new()),
            GatewayError::NetworkUnreachable(String::new()),
            GatewayError::Timeout(String::new()),
            GatewayError::Other(String::new()),
        ] {
            assert!(!err.suggestion().is_empty());
        }
    }
}
