//! Credential gate error types.
//!
//! Cancellation and timeout are not errors: `prompt_and_wait` returns
//! `Ok(None)` for both. These variants cover misuse and a dead UI thread.

use thiserror::Error;

/// Errors returned by the credential gate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// `prompt_and_wait` was called on the UI-owning thread, which would
    /// deadlock the prompt it is waiting for.
    #[error("UIスレッドからサインインを待機することはできません")]
    OnUiThread,

    /// The UI loop has stopped, so no prompt can be shown.
    #[error("UIスレッドが停止しているためサインイン画面を表示できません")]
    UiUnavailable,

    /// There is no open prompt to answer.
    #[error("表示中のサインイン画面はありません")]
    NoActivePrompt,

    /// The submitted credential was empty.
    #[error("認証情報が空です")]
    EmptyCredential,
}

impl CredentialError {
    /// Returns true if this error indicates a programming mistake.
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::OnUiThread)
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::OnUiThread => "バックグラウンドスレッドから呼び出してください",
            Self::UiUnavailable => "デーモンを再起動してください",
            Self::NoActivePrompt => "サインインが要求されてから実行してください",
            Self::EmptyCredential => "トークンを指定してください",
        }
    }
}
