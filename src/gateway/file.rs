//! Calendar gateway backed by a local JSON file.
//!
//! The file holds a JSON array of events:
//!
//! ```json
//! [
//!   {
//!     "id": "evt-1",
//!     "subject": "定例会議",
//!     "start": "2025-01-06T10:00:00+09:00",
//!     "end": "2025-01-06T10:30:00+09:00",
//!     "isOnlineMeeting": true,
//!     "onlineMeetingUrl": "https://meet.example.com/abc"
//!   }
//! ]
//! ```
//!
//! Optionally the gateway insists on a credential before reading, which
//! routes through the credential gate like a real service would.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::credential::{CredentialGate, DEFAULT_PROMPT_TIMEOUT};
use crate::daemon::config::ConfigStore;
use crate::types::{CalendarEvent, Credential};

use super::{CalendarGateway, GatewayError};

/// How long an accepted credential stays valid by default.
pub const DEFAULT_CREDENTIAL_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);

/// Reads events from a JSON file on every fetch.
pub struct JsonFileGateway {
    path: PathBuf,
    require_credential: bool,
    credential_lifetime: Duration,
    credential: Mutex<Option<(Credential, Instant)>>,
    sign_in: Option<(Arc<CredentialGate>, Arc<dyn ConfigStore>)>,
    prompt_timeout: Duration,
}

impl std::fmt::Debug for JsonFileGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileGateway")
            .field("path", &self.path)
            .field("require_credential", &self.require_credential)
            .field("credential_lifetime", &self.credential_lifetime)
            .field("has_sign_in", &self.sign_in.is_some())
            .finish()
    }
}

impl JsonFileGateway {
    /// Creates a gateway that reads `path` without any credential.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            require_credential: false,
            credential_lifetime: DEFAULT_CREDENTIAL_LIFETIME,
            credential: Mutex::new(None),
            sign_in: None,
            prompt_timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }

    /// Requires a credential before every fetch.
    pub fn require_credential(mut self, lifetime: Duration) -> Self {
        self.require_credential = true;
        self.credential_lifetime = lifetime;
        self
    }

    /// Prompts through `gate` when no valid credential is held.
    pub fn with_sign_in(mut self, gate: Arc<CredentialGate>, config: Arc<dyn ConfigStore>) -> Self {
        self.sign_in = Some((gate, config));
        self
    }

    /// Overrides how long a fetch waits for the human.
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the default events file path (`~/.meeting-alarm/events.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".meeting-alarm").join("events.json"))
    }

    fn has_valid_credential(&self) -> bool {
        self.credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|(_, accepted_at)| accepted_at.elapsed() < self.credential_lifetime)
    }

    fn ensure_credential(&self) -> Result<(), GatewayError> {
        if !self.require_credential || self.has_valid_credential() {
            return Ok(());
        }

        let Some((gate, config)) = self.sign_in.as_ref() else {
            return Err(GatewayError::Unauthorized(
                "資格情報が設定されていません".to_string(),
            ));
        };

        tracing::info!("資格情報が無効なためサインインを要求します");
        match gate.prompt_and_wait(&config.sign_in_url(), self.prompt_timeout) {
            Ok(Some(credential)) => {
                self.accept_credential(credential);
                Ok(())
            }
            Ok(None) => Err(GatewayError::AuthenticationCancelled),
            Err(e) => Err(GatewayError::Unauthorized(e.to_string())),
        }
    }

    fn read_events(&self) -> Result<Vec<CalendarEvent>, GatewayError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| classify_io_error(&self.path, &e))?;
        serde_json::from_str(&content).map_err(|e| {
            GatewayError::Other(format!("{} の形式が不正です: {}", self.path.display(), e))
        })
    }
}

impl CalendarGateway for JsonFileGateway {
    fn fetch_upcoming(&self) -> Result<Vec<CalendarEvent>, GatewayError> {
        self.ensure_credential()?;
        let events = self.read_events()?;
        tracing::debug!(path = %self.path.display(), count = events.len(), "カレンダーファイルを読み込みました");
        Ok(events)
    }

    fn is_credential_valid(&self) -> Result<bool, GatewayError> {
        Ok(!self.require_credential || self.has_valid_credential())
    }

    fn accept_credential(&self, credential: Credential) {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = Some((credential, Instant::now()));
        tracing::info!("資格情報を更新しました");
    }
}

fn classify_io_error(path: &Path, e: &io::Error) -> GatewayError {
    let detail = format!("{}: {}", path.display(), e);
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => GatewayError::Timeout(detail),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::NotConnected
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::HostUnreachable => GatewayError::NetworkUnreachable(detail),
        io::ErrorKind::PermissionDenied => GatewayError::Unauthorized(detail),
        _ => GatewayError::Other(detail),
    }
}

// ============================================================================
// Tests
// ============================================================================
