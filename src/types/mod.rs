//! Core data types for the Meeting Alarm daemon.
//!
//! This module defines the data structures used for:
//! - Calendar events and the published snapshot
//! - Credentials and tray icon state
//! - Daemon configuration with validation
//! - IPC request/response serialization

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ResponseStatus
// ============================================================================

/// The user's response to a meeting invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// No response information available
    #[default]
    None,
    /// The user organizes the meeting
    Organizer,
    /// Invitation accepted
    Accepted,
    /// Invitation tentatively accepted
    Tentative,
    /// Invitation declined
    Declined,
    /// Invitation not answered yet
    NotResponded,
}

impl ResponseStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::None => "none",
            ResponseStatus::Organizer => "organizer",
            ResponseStatus::Accepted => "accepted",
            ResponseStatus::Tentative => "tentative",
            ResponseStatus::Declined => "declined",
            ResponseStatus::NotResponded => "not_responded",
        }
    }
}

// ============================================================================
// CalendarEvent
// ============================================================================

/// A single meeting fetched from the calendar service.
///
/// Events are immutable once constructed. Derived values such as the
/// minutes remaining until start are computed from the wall clock at read
/// time and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    /// Stable identifier, unique within one snapshot
    pub id: String,
    /// Meeting subject
    pub subject: String,
    /// Start instant with the organizer's offset
    pub start: DateTime<FixedOffset>,
    /// End instant with the organizer's offset
    pub end: DateTime<FixedOffset>,
    /// Organizer display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    /// The user's response to the invitation
    #[serde(default)]
    pub response_status: ResponseStatus,
    /// Whether the meeting takes place online
    #[serde(default)]
    pub is_online_meeting: bool,
    /// Join URL for online meetings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_meeting_url: Option<String>,
    /// Name of the calendar that owns the event
    #[serde(default)]
    pub calendar_name: String,
    /// Physical location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl CalendarEvent {
    /// Creates an event with the required fields; everything else is empty.
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            start,
            end,
            organizer: None,
            response_status: ResponseStatus::None,
            is_online_meeting: false,
            online_meeting_url: None,
            calendar_name: String::new(),
            location: None,
        }
    }

    /// Sets the organizer.
    pub fn with_organizer(mut self, organizer: impl Into<String>) -> Self {
        self.organizer = Some(organizer.into());
        self
    }

    /// Marks the event as an online meeting with the given join URL.
    pub fn with_online_meeting(mut self, url: impl Into<String>) -> Self {
        self.is_online_meeting = true;
        self.online_meeting_url = Some(url.into());
        self
    }

    /// Sets the owning calendar name.
    pub fn with_calendar_name(mut self, name: impl Into<String>) -> Self {
        self.calendar_name = name.into();
        self
    }

    /// Sets the physical location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Sets the response status.
    pub fn with_response_status(mut self, status: ResponseStatus) -> Self {
        self.response_status = status;
        self
    }

    /// Whole minutes from `now` until the start, truncated toward zero.
    ///
    /// Negative once the meeting has started.
    pub fn minutes_to_start(&self, now: DateTime<Utc>) -> i64 {
        (self.start.with_timezone(&Utc) - now).num_minutes()
    }

    /// Returns true if the meeting has started but not ended.
    pub fn is_in_progress(&self, now: DateTime<Utc>) -> bool {
        self.start.with_timezone(&Utc) <= now && !self.has_ended(now)
    }

    /// Returns true once the end instant has passed.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end.with_timezone(&Utc) <= now
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// The most recently published list of events.
///
/// Published behind an `Arc` and replaced wholesale, so readers always see
/// a complete list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    events: Vec<CalendarEvent>,
    fetched_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Creates an empty snapshot (nothing fetched yet).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a snapshot fetched now.
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self::fetched_at(events, Utc::now())
    }

    /// Creates a snapshot with an explicit fetch time.
    pub fn fetched_at(events: Vec<CalendarEvent>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            events,
            fetched_at: Some(fetched_at),
        }
    }

    /// Returns the events in this snapshot.
    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    /// Returns when this snapshot was fetched, if it ever was.
    pub fn fetch_time(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Returns the number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the snapshot has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the earliest event that has not started yet.
    pub fn next_upcoming(&self, now: DateTime<Utc>) -> Option<&CalendarEvent> {
        self.events
            .iter()
            .filter(|event| event.start.with_timezone(&Utc) > now)
            .min_by_key(|event| event.start.with_timezone(&Utc))
    }
}

// ============================================================================
// Credential
// ============================================================================

/// An access credential supplied by a human through the sign-in prompt.
///
/// The secret never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a credential, rejecting empty or whitespace-only input.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            None
        } else {
            Some(Self(secret.trim().to_string()))
        }
    }

    /// Returns the raw secret.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ============================================================================
// IconState
// ============================================================================

/// Tray icon state reflecting credential health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconState {
    /// Credential is valid
    #[default]
    Valid,
    /// Credential is missing or rejected
    Invalid,
}

// ============================================================================
// AlarmConfig
// ============================================================================

fn default_alert_threshold_minutes() -> u32 {
    5
}

fn default_resync_interval_minutes() -> u32 {
    15
}

fn default_overlay_duration_seconds() -> u32 {
    10
}

fn default_overlay_opacity() -> u32 {
    85
}

fn default_beep_count() -> u32 {
    3
}

fn default_sign_in_url() -> String {
    "https://login.example.com/calendar".to_string()
}

/// Configuration for the alarm daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmConfig {
    /// Minutes before start at which an alert fires (0-60)
    #[serde(default = "default_alert_threshold_minutes")]
    pub alert_threshold_minutes: u32,
    /// Minutes between calendar refreshes (1-240)
    #[serde(default = "default_resync_interval_minutes")]
    pub resync_interval_minutes: u32,
    /// Seconds the overlay and banner stay visible (1-120)
    #[serde(default = "default_overlay_duration_seconds")]
    pub overlay_duration_seconds: u32,
    /// Overlay opacity in percent (10-100)
    #[serde(default = "default_overlay_opacity")]
    pub overlay_opacity: u32,
    /// Number of beeps per alert (0-10)
    #[serde(default = "default_beep_count")]
    pub beep_count: u32,
    /// Whether to beep again after the overlay closes
    #[serde(default)]
    pub post_overlay_beep: bool,
    /// URL shown in the sign-in prompt
    #[serde(default = "default_sign_in_url")]
    pub sign_in_url: String,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            alert_threshold_minutes: default_alert_threshold_minutes(),
            resync_interval_minutes: default_resync_interval_minutes(),
            overlay_duration_seconds: default_overlay_duration_seconds(),
            overlay_opacity: default_overlay_opacity(),
            beep_count: default_beep_count(),
            post_overlay_beep: false,
            sign_in_url: default_sign_in_url(),
        }
    }
}

impl AlarmConfig {
    /// Sets the alert threshold.
    pub fn with_alert_threshold_minutes(mut self, minutes: u32) -> Self {
        self.alert_threshold_minutes = minutes;
        self
    }

    /// Sets the resync interval.
    pub fn with_resync_interval_minutes(mut self, minutes: u32) -> Self {
        self.resync_interval_minutes = minutes;
        self
    }

    /// Sets the overlay duration.
    pub fn with_overlay_duration_seconds(mut self, seconds: u32) -> Self {
        self.overlay_duration_seconds = seconds;
        self
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.alert_threshold_minutes > 60 {
            return Err("通知タイミングは0-60分の範囲で指定してください".to_string());
        }
        if self.resync_interval_minutes < 1 || self.resync_interval_minutes > 240 {
            return Err("同期間隔は1-240分の範囲で指定してください".to_string());
        }
        if self.overlay_duration_seconds < 1 || self.overlay_duration_seconds > 120 {
            return Err("オーバーレイ表示時間は1-120秒の範囲で指定してください".to_string());
        }
        if self.overlay_opacity < 10 || self.overlay_opacity > 100 {
            return Err("オーバーレイの不透明度は10-100%の範囲で指定してください".to_string());
        }
        if self.beep_count > 10 {
            return Err("ビープ回数は0-10回の範囲で指定してください".to_string());
        }
        Ok(())
    }

    /// Returns the default configuration file path (`~/.meeting-alarm/config.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".meeting-alarm").join("config.json"))
    }

    /// Loads the configuration from a JSON file.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "設定ファイルが無いためデフォルト設定を使用します");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        config.validate().map_err(anyhow::Error::msg)?;

        Ok(config)
    }

    /// Applies the values present in `params` on top of this configuration.
    pub fn merged_with(&self, params: &ConfigureParams) -> Self {
        let mut merged = self.clone();
        if let Some(v) = params.alert_threshold_minutes {
            merged.alert_threshold_minutes = v;
        }
        if let Some(v) = params.resync_interval_minutes {
            merged.resync_interval_minutes = v;
        }
        if let Some(v) = params.overlay_duration_seconds {
            merged.overlay_duration_seconds = v;
        }
        if let Some(v) = params.overlay_opacity {
            merged.overlay_opacity = v;
        }
        if let Some(v) = params.beep_count {
            merged.beep_count = v;
        }
        if let Some(v) = params.post_overlay_beep {
            merged.post_overlay_beep = v;
        }
        merged
    }
}

// ============================================================================
// IPC Types
// ============================================================================

/// Parameters for the configure command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureParams {
    /// Alert threshold in minutes
    #[serde(rename = "alertThresholdMinutes", skip_serializing_if = "Option::is_none")]
    pub alert_threshold_minutes: Option<u32>,
    /// Resync interval in minutes
    #[serde(rename = "resyncIntervalMinutes", skip_serializing_if = "Option::is_none")]
    pub resync_interval_minutes: Option<u32>,
    /// Overlay duration in seconds
    #[serde(rename = "overlayDurationSeconds", skip_serializing_if = "Option::is_none")]
    pub overlay_duration_seconds: Option<u32>,
    /// Overlay opacity in percent
    #[serde(rename = "overlayOpacity", skip_serializing_if = "Option::is_none")]
    pub overlay_opacity: Option<u32>,
    /// Beep count
    #[serde(rename = "beepCount", skip_serializing_if = "Option::is_none")]
    pub beep_count: Option<u32>,
    /// Post-overlay beep flag
    #[serde(rename = "postOverlayBeep", skip_serializing_if = "Option::is_none")]
    pub post_overlay_beep: Option<bool>,
}

impl ConfigureParams {
    /// Returns true if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// IPC request from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum IpcRequest {
    /// Query the current status
    Status,
    /// Trigger a calendar refresh
    Refresh,
    /// Restart the periodic jobs
    Restart,
    /// Submit a credential to the pending sign-in prompt
    SignIn {
        /// The credential
        token: String,
    },
    /// Cancel the pending sign-in prompt
    CancelSignIn,
    /// Change settings at runtime
    Configure {
        /// Settings to change
        #[serde(flatten)]
        params: ConfigureParams,
    },
}

/// Response data for IPC responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    /// Whether the periodic jobs are running
    #[serde(rename = "schedulerRunning", skip_serializing_if = "Option::is_none")]
    pub scheduler_running: Option<bool>,
    /// Last successful refresh (RFC 3339)
    #[serde(rename = "lastRefresh", skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<String>,
    /// Human-readable fetch status
    #[serde(rename = "fetchStatus", skip_serializing_if = "Option::is_none")]
    pub fetch_status: Option<String>,
    /// Number of events in the snapshot
    #[serde(rename = "eventCount", skip_serializing_if = "Option::is_none")]
    pub event_count: Option<usize>,
    /// Next meeting ("HH:MM subject")
    #[serde(rename = "nextMeeting", skip_serializing_if = "Option::is_none")]
    pub next_meeting: Option<String>,
    /// Number of events already alerted
    #[serde(rename = "alertedCount", skip_serializing_if = "Option::is_none")]
    pub alerted_count: Option<usize>,
    /// Whether a sign-in prompt is waiting for input
    #[serde(rename = "signInPending", skip_serializing_if = "Option::is_none")]
    pub sign_in_pending: Option<bool>,
}

/// IPC response from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Response status ("success" or "error")
    pub status: String,
    /// Human-readable message
    pub message: String,
    /// Optional response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl IpcResponse {
    /// Creates a success response.
    pub fn success(message: impl Into<String>, data: Option<ResponseData>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data,
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: None,
        }
    }

    /// Returns true if this is a success response.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn offset_now(delta: Duration) -> DateTime<FixedOffset> {
        (Utc::now() + delta).fixed_offset()
    }

    // ------------------------------------------------------------------------
    // CalendarEvent Tests
    // ------------------------------------------------------------------------

    mod calendar_event_tests {
        use super::*;

        #[test]
        fn test_minutes_to_start_future() {
            let now = Utc::now();
            let event = CalendarEvent::new(
                "a",
                "Standup",
                (now + Duration::seconds(190)).fixed_offset(),
                (now + Duration::minutes(30)).fixed_offset(),
            );
            assert_eq!(event.minutes_to_start(now), 3);
        }

        #[test]
        fn test_minutes_to_start_truncates_toward_zero() {
            let now = Utc::now();
            let started = CalendarEvent::new(
                "a",
                "Standup",
                (now - Duration::seconds(90)).fixed_offset(),
                (now + Duration::minutes(30)).fixed_offset(),
            );
            assert_eq!(started.minutes_to_start(now), -1);

            let later = CalendarEvent::new(
                "b",
                "Review",
                (now - Duration::seconds(150)).fixed_offset(),
                (now + Duration::minutes(30)).fixed_offset(),
            );
            assert_eq!(later.minutes_to_start(now), -2);
        }

        #[test]
        fn test_minutes_to_start_across_offsets() {
            let now = Utc::now();
            let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
            let event = CalendarEvent::new(
                "a",
                "Sync",
                (now + Duration::seconds(630)).with_timezone(&tokyo),
                (now + Duration::minutes(40)).with_timezone(&tokyo),
            );
            assert_eq!(event.minutes_to_start(now), 10);
        }

        #[test]
        fn test_in_progress_and_ended() {
            let now = Utc::now();
            let running = CalendarEvent::new(
                "a",
                "1on1",
                offset_now(Duration::minutes(-10)),
                offset_now(Duration::minutes(10)),
            );
            assert!(running.is_in_progress(now));
            assert!(!running.has_ended(now));

            let finished = CalendarEvent::new(
                "b",
                "Retro",
                offset_now(Duration::minutes(-60)),
                offset_now(Duration::minutes(-1)),
            );
            assert!(!finished.is_in_progress(now));
            assert!(finished.has_ended(now));
        }

        #[test]
        fn test_builders() {
            let event = CalendarEvent::new(
                "a",
                "Design review",
                offset_now(Duration::minutes(5)),
                offset_now(Duration::minutes(35)),
            )
            .with_organizer("Sato")
            .with_online_meeting("https://meet.example.com/abc")
            .with_calendar_name("Work")
            .with_location("Room 4")
            .with_response_status(ResponseStatus::Accepted);

            assert_eq!(event.organizer.as_deref(), Some("Sato"));
            assert!(event.is_online_meeting);
            assert_eq!(
                event.online_meeting_url.as_deref(),
                Some("https://meet.example.com/abc")
            );
            assert_eq!(event.calendar_name, "Work");
            assert_eq!(event.location.as_deref(), Some("Room 4"));
            assert_eq!(event.response_status, ResponseStatus::Accepted);
        }

        #[test]
        fn test_deserialize_camel_case() {
            let json = r#"{
                "id": "evt-1",
                "subject": "Planning",
                "start": "2026-10-15T10:00:00+09:00",
                "end": "2026-10-15T11:00:00+09:00",
                "isOnlineMeeting": true,
                "onlineMeetingUrl": "https://meet.example.com/x",
                "calendarName": "Work",
                "responseStatus": "accepted"
            }"#;
            let event: CalendarEvent = serde_json::from_str(json).unwrap();
            assert_eq!(event.id, "evt-1");
            assert!(event.is_online_meeting);
            assert_eq!(event.calendar_name, "Work");
            assert_eq!(event.response_status, ResponseStatus::Accepted);
            assert!(event.organizer.is_none());
        }
    }

    // ------------------------------------------------------------------------
    // Snapshot Tests
    // ------------------------------------------------------------------------

    mod snapshot_tests {
        use super::*;

        #[test]
        fn test_empty() {
            let snapshot = Snapshot::empty();
            assert!(snapshot.is_empty());
            assert!(snapshot.fetch_time().is_none());
        }

        #[test]
        fn test_next_upcoming_skips_started() {
            let now = Utc::now();
            let snapshot = Snapshot::new(vec![
                CalendarEvent::new(
                    "started",
                    "Running",
                    offset_now(Duration::minutes(-5)),
                    offset_now(Duration::minutes(25)),
                ),
                CalendarEvent::new(
                    "later",
                    "Later",
                    offset_now(Duration::minutes(60)),
                    offset_now(Duration::minutes(90)),
                ),
                CalendarEvent::new(
                    "soon",
                    "Soon",
                    offset_now(Duration::minutes(10)),
                    offset_now(Duration::minutes(40)),
                ),
            ]);

            let next = snapshot.next_upcoming(now).unwrap();
            assert_eq!(next.id, "soon");
            assert_eq!(snapshot.len(), 3);
            assert!(snapshot.fetch_time().is_some());
        }
    }

    // ------------------------------------------------------------------------
    // Credential Tests
    // ------------------------------------------------------------------------

    mod credential_tests {
        use super::*;

        #[test]
        fn test_rejects_blank() {
            assert!(Credential::new("").is_none());
            assert!(Credential::new("   ").is_none());
        }

        #[test]
        fn test_trims_and_exposes() {
            let credential = Credential::new("  token-123 ").unwrap();
            assert_eq!(credential.expose(), "token-123");
        }

        #[test]
        fn test_debug_is_redacted() {
            let credential = Credential::new("super-secret").unwrap();
            let debug = format!("{:?}", credential);
            assert!(!debug.contains("super-secret"));
        }
    }

    // ------------------------------------------------------------------------
    // AlarmConfig Tests
    // ------------------------------------------------------------------------

    mod alarm_config_tests {
        use super::*;

        #[test]
        fn test_default_values() {
            let config = AlarmConfig::default();
            assert_eq!(config.alert_threshold_minutes, 5);
            assert_eq!(config.resync_interval_minutes, 15);
            assert_eq!(config.overlay_duration_seconds, 10);
            assert_eq!(config.overlay_opacity, 85);
            assert_eq!(config.beep_count, 3);
            assert!(!config.post_overlay_beep);
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_validate_resync_range() {
            let config = AlarmConfig::default().with_resync_interval_minutes(0);
            assert!(config.validate().is_err());

            let config = AlarmConfig::default().with_resync_interval_minutes(241);
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_validate_threshold_range() {
            let config = AlarmConfig::default().with_alert_threshold_minutes(61);
            let err = config.validate().unwrap_err();
            assert!(err.contains("0-60"));
        }

        #[test]
        fn test_validate_opacity_and_beeps() {
            let mut config = AlarmConfig::default();
            config.overlay_opacity = 5;
            assert!(config.validate().is_err());

            let mut config = AlarmConfig::default();
            config.beep_count = 11;
            assert!(config.validate().is_err());
        }

        #[test]
        fn test_partial_json_uses_defaults() {
            let config: AlarmConfig =
                serde_json::from_str(r#"{"alertThresholdMinutes": 2}"#).unwrap();
            assert_eq!(config.alert_threshold_minutes, 2);
            assert_eq!(config.resync_interval_minutes, 15);
        }

        #[test]
        fn test_load_missing_file_is_default() {
            let dir = tempfile::tempdir().unwrap();
            let config = AlarmConfig::load_from_file(&dir.path().join("none.json")).unwrap();
            assert_eq!(config, AlarmConfig::default());
        }

        #[test]
        fn test_load_invalid_file_fails() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.json");
            std::fs::write(&path, r#"{"resyncIntervalMinutes": 0}"#).unwrap();
            assert!(AlarmConfig::load_from_file(&path).is_err());
        }

        #[test]
        fn test_merged_with() {
            let params = ConfigureParams {
                alert_threshold_minutes: Some(1),
                post_overlay_beep: Some(true),
                ..ConfigureParams::default()
            };
            let merged = AlarmConfig::default().merged_with(&params);
            assert_eq!(merged.alert_threshold_minutes, 1);
            assert!(merged.post_overlay_beep);
            assert_eq!(merged.resync_interval_minutes, 15);
        }
    }

    // ------------------------------------------------------------------------
    // IPC Types Tests
    // ------------------------------------------------------------------------

    mod ipc_types_tests {
        use super::*;

        #[test]
        fn test_request_status_serialization() {
            let json = serde_json::to_string(&IpcRequest::Status).unwrap();
            assert_eq!(json, r#"{"command":"status"}"#);
        }

        #[test]
        fn test_request_signin_roundtrip() {
            let json = r#"{"command":"signin","token":"abc"}"#;
            let request: IpcRequest = serde_json::from_str(json).unwrap();
            match request {
                IpcRequest::SignIn { token } => assert_eq!(token, "abc"),
                other => panic!("unexpected request: {:?}", other),
            }
        }

        #[test]
        fn test_request_configure_flattened() {
            let json = r#"{"command":"configure","resyncIntervalMinutes":30}"#;
            let request: IpcRequest = serde_json::from_str(json).unwrap();
            match request {
                IpcRequest::Configure { params } => {
                    assert_eq!(params.resync_interval_minutes, Some(30));
                    assert!(params.alert_threshold_minutes.is_none());
                }
                other => panic!("unexpected request: {:?}", other),
            }
        }

        #[test]
        fn test_configure_params_is_empty() {
            assert!(ConfigureParams::default().is_empty());
            let params = ConfigureParams {
                beep_count: Some(2),
                ..ConfigureParams::default()
            };
            assert!(!params.is_empty());
        }

        #[test]
        fn test_response_success_skips_empty_fields() {
            let response = IpcResponse::success(
                "ok",
                Some(ResponseData {
                    event_count: Some(2),
                    ..ResponseData::default()
                }),
            );
            let json = serde_json::to_string(&response).unwrap();
            assert!(json.contains(r#""eventCount":2"#));
            assert!(!json.contains("nextMeeting"));
            assert!(response.is_success());
        }

        #[test]
        fn test_response_error() {
            let response = IpcResponse::error("boom");
            assert_eq!(response.status, "error");
            assert!(response.data.is_none());
            assert!(!response.is_success());
        }
    }
}
