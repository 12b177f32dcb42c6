//! Meeting Alarm Library
//!
//! This library provides the core functionality for the Meeting Alarm
//! daemon and its CLI. It includes:
//! - Scheduler, fetch coordination, alert evaluation and dispatch
//! - A singleton credential prompt shared by every caller
//! - Resume-from-sleep detection
//! - The UI-owning thread loop and tray presentation
//! - Overlay, audio and tray notice channels
//! - IPC server/client for daemon-CLI communication
//! - Native macOS notification system (macOS only)

pub mod cli;
pub mod credential;
pub mod daemon;
pub mod gateway;
pub mod overlay;
pub mod sound;
pub mod types;
pub mod ui;

// macOS-specific notification system
#[cfg(target_os = "macos")]
pub mod notification;

// Re-export commonly used types for convenience
pub use types::{
    AlarmConfig, CalendarEvent, ConfigureParams, Credential, IconState, IpcRequest, IpcResponse,
    ResponseData, Snapshot,
};

// Re-export the daemon components
pub use daemon::{
    AlarmDaemon, AlertDispatcher, AlertEvaluator, AlertRequest, AlertSink, CredentialCheck,
    DaemonOptions, FetchCoordinator, FetchStatus, SchedulerManager, SharedConfig, WakeMonitor,
};

// Re-export the credential gate
pub use credential::{CredentialError, CredentialGate};

// Re-export the gateway contract
pub use gateway::{CalendarGateway, GatewayError, JsonFileGateway, MockCalendarGateway};

// Re-export channel backends
pub use overlay::{LogOverlay, MockOverlayRenderer, OverlayError, OverlayRenderer};
pub use sound::{AudioCue, MockAudioCue, RodioAudioCue, SoundError, SoundSource};

// Re-export notification types on macOS
#[cfg(target_os = "macos")]
pub use notification::{NotificationError, TrayNotifier};
