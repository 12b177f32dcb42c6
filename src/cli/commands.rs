//! Command definitions for the Meeting Alarm CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::daemon::DaemonOptions;
use crate::types::ConfigureParams;

// ============================================================================
// CLI Structure
// ============================================================================

/// Meeting Alarm - alerts before calendar meetings start
#[derive(Parser, Debug)]
#[command(
    name = "meeting-alarm",
    version,
    about = "会議の開始前に通知するアラームデーモン",
    long_about = "カレンダーの予定を定期的に取得し、会議の開始前に\n\
                  オーバーレイ・バナー・トレイ通知・ビープ音で知らせます。",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Control socket path (defaults to ~/.meeting-alarm/meeting-alarm.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the alarm daemon in the foreground
    Run(RunArgs),

    /// Show daemon status
    Status,

    /// Fetch the calendar now
    Refresh,

    /// Restart the periodic jobs
    Restart,

    /// Answer the pending sign-in prompt
    SignIn {
        /// Credential obtained from the sign-in page
        #[arg(value_parser = validate_token)]
        token: String,
    },

    /// Cancel the pending sign-in prompt
    CancelSignIn,

    /// Change settings of the running daemon
    Set(SetArgs),

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ============================================================================
// Run Command Arguments
// ============================================================================

/// Arguments for the run command
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Settings file (defaults to ~/.meeting-alarm/config.json)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Calendar events file (defaults to ~/.meeting-alarm/events.json)
    #[arg(short, long, value_name = "PATH")]
    pub events: Option<PathBuf>,

    /// Ask for sign-in before reading the events file
    #[arg(long)]
    pub require_sign_in: bool,

    #[command(flatten)]
    pub settings: SetArgs,
}

impl RunArgs {
    /// Converts to daemon startup options.
    pub fn to_options(&self, socket: Option<PathBuf>) -> DaemonOptions {
        DaemonOptions {
            config_path: self.config.clone(),
            events_path: self.events.clone(),
            require_sign_in: self.require_sign_in,
            socket_path: socket,
            overrides: self.settings.to_params(),
        }
    }
}

// ============================================================================
// Set Command Arguments
// ============================================================================

/// Settings that can be changed at startup or at runtime
#[derive(Args, Debug, Clone, Default)]
pub struct SetArgs {
    /// Minutes before start at which to alert (0-60)
    #[arg(
        short,
        long,
        value_parser = clap::value_parser!(u32).range(0..=60)
    )]
    pub threshold: Option<u32>,

    /// Minutes between calendar refreshes (1-240)
    #[arg(
        short,
        long,
        value_parser = clap::value_parser!(u32).range(1..=240)
    )]
    pub resync: Option<u32>,

    /// Seconds the overlay stays on screen (1-120)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=120))]
    pub overlay_seconds: Option<u32>,

    /// Overlay opacity in percent (10-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(10..=100))]
    pub opacity: Option<u32>,

    /// Number of beeps (0-10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub beeps: Option<u32>,

    /// Beep again once the overlay is gone
    #[arg(long, value_name = "BOOL")]
    pub post_overlay_beep: Option<bool>,
}

impl SetArgs {
    /// Converts to the partial update sent to the daemon.
    pub fn to_params(&self) -> ConfigureParams {
        ConfigureParams {
            alert_threshold_minutes: self.threshold,
            resync_interval_minutes: self.resync,
            overlay_duration_seconds: self.overlay_seconds,
            overlay_opacity: self.opacity,
            beep_count: self.beeps,
            post_overlay_beep: self.post_overlay_beep,
        }
    }
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Validates the sign-in token.
///
/// - Must not be blank
/// - Must not exceed 2048 bytes
fn validate_token(s: &str) -> Result<String, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("資格情報は空にできません".to_string());
    }
    if trimmed.len() > 2048 {
        return Err("資格情報は2048バイト以内にしてください".to_string());
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// Tests
// ============================================================================
