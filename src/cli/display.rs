//! Display utilities for the Meeting Alarm CLI.
//!
//! This module provides formatted output for:
//! - Command results
//! - Error messages
//! - Status display

use chrono::{DateTime, Local};

use crate::types::{IpcResponse, ResponseData};

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows the daemon's message for a command that succeeded.
    pub fn show_success(response: &IpcResponse) {
        if response.message.is_empty() {
            println!("* 完了しました");
        } else {
            println!("* {}", response.message);
        }
    }

    /// Shows the current daemon status.
    pub fn show_status(response: &IpcResponse) {
        println!("Meeting Alarm ステータス");
        println!("─────────────────────────────");
        match &response.data {
            Some(data) => {
                for line in Self::status_lines(data) {
                    println!("{}", line);
                }
            }
            None => println!("Daemonは起動していません"),
        }
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("エラー: {}", message);
    }

    /// Builds the status lines for `data`, skipping absent fields.
    pub fn status_lines(data: &ResponseData) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(running) = data.scheduler_running {
            let state = if running { "実行中" } else { "停止中" };
            lines.push(format!("スケジューラ: {}", state));
        }
        if let Some(status) = &data.fetch_status {
            lines.push(format!("取得状態: {}", status));
        }
        if let Some(last) = &data.last_refresh {
            lines.push(format!("最終取得: {}", Self::format_timestamp(last)));
        }
        if let Some(count) = data.event_count {
            lines.push(format!("予定: {}件", count));
        }
        match &data.next_meeting {
            Some(next) => lines.push(format!("次の会議: {}", next)),
            None if data.event_count.is_some() => lines.push("次の会議: なし".to_string()),
            None => {}
        }
        if let Some(count) = data.alerted_count {
            lines.push(format!("通知済み: {}件", count));
        }
        if data.sign_in_pending == Some(true) {
            lines.push("サインイン待ち: `meeting-alarm sign-in <TOKEN>` で応答してください".to_string());
        }

        lines
    }

    /// Formats an RFC 3339 timestamp in local time, or returns it unchanged.
    fn format_timestamp(rfc3339: &str) -> String {
        DateTime::parse_from_rfc3339(rfc3339)
            .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|_| rfc3339.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
