//! Process-wide settings store.
//!
//! Every component reads settings through [`ConfigStore`] on each tick, so a
//! change made through the control socket takes effect without a restart
//! (interval changes additionally restart the scheduler).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::Result;

use crate::types::{AlarmConfig, ConfigureParams};

// ============================================================================
// ConfigStore
// ============================================================================

/// Typed getters and setters for the alarm settings.
pub trait ConfigStore: Send + Sync {
    fn alert_threshold_minutes(&self) -> u32;
    fn set_alert_threshold_minutes(&self, minutes: u32);

    fn resync_interval_minutes(&self) -> u32;
    fn set_resync_interval_minutes(&self, minutes: u32);

    fn overlay_duration_seconds(&self) -> u32;
    fn set_overlay_duration_seconds(&self, seconds: u32);

    fn overlay_opacity(&self) -> u32;
    fn set_overlay_opacity(&self, percent: u32);

    fn beep_count(&self) -> u32;
    fn set_beep_count(&self, count: u32);

    fn post_overlay_beep(&self) -> bool;
    fn set_post_overlay_beep(&self, enabled: bool);

    /// URL shown in the sign-in prompt.
    fn sign_in_url(&self) -> String;

    /// Returns a point-in-time copy of every setting.
    fn to_config(&self) -> AlarmConfig {
        AlarmConfig {
            alert_threshold_minutes: self.alert_threshold_minutes(),
            resync_interval_minutes: self.resync_interval_minutes(),
            overlay_duration_seconds: self.overlay_duration_seconds(),
            overlay_opacity: self.overlay_opacity(),
            beep_count: self.beep_count(),
            post_overlay_beep: self.post_overlay_beep(),
            sign_in_url: self.sign_in_url(),
        }
    }
}

// ============================================================================
// SharedConfig
// ============================================================================

/// Lock-free [`ConfigStore`] shared by all threads.
#[derive(Debug)]
pub struct SharedConfig {
    alert_threshold_minutes: AtomicU32,
    resync_interval_minutes: AtomicU32,
    overlay_duration_seconds: AtomicU32,
    overlay_opacity: AtomicU32,
    beep_count: AtomicU32,
    post_overlay_beep: AtomicBool,
    sign_in_url: RwLock<String>,
    source: Option<PathBuf>,
}

impl SharedConfig {
    /// Creates a store holding `config`.
    pub fn new(config: AlarmConfig) -> Self {
        Self {
            alert_threshold_minutes: AtomicU32::new(config.alert_threshold_minutes),
            resync_interval_minutes: AtomicU32::new(config.resync_interval_minutes),
            overlay_duration_seconds: AtomicU32::new(config.overlay_duration_seconds),
            overlay_opacity: AtomicU32::new(config.overlay_opacity),
            beep_count: AtomicU32::new(config.beep_count),
            post_overlay_beep: AtomicBool::new(config.post_overlay_beep),
            sign_in_url: RwLock::new(config.sign_in_url),
            source: None,
        }
    }

    /// Loads the store from a JSON file (defaults when the file is absent).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is unreadable or invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let config = AlarmConfig::load_from_file(path)?;
        tracing::info!(path = %path.display(), "設定を読み込みました");
        Ok(Self {
            source: Some(path.to_path_buf()),
            ..Self::new(config)
        })
    }

    /// Returns the file this store was loaded from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Validates and applies a partial update.
    ///
    /// Nothing is changed when validation fails. Returns the resulting
    /// settings and whether the resync interval changed (which requires a
    /// scheduler restart).
    ///
    /// # Errors
    ///
    /// Returns the validation message if the merged settings are invalid.
    pub fn apply(&self, params: &ConfigureParams) -> Result<(AlarmConfig, bool), String> {
        let current = self.to_config();
        let merged = current.merged_with(params);
        merged.validate()?;

        self.set_alert_threshold_minutes(merged.alert_threshold_minutes);
        self.set_resync_interval_minutes(merged.resync_interval_minutes);
        self.set_overlay_duration_seconds(merged.overlay_duration_seconds);
        self.set_overlay_opacity(merged.overlay_opacity);
        self.set_beep_count(merged.beep_count);
        self.set_post_overlay_beep(merged.post_overlay_beep);

        let interval_changed = merged.resync_interval_minutes != current.resync_interval_minutes;
        tracing::info!(?merged, interval_changed, "設定を更新しました");
        Ok((merged, interval_changed))
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self::new(AlarmConfig::default())
    }
}

impl ConfigStore for SharedConfig {
    fn alert_threshold_minutes(&self) -> u32 {
        self.alert_threshold_minutes.load(Ordering::Relaxed)
    }

    fn set_alert_threshold_minutes(&self, minutes: u32) {
        self.alert_threshold_minutes.store(minutes, Ordering::Relaxed);
    }

    fn resync_interval_minutes(&self) -> u32 {
        self.resync_interval_minutes.load(Ordering::Relaxed)
    }

    fn set_resync_interval_minutes(&self, minutes: u32) {
        self.resync_interval_minutes.store(minutes, Ordering::Relaxed);
    }

    fn overlay_duration_seconds(&self) -> u32 {
        self.overlay_duration_seconds.load(Ordering::Relaxed)
    }

    fn set_overlay_duration_seconds(&self, seconds: u32) {
        self.overlay_duration_seconds.store(seconds, Ordering::Relaxed);
    }

    fn overlay_opacity(&self) -> u32 {
        self.overlay_opacity.load(Ordering::Relaxed)
    }

    fn set_overlay_opacity(&self, percent: u32) {
        self.overlay_opacity.store(percent, Ordering::Relaxed);
    }

    fn beep_count(&self) -> u32 {
        self.beep_count.load(Ordering::Relaxed)
    }

    fn set_beep_count(&self, count: u32) {
        self.beep_count.store(count, Ordering::Relaxed);
    }

    fn post_overlay_beep(&self) -> bool {
        self.post_overlay_beep.load(Ordering::Relaxed)
    }

    fn set_post_overlay_beep(&self, enabled: bool) {
        self.post_overlay_beep.store(enabled, Ordering::Relaxed);
    }

    fn sign_in_url(&self) -> String {
        self.sign_in_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_reflects_config() {
        let store = SharedConfig::new(AlarmConfig::default().with_alert_threshold_minutes(7));
        assert_eq!(store.alert_threshold_minutes(), 7);
        assert_eq!(store.resync_interval_minutes(), 15);
        assert_eq!(store.to_config().alert_threshold_minutes, 7);
        assert!(store.source().is_none());
    }

    #[test]
    fn test_setters() {
        let store = SharedConfig::default();
        store.set_beep_count(1);
        store.set_post_overlay_beep(true);
        store.set_overlay_opacity(50);
        assert_eq!(store.beep_count(), 1);
        assert!(store.post_overlay_beep());
        assert_eq!(store.overlay_opacity(), 50);
    }

    #[test]
    fn test_apply_valid() {
        let store = SharedConfig::default();
        let params = ConfigureParams {
            resync_interval_minutes: Some(30),
            beep_count: Some(2),
            ..ConfigureParams::default()
        };
        let (merged, interval_changed) = store.apply(&params).unwrap();
        assert!(interval_changed);
        assert_eq!(merged.resync_interval_minutes, 30);
        assert_eq!(store.resync_interval_minutes(), 30);
        assert_eq!(store.beep_count(), 2);
    }

    #[test]
    fn test_apply_same_interval_reports_unchanged() {
        let store = SharedConfig::default();
        let params = ConfigureParams {
            alert_threshold_minutes: Some(2),
            ..ConfigureParams::default()
        };
        let (_, interval_changed) = store.apply(&params).unwrap();
        assert!(!interval_changed);
        assert_eq!(store.alert_threshold_minutes(), 2);
    }

    #[test]
    fn test_apply_invalid_changes_nothing() {
        let store = SharedConfig::default();
        let params = ConfigureParams {
            beep_count: Some(1),
            resync_interval_minutes: Some(0),
            ..ConfigureParams::default()
        };
        assert!(store.apply(&params).is_err());
        assert_eq!(store.beep_count(), 3);
        assert_eq!(store.resync_interval_minutes(), 15);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"alertThresholdMinutes": 10, "beepCount": 0}"#).unwrap();

        let store = SharedConfig::load(&path).unwrap();
        assert_eq!(store.alert_threshold_minutes(), 10);
        assert_eq!(store.beep_count(), 0);
        assert_eq!(store.source(), Some(path.as_path()));
    }
}
