use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::store::{StoreOptions, DEFAULT_QUOTA_BYTES, DEFAULT_SESSION_RETENTION};

pub const DATA_DIR_ENV: &str = "CLARITYHUB_DATA_DIR";
pub const DEBUG_ENV: &str = "CLARITYHUB_DEBUG";

/// How the floating indicator learns about store changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorWatch {
    #[default]
    Poll,
    Subscribe,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerSettings {
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub tick_interval_ms: u64,
    pub indicator_poll_ms: u64,
    pub indicator_watch: IndicatorWatch,
    pub session_retention: usize,
    pub store_quota_bytes: u64,
    pub alert_sound: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            short_break_minutes: 5,
            long_break_minutes: 15,
            tick_interval_ms: 1_000,
            indicator_poll_ms: 500,
            indicator_watch: IndicatorWatch::Poll,
            session_retention: DEFAULT_SESSION_RETENTION,
            store_quota_bytes: DEFAULT_QUOTA_BYTES,
            alert_sound: true,
        }
    }
}

impl TimerSettings {
    /// Replaces zero durations and intervals with defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.short_break_minutes == 0 {
            self.short_break_minutes = defaults.short_break_minutes;
        }
        if self.long_break_minutes == 0 {
            self.long_break_minutes = defaults.long_break_minutes;
        }
        if self.tick_interval_ms == 0 {
            self.tick_interval_ms = defaults.tick_interval_ms;
        }
        if self.indicator_poll_ms == 0 {
            self.indicator_poll_ms = defaults.indicator_poll_ms;
        }
        if self.session_retention == 0 {
            self.session_retention = defaults.session_retention;
        }
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn indicator_poll_interval(&self) -> Duration {
        Duration::from_millis(self.indicator_poll_ms)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            quota_bytes: self.store_quota_bytes,
            session_retention: self.session_retention,
        }
    }

    /// `CLARITYHUB_DEBUG=1` polls the indicator faster.
    pub fn apply_debug_overrides(mut self, debug_mode: bool) -> Self {
        if debug_mode {
            self.indicator_poll_ms = self.indicator_poll_ms.min(250);
        }
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    timer: TimerSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!("Ignoring malformed settings at {}: {err}", path.display());
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn timer(&self) -> TimerSettings {
        self.read().timer.clone().sanitized()
    }

    pub fn update_timer(&self, settings: TimerSettings) -> Result<()> {
        let mut guard = self.write();
        guard.timer = settings.sanitized();
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// `$CLARITYHUB_DATA_DIR`, else the platform data directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::data_dir()
        .map(|base| base.join("clarityhub"))
        .context("no platform data directory; set CLARITYHUB_DATA_DIR")
}

pub fn debug_mode() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
