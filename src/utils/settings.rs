//! Settings file and per-cycle parameter snapshots

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BotError, Result};
use crate::utils::path::{default_log_dir, get_data_dir};

/// Smallest value any cycle parameter may take, in its own unit.
pub const MIN_PARAMETER: f64 = 0.5;

pub const DEFAULT_CAST_SECS: f64 = 2.0;
pub const DEFAULT_REST_SECS: f64 = 2.0;
pub const DEFAULT_REEL_SECS: f64 = 20.0;
pub const DEFAULT_POST_CAST_WAIT_SECS: f64 = 3.0;
pub const DEFAULT_TIMEOUT_MINUTES: f64 = 5.0;
pub const DEFAULT_JITTER_SECS: f64 = 0.5;

/// Cycle parameters as entered on the control surface.
///
/// Each field is kept as raw JSON so that a bad entry only affects itself:
/// numbers and numeric strings are accepted, anything else falls back to the
/// field default when a [`CycleParameters`] snapshot is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawParameters {
    pub cast_duration: Value,
    pub rest_duration: Value,
    pub reel_duration: Value,
    pub post_cast_wait: Value,
    pub timeout_minutes: Value,
    pub jitter_range: Value,
}

impl Default for RawParameters {
    fn default() -> Self {
        Self {
            cast_duration: Value::from(DEFAULT_CAST_SECS),
            rest_duration: Value::from(DEFAULT_REST_SECS),
            reel_duration: Value::from(DEFAULT_REEL_SECS),
            post_cast_wait: Value::from(DEFAULT_POST_CAST_WAIT_SECS),
            timeout_minutes: Value::from(DEFAULT_TIMEOUT_MINUTES),
            jitter_range: Value::from(DEFAULT_JITTER_SECS),
        }
    }
}

/// Read one parameter, substituting `default` for junk and flooring the result.
fn read_param(value: &Value, default: f64) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    let value = match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => v,
        _ => default,
    };

    value.max(MIN_PARAMETER)
}

/// Validated timing for one cycle. Never changes while a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleParameters {
    pub cast: Duration,
    pub rest: Duration,
    pub reel: Duration,
    pub post_cast_wait: Duration,
    pub timeout_minutes: f64,
    pub jitter: Duration,
}

impl CycleParameters {
    pub fn from_raw(raw: &RawParameters) -> Self {
        let secs = |value: &Value, default: f64| Duration::from_secs_f64(read_param(value, default));

        Self {
            cast: secs(&raw.cast_duration, DEFAULT_CAST_SECS),
            rest: secs(&raw.rest_duration, DEFAULT_REST_SECS),
            reel: secs(&raw.reel_duration, DEFAULT_REEL_SECS),
            post_cast_wait: secs(&raw.post_cast_wait, DEFAULT_POST_CAST_WAIT_SECS),
            timeout_minutes: read_param(&raw.timeout_minutes, DEFAULT_TIMEOUT_MINUTES),
            jitter: secs(&raw.jitter_range, DEFAULT_JITTER_SECS),
        }
    }

    /// How long to wait for a hook before forcing a reel.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_minutes * 60.0)
    }
}

impl Default for CycleParameters {
    fn default() -> Self {
        Self::from_raw(&RawParameters::default())
    }
}

/// Anything that can hand out a parameter snapshot at the start of a cycle.
pub trait ParameterSource: Send + Sync {
    fn snapshot(&self) -> CycleParameters;
}

impl ParameterSource for CycleParameters {
    fn snapshot(&self) -> CycleParameters {
        *self
    }
}

/// Parameters the control surface may edit while the bot runs.
#[derive(Debug, Clone, Default)]
pub struct SharedParameters {
    raw: Arc<RwLock<RawParameters>>,
}

impl SharedParameters {
    pub fn new(raw: RawParameters) -> Self {
        Self {
            raw: Arc::new(RwLock::new(raw)),
        }
    }

    /// Replace the entered values; takes effect from the next cycle.
    pub fn update(&self, raw: RawParameters) {
        *self.raw.write() = raw;
    }
}

impl ParameterSource for SharedParameters {
    fn snapshot(&self) -> CycleParameters {
        CycleParameters::from_raw(&self.raw.read())
    }
}

/// Where the game writes its logs and how to recognise them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Overrides the VRChat log directory when set.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    pub file_suffix: String,
    pub poll_interval_ms: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: "output_log_".to_string(),
            file_suffix: ".txt".to_string(),
            poll_interval_ms: 1000,
        }
    }
}

impl LogSettings {
    pub fn directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_log_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }
}

/// Log phrases that drive the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub instant_marker: String,
    pub sustained_marker: String,
    /// End the reel on a confirmed pickup instead of the jittered reel time.
    pub confirm_reel_with_pickup: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            instant_marker: "SAVED DATA".to_string(),
            sustained_marker: "Pickup attached".to_string(),
            confirm_reel_with_pickup: false,
        }
    }
}

/// OSC endpoint receiving the press/release signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorSettings {
    pub target: String,
    pub address: String,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            target: "127.0.0.1:9000".to_string(),
            address: "/input/UseRight".to_string(),
        }
    }
}

/// Global hotkeys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    pub toggle_key: String,
    pub force_reel_key: String,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            toggle_key: "F5".to_string(),
            force_reel_key: "F6".to_string(),
        }
    }
}

/// Everything stored in `config/settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub parameters: RawParameters,
    pub log: LogSettings,
    pub triggers: TriggerSettings,
    pub actuator: ActuatorSettings,
    pub keys: KeySettings,
}

/// Get settings file path
pub fn get_settings_path() -> PathBuf {
    get_data_dir().join("config").join("settings.json")
}

/// Read settings from `path`. A missing file yields the defaults.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).map_err(|source| BotError::SettingsIo {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Load settings, falling back to defaults if the file is unreadable.
pub fn load_settings() -> Settings {
    load_settings_at(&get_settings_path())
}

/// Load settings from `path`, writing a starter file with the defaults on
/// first run so there is something to edit.
pub fn load_settings_at(path: &Path) -> Settings {
    if !path.exists() {
        let settings = Settings::default();
        match save_settings_to(path, &settings) {
            Ok(()) => tracing::info!("[CONFIG] Wrote default settings to {:?}", path),
            Err(e) => tracing::warn!("[CONFIG] {}", e),
        }
        return settings;
    }

    match load_settings_from(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("[CONFIG] {}; using defaults", e);
            Settings::default()
        }
    }
}

/// Write settings as pretty JSON, creating parent folders as needed.
pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    let io_err = |source| BotError::SettingsIo {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let params = CycleParameters::default();
        assert_eq!(params.cast, Duration::from_secs(2));
        assert_eq!(params.rest, Duration::from_secs(2));
        assert_eq!(params.reel, Duration::from_secs(20));
        assert_eq!(params.post_cast_wait, Duration::from_secs(3));
        assert_eq!(params.timeout(), Duration::from_secs(300));
        assert_eq!(params.jitter, Duration::from_millis(500));
    }

    #[test]
    fn test_bad_entries_fall_back_per_field() {
        let raw = RawParameters {
            cast_duration: Value::from("abc"),
            rest_duration: Value::from(" 4.5 "),
            reel_duration: Value::Null,
            post_cast_wait: Value::from(-3.0),
            timeout_minutes: Value::from("inf"),
            jitter_range: Value::Bool(true),
        };
        let params = CycleParameters::from_raw(&raw);

        assert_eq!(params.cast, Duration::from_secs(2));
        assert_eq!(params.rest, Duration::from_millis(4500));
        assert_eq!(params.reel, Duration::from_secs(20));
        assert_eq!(params.post_cast_wait, Duration::from_secs(3));
        assert_eq!(params.timeout_minutes, DEFAULT_TIMEOUT_MINUTES);
        assert_eq!(params.jitter, Duration::from_millis(500));
    }

    #[test]
    fn test_small_values_are_floored() {
        let raw = RawParameters {
            cast_duration: Value::from(0.0),
            rest_duration: Value::from("0.1"),
            timeout_minutes: Value::from(0.2),
            ..RawParameters::default()
        };
        let params = CycleParameters::from_raw(&raw);

        assert_eq!(params.cast, Duration::from_millis(500));
        assert_eq!(params.rest, Duration::from_millis(500));
        assert_eq!(params.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_shared_parameters_update() {
        let shared = SharedParameters::default();
        assert_eq!(shared.snapshot().reel, Duration::from_secs(20));

        shared.update(RawParameters {
            reel_duration: Value::from("12"),
            ..RawParameters::default()
        });
        assert_eq!(shared.snapshot().reel, Duration::from_secs(12));
    }

    #[test]
    fn test_settings_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("settings.json");

        let mut settings = Settings::default();
        settings.keys.toggle_key = "F7".to_string();
        settings.triggers.confirm_reel_with_pickup = true;
        save_settings_to(&path, &settings).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.keys.toggle_key, "F7");
        assert!(loaded.triggers.confirm_reel_with_pickup);
        assert_eq!(loaded.log.file_prefix, "output_log_");
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"parameters": {"reel_duration": "15"}, "keys": {"toggle_key": "F8"}}"#).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.keys.toggle_key, "F8");
        assert_eq!(loaded.keys.force_reel_key, "F6");
        assert_eq!(loaded.triggers.instant_marker, "SAVED DATA");

        let params = CycleParameters::from_raw(&loaded.parameters);
        assert_eq!(params.reel, Duration::from_secs(15));
        assert_eq!(params.cast, Duration::from_secs(2));
    }

    #[test]
    fn test_first_run_writes_starter_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("settings.json");

        let settings = load_settings_at(&path);
        assert_eq!(settings.keys.toggle_key, "F5");
        assert!(path.exists());

        let written = load_settings_from(&path).unwrap();
        assert_eq!(written.parameters, RawParameters::default());
    }

    #[test]
    fn test_unreadable_settings_fall_back_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let settings = load_settings_at(&path);
        assert_eq!(settings.actuator.address, "/input/UseRight");
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_missing_settings_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(loaded.actuator.target, "127.0.0.1:9000");
    }
}
