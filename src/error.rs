//! Error types for setup operations.
//!
//! Faults inside the running cycle are logged and absorbed; only things that
//! happen while wiring the bot together surface as `BotError`.

use std::path::PathBuf;

/// Errors raised while loading settings or starting collaborators.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Failed to access settings file {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings JSON: {0}")]
    SettingsJson(#[from] serde_json::Error),

    #[error("Failed to create log watcher: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Failed to open actuator socket: {0}")]
    ActuatorSocket(#[source] std::io::Error),

    #[error("Unknown key name: {0}")]
    UnknownKey(String),

    #[error("Failed to register hotkey: {0}")]
    Hotkey(#[from] global_hotkey::Error),

    #[error("Hotkey thread failed: {0}")]
    HotkeyThread(String),
}

pub type Result<T> = std::result::Result<T, BotError>;
