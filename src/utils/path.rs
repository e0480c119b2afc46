//! Path utilities for finding data and game log directories

use std::env;
use std::path::PathBuf;

use directories::{BaseDirs, ProjectDirs};

/// Returns the folder where config and debug files are stored.
///
/// Portable installs keep a `config` folder next to the executable and win.
/// Otherwise the platform config directory is used, then the working directory.
pub fn get_data_dir() -> PathBuf {
    if let Ok(exe_path) = env::current_exe() {
        if let Some(parent) = exe_path.parent() {
            if parent.join("config").exists() {
                return parent.to_path_buf();
            }
        }
    }

    if let Some(dirs) = ProjectDirs::from("", "", "autofisher") {
        return dirs.config_dir().to_path_buf();
    }

    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Default location of the VRChat output logs (`%APPDATA%\..\LocalLow\VRChat\VRChat`).
pub fn default_log_dir() -> PathBuf {
    match BaseDirs::new() {
        Some(dirs) => dirs
            .home_dir()
            .join("AppData")
            .join("LocalLow")
            .join("VRChat")
            .join("VRChat"),
        None => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_data_dir() {
        let dir = get_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn test_default_log_dir_points_at_vrchat() {
        let dir = default_log_dir();
        assert!(dir.ends_with("VRChat") || dir == PathBuf::from("."));
    }
}
