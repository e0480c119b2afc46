//! Shared utilities: paths, settings, status and hotkeys

pub mod bot_state;
pub mod keybinds;
pub mod path;
pub mod settings;
