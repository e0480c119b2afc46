//! Bot phase and the status shared with the control surface

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Where the fishing cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Idle,
    Casting,
    Resting,
    ChargingCast,
    WaitingForHook,
    Reeling,
    Stopped,
}

impl Phase {
    /// Get human-readable description of the phase
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Casting => "Casting line...",
            Phase::Resting => "Resting...",
            Phase::ChargingCast => "Charging cast...",
            Phase::WaitingForHook => "Waiting for a bite...",
            Phase::Reeling => "Reeling in...",
            Phase::Stopped => "Stopped",
        }
    }

    /// Whether the bot is doing anything in this phase.
    pub fn is_active(&self) -> bool {
        !matches!(self, Phase::Idle | Phase::Stopped)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Receives every phase transition.
pub trait StatusSink: Send + Sync {
    fn publish(&self, phase: Phase);

    /// Free-form detail text next to the phase. Ignored by default.
    fn set_detail(&self, _message: &str) {}

    /// Called once per completed cycle body.
    fn cycle_completed(&self) {}
}

/// Status snapshot polled by the control surface.
pub struct SharedStatus {
    running: AtomicBool,
    phase: RwLock<Phase>,
    detail_message: RwLock<String>,
    cycles: AtomicU64,
    changed_at: RwLock<DateTime<Utc>>,
}

impl SharedStatus {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            phase: RwLock::new(Phase::Idle),
            detail_message: RwLock::new(String::new()),
            cycles: AtomicU64::new(0),
            changed_at: RwLock::new(Utc::now()),
        }
    }

    /// Check if bot is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get current phase
    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// Get detailed message
    pub fn detail_message(&self) -> String {
        self.detail_message.read().clone()
    }

    /// Cycles completed since process start.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Get status as JSON string for UI
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "running": self.is_running(),
            "phase": self.phase(),
            "activity": self.phase().description(),
            "detail": self.detail_message(),
            "cycles": self.cycles(),
            "changed_at": self.changed_at.read().to_rfc3339(),
        })
        .to_string()
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for SharedStatus {
    fn publish(&self, phase: Phase) {
        tracing::info!("[STATUS] [{}]", phase.description());
        self.running.store(phase.is_active(), Ordering::SeqCst);
        *self.phase.write() = phase;
        *self.changed_at.write() = Utc::now();
    }

    fn set_detail(&self, message: &str) {
        *self.detail_message.write() = message.to_string();
    }

    fn cycle_completed(&self) {
        self.cycles.fetch_add(1, Ordering::SeqCst);
    }
}
