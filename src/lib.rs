//! Auto fisher - log-driven fishing bot for VRChat fishing worlds
//!
//! Tails the game's output log, reacts to the catch marker by reeling and
//! recasting through an OSC input, and recovers on its own when nothing bites
//! before a timeout.

pub mod console;
pub mod cycle;
pub mod error;
pub mod input;
pub mod log_reader;
pub mod utils;

// Re-exports for convenience
pub use cycle::{BotHandle, CycleStateMachine};
pub use error::{BotError, Result};
pub use input::{Actuator, ActuatorBridge, OscActuator};
pub use log_reader::{EventDetector, LogCursor, LogTailer};
pub use utils::bot_state::{Phase, SharedStatus, StatusSink};
pub use utils::settings::{CycleParameters, ParameterSource, RawParameters, Settings, SharedParameters};
