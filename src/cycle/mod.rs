//! Fishing cycle: state machine, cycle body and timeout guard

pub mod body;
pub mod machine;
pub mod timeout_guard;

pub use body::{jittered, CycleKind};
pub use machine::{BotHandle, Command, CycleStateMachine, HOOK_COOLDOWN, TOGGLE_DEBOUNCE};
pub use timeout_guard::TimeoutGuard;
