//! Log reader: tails the game log and recognises trigger phrases

pub mod cursor;
pub mod detector;
pub mod tailer;

pub use cursor::LogCursor;
pub use detector::{Confirmation, EventDetector, InstantTrigger, SustainedTrigger, PICKUP_CEILING, PICKUP_DWELL};
pub use tailer::{DeltaSink, LogTailer};
