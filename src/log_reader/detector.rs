//! Trigger phrase detection over polled log deltas

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

/// How long the pickup marker must stay visible before it counts.
pub const PICKUP_DWELL: Duration = Duration::from_secs(2);

/// Upper bound on waiting for a pickup confirmation during a reel.
pub const PICKUP_CEILING: Duration = Duration::from_secs(30);

/// Single-occurrence marker ("SAVED DATA") that signals a finished catch.
///
/// A short tail of the previous delta is carried over so a marker split across
/// two polls is still found. The carry is dropped after a hit so one
/// occurrence fires once.
#[derive(Debug, Clone)]
pub struct InstantTrigger {
    marker: String,
    carry: String,
}

impl InstantTrigger {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            carry: String::new(),
        }
    }

    /// Scan a delta; true if the marker appears in it.
    pub fn scan(&mut self, delta: &str) -> bool {
        if self.marker.is_empty() || delta.is_empty() {
            return false;
        }

        let mut window = std::mem::take(&mut self.carry);
        window.push_str(delta);

        if window.contains(&self.marker) {
            return true;
        }

        self.carry = tail_chars(&window, self.marker.len().saturating_sub(1)).to_string();
        false
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }
}

/// The last `max_bytes` (or fewer, on a char boundary) of `s`.
fn tail_chars(s: &str, max_bytes: usize) -> &str {
    let mut start = s.len().saturating_sub(max_bytes);
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Result of waiting for the pickup marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Unconfirmed,
}

/// Pickup marker that must be seen and then not contradicted for a dwell time.
///
/// Each poll result is one observation: a delta with the marker starts (or
/// continues) the dwell, a non-empty delta without it contradicts and resets
/// it, and an empty delta carries no information.
#[derive(Debug, Clone)]
pub struct SustainedTrigger {
    marker: String,
    dwell: Duration,
    first_seen_at: Option<Instant>,
}

impl SustainedTrigger {
    pub fn new(marker: impl Into<String>, dwell: Duration) -> Self {
        Self {
            marker: marker.into(),
            dwell,
            first_seen_at: None,
        }
    }

    pub fn first_seen_at(&self) -> Option<Instant> {
        self.first_seen_at
    }

    /// Record one poll result taken at `now`; true once confirmed.
    pub fn observe(&mut self, delta: &str, now: Instant) -> bool {
        if !self.marker.is_empty() && delta.contains(&self.marker) {
            self.first_seen_at.get_or_insert(now);
        } else if !delta.trim().is_empty() {
            self.first_seen_at = None;
        }

        match self.first_seen_at {
            Some(seen) => now.saturating_duration_since(seen) >= self.dwell,
            None => false,
        }
    }

    /// Watch polled deltas until the marker is confirmed or `ceiling` passes.
    pub async fn await_confirmation(
        &mut self,
        deltas: &mut broadcast::Receiver<Arc<str>>,
        ceiling: Duration,
    ) -> Confirmation {
        let deadline = Instant::now() + ceiling;

        loop {
            match tokio::time::timeout_at(deadline, deltas.recv()).await {
                Ok(Ok(delta)) => {
                    if self.observe(&delta, Instant::now()) {
                        return Confirmation::Confirmed;
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::debug!("[DETECT] Skipped {} log deltas", skipped);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    tokio::time::sleep_until(deadline).await;
                    return Confirmation::Unconfirmed;
                }
                Err(_) => return Confirmation::Unconfirmed,
            }
        }
    }
}

/// Both trigger phrases, as configured.
#[derive(Debug, Clone)]
pub struct EventDetector {
    instant_marker: String,
    sustained_marker: String,
}

impl EventDetector {
    pub fn new(instant_marker: impl Into<String>, sustained_marker: impl Into<String>) -> Self {
        Self {
            instant_marker: instant_marker.into(),
            sustained_marker: sustained_marker.into(),
        }
    }

    pub fn instant(&self) -> InstantTrigger {
        InstantTrigger::new(self.instant_marker.clone())
    }

    /// Fresh detection state for one reel attempt.
    pub fn sustained(&self) -> SustainedTrigger {
        SustainedTrigger::new(self.sustained_marker.clone(), PICKUP_DWELL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_trigger_fires_on_marker() {
        let mut trigger = InstantTrigger::new("SAVED DATA");
        assert!(!trigger.scan("[Behaviour] joining world\n"));
        assert!(trigger.scan("2024.01.01 12:00:00 Log - SAVED DATA\n"));
        assert!(!trigger.scan(""));
    }

    #[test]
    fn test_instant_trigger_across_deltas() {
        let mut trigger = InstantTrigger::new("SAVED DATA");
        assert!(!trigger.scan("line ... SAVED"));
        assert!(trigger.scan(" DATA\n"));
        assert!(!trigger.scan("next line\n"), "one occurrence fires once");
    }

    #[test]
    fn test_tail_chars_respects_boundaries() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 5), "ab");
        assert_eq!(tail_chars("a魚", 2), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_sighting_then_absent_does_not_confirm() {
        let mut trigger = SustainedTrigger::new("Pickup attached", PICKUP_DWELL);
        let t0 = Instant::now();

        assert!(!trigger.observe("Pickup attached\n", t0));
        assert!(!trigger.observe("something else\n", t0 + Duration::from_secs(1)));
        assert!(!trigger.observe("", t0 + Duration::from_millis(2100)));
        assert!(trigger.first_seen_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_presence_confirms_after_dwell() {
        let mut trigger = SustainedTrigger::new("Pickup attached", PICKUP_DWELL);
        let t0 = Instant::now();

        assert!(!trigger.observe("Pickup attached\n", t0));
        assert!(!trigger.observe("Pickup attached\n", t0 + Duration::from_secs(1)));
        assert!(trigger.observe("Pickup attached\n", t0 + Duration::from_millis(2100)));
        assert_eq!(trigger.first_seen_at(), Some(t0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_polls_do_not_contradict() {
        let mut trigger = SustainedTrigger::new("Pickup attached", PICKUP_DWELL);
        let t0 = Instant::now();

        trigger.observe("Pickup attached\n", t0);
        assert!(!trigger.observe("", t0 + Duration::from_millis(1900)));
        assert!(trigger.observe("", t0 + Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_confirmation_confirms() {
        let (tx, mut rx) = broadcast::channel::<Arc<str>>(16);
        let feeder = tokio::spawn(async move {
            for _ in 0..4 {
                let _ = tx.send(Arc::from("Pickup attached\n"));
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let mut trigger = SustainedTrigger::new("Pickup attached", PICKUP_DWELL);
        let start = Instant::now();
        let outcome = trigger.await_confirmation(&mut rx, PICKUP_CEILING).await;

        assert_eq!(outcome, Confirmation::Confirmed);
        assert!(start.elapsed() >= PICKUP_DWELL);
        assert!(start.elapsed() < Duration::from_secs(3));
        feeder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_confirmation_gives_up_at_ceiling() {
        let (tx, mut rx) = broadcast::channel::<Arc<str>>(16);
        let mut trigger = SustainedTrigger::new("Pickup attached", PICKUP_DWELL);

        let start = Instant::now();
        let outcome = trigger.await_confirmation(&mut rx, Duration::from_secs(5)).await;

        assert_eq!(outcome, Confirmation::Unconfirmed);
        assert!(start.elapsed() >= Duration::from_secs(5));
        drop(tx);
    }
}
