//! One-shot alarm delivered as a message into an event queue

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Re-armable one-shot alarm.
///
/// Each arming gets a generation number that is carried in the fired
/// message. Re-arming or cancelling aborts the pending alarm and bumps the
/// generation, so a message that was already in flight is recognisably stale.
pub struct TimeoutGuard<T: Send + 'static> {
    tx: mpsc::UnboundedSender<T>,
    generation: u64,
    alarm: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> TimeoutGuard<T> {
    pub fn new(tx: mpsc::UnboundedSender<T>) -> Self {
        Self {
            tx,
            generation: 0,
            alarm: None,
        }
    }

    /// Cancel any pending alarm and schedule `message` after `duration`.
    pub fn arm<F>(&mut self, duration: Duration, message: F) -> u64
    where
        F: FnOnce(u64) -> T + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        let tx = self.tx.clone();
        let deadline = tokio::time::Instant::now() + duration;

        self.alarm = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(message(generation));
        }));

        tracing::debug!("[TIMEOUT] Armed #{} for {:?}", generation, duration);
        generation
    }

    pub fn cancel(&mut self) {
        if let Some(alarm) = self.alarm.take() {
            alarm.abort();
            tracing::debug!("[TIMEOUT] Cancelled #{}", self.generation);
        }
        self.generation += 1;
    }

    /// Whether a fired message with `generation` belongs to the live arming.
    pub fn is_current(&self, generation: u64) -> bool {
        self.alarm.is_some() && generation == self.generation
    }

    pub fn is_armed(&self) -> bool {
        self.alarm.as_ref().is_some_and(|alarm| !alarm.is_finished())
    }
}

impl<T: Send + 'static> Drop for TimeoutGuard<T> {
    fn drop(&mut self) {
        if let Some(alarm) = self.alarm.take() {
            alarm.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_alarm() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut guard = TimeoutGuard::new(tx);

        guard.arm(Duration::from_secs(5), |g| g);
        let second = guard.arm(Duration::from_secs(3), |g| g);

        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(rx.try_recv().ok(), Some(second));
        assert!(guard.is_current(second));

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(rx.try_recv().is_err(), "first alarm must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut guard = TimeoutGuard::new(tx);

        let generation = guard.arm(Duration::from_secs(1), |g| g);
        assert!(guard.is_armed());
        guard.cancel();
        assert!(!guard.is_armed());
        assert!(!guard.is_current(generation));

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_after_rearm() {
        let (tx, _rx) = mpsc::unbounded_channel::<u64>();
        let mut guard = TimeoutGuard::new(tx);

        let first = guard.arm(Duration::from_secs(1), |g| g);
        let second = guard.arm(Duration::from_secs(1), |g| g);
        assert_ne!(first, second);
        assert!(!guard.is_current(first));
        assert!(guard.is_current(second));
    }
}
