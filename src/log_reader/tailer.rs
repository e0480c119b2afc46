//! Background log tailing.
//!
//! Interval ticks and directory notifications both funnel into one wake-up
//! channel with a single consumer, so there is exactly one place that moves
//! the cursor offset.

use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cursor::LogCursor;

/// Where polled deltas go. Empty deltas are delivered too, one per poll.
pub trait DeltaSink: Send + 'static {
    /// Returns false once the receiver is gone.
    fn deliver(&self, delta: Arc<str>) -> bool;
}

impl DeltaSink for mpsc::UnboundedSender<Arc<str>> {
    fn deliver(&self, delta: Arc<str>) -> bool {
        self.send(delta).is_ok()
    }
}

/// Why the consumer woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Tick,
    Changed,
}

/// Running tailer. Call [`LogTailer::shutdown`] to stop it.
pub struct LogTailer {
    task: JoinHandle<()>,
    shutdown: CancellationToken,
    watcher: Option<RecommendedWatcher>,
}

impl LogTailer {
    /// Start tailing. A failing directory watcher only loses the fast path;
    /// the interval keeps polling.
    pub fn spawn<S: DeltaSink>(cursor: LogCursor, interval: Duration, sink: S) -> Self {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let watcher = match watch_directory(&cursor, wake_tx.clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!("[TAIL] Directory watcher unavailable, polling only: {}", e);
                None
            }
        };

        let ticker_token = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if wake_tx.send(Wake::Tick).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let task = tokio::spawn(consume(cursor, wake_rx, sink, shutdown.clone()));

        Self {
            task,
            shutdown,
            watcher,
        }
    }

    /// Stop polling and the watcher, waiting at most `timeout` for the task.
    pub async fn shutdown(mut self, timeout: Duration) {
        self.shutdown.cancel();
        drop(self.watcher.take());

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => tracing::debug!("[TAIL] Tailer stopped"),
            Ok(Err(e)) => tracing::warn!("[TAIL] Tailer task failed: {}", e),
            Err(_) => {
                tracing::warn!("[TAIL] Tailer did not stop within {:?}, abandoning it", timeout);
                self.task.abort();
            }
        }
    }
}

fn watch_directory(
    cursor: &LogCursor,
    wake_tx: mpsc::UnboundedSender<Wake>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(_) => {
                let _ = wake_tx.send(Wake::Changed);
            }
            Err(e) => tracing::debug!("[TAIL] Watcher error: {}", e),
        },
        Config::default(),
    )?;
    watcher.watch(cursor.directory(), RecursiveMode::NonRecursive)?;
    tracing::info!("[TAIL] Watching {:?}", cursor.directory());
    Ok(watcher)
}

async fn consume<S: DeltaSink>(
    mut cursor: LogCursor,
    mut wake_rx: mpsc::UnboundedReceiver<Wake>,
    sink: S,
    shutdown: CancellationToken,
) {
    loop {
        let wake = tokio::select! {
            _ = shutdown.cancelled() => break,
            wake = wake_rx.recv() => match wake {
                Some(wake) => wake,
                None => break,
            },
        };

        // A burst of notifications collapses into one poll
        while wake_rx.try_recv().is_ok() {}

        // File I/O stays off the async workers
        let polled = tokio::task::spawn_blocking(move || {
            let delta = cursor.poll();
            (cursor, delta)
        })
        .await;
        let delta = match polled {
            Ok((returned, delta)) => {
                cursor = returned;
                delta
            }
            Err(e) => {
                tracing::error!("[TAIL] Poll task failed, stopping: {}", e);
                break;
            }
        };

        if wake == Wake::Changed && !delta.is_empty() {
            tracing::trace!("[TAIL] {} bytes after change notification", delta.len());
        }

        if !sink.deliver(Arc::from(delta)) {
            tracing::debug!("[TAIL] Delta receiver closed, stopping");
            break;
        }
    }
}
