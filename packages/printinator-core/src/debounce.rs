//! Settle-then-act for values observed through a `watch` channel.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Yields the latest value of a watch channel once it has stopped changing
/// for `quiet`.
pub struct Debouncer<T> {
    rx: watch::Receiver<T>,
    quiet: Duration,
}

impl<T: Clone> Debouncer<T> {
    pub fn new(rx: watch::Receiver<T>, quiet: Duration) -> Self {
        Self { rx, quiet }
    }

    /// Wait for the next burst of changes to settle and return the final
    /// value. Returns `None` once the sender is gone and nothing is pending.
    pub async fn settled(&mut self) -> Option<T> {
        self.rx.changed().await.ok()?;

        loop {
            match timeout(self.quiet, self.rx.changed()).await {
                // Another edit inside the window, start the quiet period over
                Ok(Ok(())) => continue,
                // Sender dropped mid-burst; still deliver what we have
                Ok(Err(_)) => return Some(self.rx.borrow_and_update().clone()),
                Err(_) => return Some(self.rx.borrow_and_update().clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_burst_settles_once_with_last_value() {
        let (tx, rx) = watch::channel(String::new());
        let mut debouncer = Debouncer::new(rx, Duration::from_millis(200));

        let start = Instant::now();
        tokio::spawn(async move {
            for value in ["h", "hu", "hun", "hunter2"] {
                tx.send_replace(value.to_string());
                sleep(Duration::from_millis(50)).await;
            }
            // keep the sender alive past the quiet period
            sleep(Duration::from_secs(5)).await;
        });

        let value = debouncer.settled().await;
        assert_eq!(value.as_deref(), Some("hunter2"));
        // last edit at 150ms, settled 200ms later
        assert!(start.elapsed() >= Duration::from_millis(350));
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_settle_separately() {
        let (tx, rx) = watch::channel(0u32);
        let mut debouncer = Debouncer::new(rx, Duration::from_millis(200));

        tx.send_replace(1);
        assert_eq!(debouncer.settled().await, Some(1));

        tx.send_replace(2);
        tx.send_replace(3);
        assert_eq!(debouncer.settled().await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_sender_ends_stream() {
        let (tx, rx) = watch::channel(0u32);
        let mut debouncer = Debouncer::new(rx, Duration::from_millis(200));
        drop(tx);
        assert_eq!(debouncer.settled().await, None);
    }
}
