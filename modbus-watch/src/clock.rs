//! Wall-clock access and cancellable sleeps.

use std::future::Future;
use std::time::Duration;

use chrono::Timelike;
use tokio::sync::watch;

/// Source of local time and timed suspension.
pub trait Clock: Send + Sync {
    /// Current local hour, 0-23.
    fn local_hour(&self) -> u32;

    /// Suspend for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// The real clock: local time from `chrono`, sleeps from `tokio`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Resolves once the shutdown flag is set.
///
/// If the sender is dropped without ever signalling, this never resolves.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

/// Sleep on `clock` unless shutdown is requested first.
///
/// Returns `false` when the sleep was cut short by shutdown.
pub async fn sleep_or_shutdown<K: Clock>(
    clock: &K,
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = clock.sleep(duration) => true,
        _ = shutdown_requested(shutdown) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_hour_in_range() {
        assert!(SystemClock.local_hour() < 24);
    }

    #[tokio::test]
    async fn test_sleep_completes_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(sleep_or_shutdown(&SystemClock, Duration::from_millis(1), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let completed = sleep_or_shutdown(&SystemClock, Duration::from_secs(600), &mut rx).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        assert!(sleep_or_shutdown(&SystemClock, Duration::from_millis(1), &mut rx).await);
    }
}
