//! Hook fired after block payloads commit.
//!
//! The balance aggregator folds the accumulate tables into per-address
//! balances. It runs elsewhere; the dispatcher only tells it there is new work.

use std::sync::Arc;
use tokio::sync::Notify;

/// Receives a signal after each committed block payload.
pub trait BalanceManager: Send + Sync {
    /// Must not block: it runs on the dispatcher's task.
    fn exec(&self);
}

/// Ignores the signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBalanceManager;

impl BalanceManager for NoopBalanceManager {
    fn exec(&self) {}
}

/// Wakes an aggregator task waiting on a shared [`Notify`].
///
/// Signals raised while the aggregator is busy coalesce into one wake-up.
#[derive(Debug, Clone, Default)]
pub struct NotifyBalanceManager {
    notify: Arc<Notify>,
}

impl NotifyBalanceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the aggregator awaits with `notified().await`.
    #[must_use]
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

impl BalanceManager for NotifyBalanceManager {
    fn exec(&self) {
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_exec_wakes_waiter() {
        let manager = NotifyBalanceManager::new();
        let notify = manager.notifier();

        let waiter = tokio::spawn(async move { notify.notified().await });
        manager.exec();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_signals_coalesce() {
        let manager = NotifyBalanceManager::new();
        manager.exec();
        manager.exec();

        let notify = manager.notifier();
        notify.notified().await;
        let second = tokio::time::timeout(Duration::from_millis(20), notify.notified()).await;
        assert!(second.is_err(), "only one permit is stored");
    }
}
