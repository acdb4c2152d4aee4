//! Ack deadline timers.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use botgate_domain::EventId;

/// A spawned sleep that reports an ack deadline for one send attempt.
///
/// Dropping an `AckTimer` detaches the task; call [`cancel`](Self::cancel)
/// to stop it.
pub struct AckTimer {
    event_id: EventId,
    attempt: u32,
    handle: JoinHandle<()>,
}

impl AckTimer {
    pub fn spawn<F, Fut>(event_id: EventId, attempt: u32, deadline: Duration, on_expiry: F) -> Self
    where
        F: FnOnce(EventId, u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fired_id = event_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            on_expiry(fired_id, attempt).await;
        });
        Self {
            event_id,
            attempt,
            handle,
        }
    }

    pub fn is_for(&self, event_id: &EventId, attempt: u32) -> bool {
        self.event_id == *event_id && self.attempt == attempt
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_deadline() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let _timer = AckTimer::spawn(EventId::new("e1"), 2, Duration::from_secs(5), move |_, attempt| async move {
            counter.store(attempt + 1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let timer = AckTimer::spawn(EventId::new("e1"), 0, Duration::from_secs(1), move |_, _| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_for(&EventId::new("e1"), 0));
        assert!(!timer.is_for(&EventId::new("e1"), 1));

        timer.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
