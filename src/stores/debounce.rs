//! Cancellable trailing-edge timer.
//!
//! `arm` schedules a job after the idle window and cancels whatever was
//! still waiting, so a burst of calls fires only the last job. A job whose
//! window has elapsed runs in its own task and is never cancelled.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Idle window for search-as-you-type.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `job` after the idle window, replacing any job still
    /// waiting. Must be called inside a tokio runtime.
    pub fn arm<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached: aborting the timer must not cancel a fetch in flight.
            tokio::spawn(job);
        });
        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }

    /// True while a job is waiting out its window.
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(SEARCH_DEBOUNCE)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let make = move |query: &str| {
            let sink = sink.clone();
            let query = query.to_string();
            Box::pin(async move { sink.lock().push(query) }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_only_last_job() {
        let debouncer = Debouncer::default();
        let (fired, job) = recorder();

        debouncer.arm(job("a"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.arm(job("ab"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.arm(job("abc"));
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(*fired.lock(), vec!["abc".to_string()]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_fires_each_job() {
        let debouncer = Debouncer::default();
        let (fired, job) = recorder();

        debouncer.arm(job("a"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        debouncer.arm(job("ab"));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(*fired.lock(), vec!["a".to_string(), "ab".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_never_cancels_started_job() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let fired = Arc::new(Mutex::new(Vec::new()));

        let slow = fired.clone();
        debouncer.arm(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            slow.lock().push("slow".to_string());
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!debouncer.is_pending());

        let (_, job) = recorder();
        debouncer.arm(job("next"));
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(*fired.lock(), vec!["slow".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_job() {
        let debouncer = Debouncer::new(Duration::from_millis(50));
        let (fired, job) = recorder();

        debouncer.arm(job("x"));
        assert!(debouncer.is_pending());
        debouncer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(fired.lock().is_empty());
    }
}
