//! Bounded retry with exponential backoff for processor calls

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::AdapterError;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy { attempts: u32, base_delay: Duration }

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self { Self { attempts: attempts.max(1), base_delay } }

    /// Retries only errors that [`AdapterError::is_retryable`] accepts; doubles the delay each time.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(call = label, attempt, error = %e, "processor call failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bounded_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = policy.run("poll", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AdapterError::Network("down".into()))
        }).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 400 ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(700));
    }
}
