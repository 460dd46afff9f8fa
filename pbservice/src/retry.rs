use std::future::Future;
use std::time::Duration;

use futures_timer::Delay;

/// Bounded retries with a fixed pause between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff,
        }
    }

    /// Calls `attempt` with the attempt number until it succeeds or the
    /// attempts run out, returning the first success or the last error. At
    /// least one attempt is always made.
    pub async fn run<F, Fut, T, E>(&self, mut attempt: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut n = 0;
        loop {
            match attempt(n).await {
                Ok(v) => return Ok(v),
                Err(e) if n + 1 >= attempts => return Err(e),
                Err(_) => {
                    n += 1;
                    Delay::new(self.backoff).await;
                }
            }
        }
    }
}
