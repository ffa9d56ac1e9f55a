use std::{collections::HashMap, sync::Mutex, time::Duration};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Remote-call policy: 5 attempts, 1s base, 30s cap, up to 1s jitter.
    pub fn remote() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            jitter_max: Some(Duration::from_millis(1000)),
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (0-based):
    /// `min(base * 2^attempt + jitter, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt));
        let jitter = self.jitter_max.map(random_jitter).unwrap_or_default();
        std::cmp::min(exponential.saturating_add(jitter), self.max_backoff)
    }
}

fn random_jitter(max: Duration) -> Duration {
    let jitter_ms = max.as_millis() as u64;
    if jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::random::<u64>() % (jitter_ms + 1))
}

pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt as usize + 1 >= config.max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(config.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

/// Keyed exponential backoff.
///
/// Each key tracks how many consecutive failures it has seen; a success resets
/// the counter. Instances are owned by whoever makes the remote calls.
pub struct ExponentialBackoff {
    config: RetryConfig,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::remote())
    }
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Failures recorded for `key` by a call that is still retrying.
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts
            .lock()
            .map(|attempts| attempts.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn record_failure(&self, key: &str) -> u32 {
        match self.attempts.lock() {
            Ok(mut attempts) => {
                let counter = attempts.entry(key.to_string()).or_insert(0);
                *counter += 1;
                *counter
            }
            Err(_) => u32::MAX,
        }
    }

    fn reset(&self, key: &str) {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.remove(key);
        }
    }

    /// Run `request` until it succeeds, `should_retry` rejects the error, or the
    /// configured number of attempts is used up. The last error is returned.
    pub async fn execute<F, Fut, T, E, P>(
        &self,
        key: &str,
        mut request: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        loop {
            match request().await {
                Ok(value) => {
                    self.reset(key);
                    return Ok(value);
                }
                Err(err) => {
                    let failures = self.record_failure(key);
                    if failures as usize >= self.config.max_attempts || !should_retry(&err) {
                        self.reset(key);
                        return Err(err);
                    }

                    let delay = self.config.delay_for(failures - 1);
                    tracing::debug!(
                        key,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_retries() {
        let counter = AtomicUsize::new(0);

        let res: Result<usize, &'static str> = retry_async_with_config(quick(), || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("fail")
            } else {
                Ok(n)
            }
        })
        .await;

        assert!(res.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let cfg = RetryConfig {
            max_attempts: 2,
            ..quick()
        };

        let res: Result<(), &'static str> = retry_async_with_config(cfg, || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always fail")
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let cfg = RetryConfig {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            jitter_max: None,
        };
        assert_eq!(cfg.delay_for(0), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for(1), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for(4), Duration::from_millis(16_000));
        assert_eq!(cfg.delay_for(5), Duration::from_millis(30_000));
        assert_eq!(cfg.delay_for(40), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let cfg = RetryConfig::remote();
        for _ in 0..50 {
            let delay = cfg.delay_for(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }
}
