use futures::{future::BoxFuture, FutureExt};
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};

use crate::metrics::RATE_LIMIT_REJECTIONS_TOTAL;

pub const DEFAULT_IDENTIFIER: &str = "default";
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const MAX_QUEUE_WAIT: Duration = Duration::from_secs(60);
const MIN_QUEUE_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub block_duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    reset_time: Instant,
    blocked_until: Option<Instant>,
}

impl WindowState {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            reset_time: now + window,
            blocked_until: None,
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

#[derive(Default)]
struct LimiterState {
    configs: HashMap<String, RateLimitConfig>,
    windows: HashMap<String, WindowState>,
}

/// Fixed-window limiter keyed by logical endpoint and caller identifier.
///
/// Unconfigured endpoints always allow. State lives only in this instance.
#[derive(Default)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

fn window_key(endpoint: &str, identifier: &str) -> String {
    format!("{}:{}", endpoint, identifier)
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // A poisoned lock only means a panic elsewhere; the counters are still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register or replace the limit for `endpoint`.
    pub fn set_limit(&self, endpoint: &str, config: RateLimitConfig) {
        let mut state = self.lock();
        state.configs.insert(endpoint.to_string(), config);
        let prefix = format!("{}:", endpoint);
        state.windows.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn limit_for(&self, endpoint: &str) -> Option<RateLimitConfig> {
        self.lock().configs.get(endpoint).copied()
    }

    /// Count one request and report whether it is allowed.
    pub fn check_limit(&self, endpoint: &str, identifier: &str) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        let Some(config) = state.configs.get(endpoint).copied() else {
            return true;
        };

        let window = state
            .windows
            .entry(window_key(endpoint, identifier))
            .or_insert_with(|| WindowState::fresh(now, config.window));

        if window.is_blocked(now) {
            RATE_LIMIT_REJECTIONS_TOTAL
                .with_label_values(&[endpoint, "blocked"])
                .inc();
            return false;
        }
        if window.blocked_until.is_some() {
            *window = WindowState::fresh(now, config.window);
        }

        if now >= window.reset_time {
            window.count = 0;
            window.reset_time = now + config.window;
        }

        if window.count >= config.max_requests {
            if let Some(block) = config.block_duration {
                window.blocked_until = Some(now + block);
                tracing::warn!(endpoint, identifier, "Rate limit exceeded, key blocked");
            }
            RATE_LIMIT_REJECTIONS_TOTAL
                .with_label_values(&[endpoint, "limited"])
                .inc();
            return false;
        }

        window.count += 1;
        true
    }

    /// Requests left in the current window; `None` for unconfigured endpoints.
    pub fn remaining_requests(&self, endpoint: &str, identifier: &str) -> Option<u32> {
        let now = Instant::now();
        let state = self.lock();
        let config = state.configs.get(endpoint)?;
        let remaining = match state.windows.get(&window_key(endpoint, identifier)) {
            None => config.max_requests,
            Some(window) if window.is_blocked(now) => 0,
            Some(window) if window.blocked_until.is_some() || now >= window.reset_time => {
                config.max_requests
            }
            Some(window) => config.max_requests.saturating_sub(window.count),
        };
        Some(remaining)
    }

    /// When the caller may next be admitted: the end of an active block, else the
    /// end of the current window.
    pub fn reset_time(&self, endpoint: &str, identifier: &str) -> Option<Instant> {
        let now = Instant::now();
        let state = self.lock();
        let window = state.windows.get(&window_key(endpoint, identifier))?;
        match window.blocked_until {
            Some(until) if now < until => Some(until),
            _ => Some(window.reset_time),
        }
    }

    pub fn is_blocked(&self, endpoint: &str, identifier: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .windows
            .get(&window_key(endpoint, identifier))
            .is_some_and(|window| window.is_blocked(now))
    }

    /// Drop expired, unblocked windows and lift elapsed blocks.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.windows.len();

        state.windows.retain(|_, window| match window.blocked_until {
            Some(until) if now >= until => {
                window.blocked_until = None;
                window.count = 0;
                true
            }
            Some(_) => true,
            None => now < window.reset_time,
        });

        let removed = before - state.windows.len();
        if removed > 0 {
            tracing::debug!(removed, "Rate limiter sweep removed expired windows");
        }
        removed
    }

    pub fn tracked_windows(&self) -> usize {
        self.lock().windows.len()
    }

    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct QueuedRequest {
    endpoint: String,
    identifier: String,
    job: Job,
}

/// Serialises rate-limited calls behind a single drain loop.
pub struct RequestQueue {
    limiter: Arc<RateLimiter>,
    pending: Mutex<VecDeque<QueuedRequest>>,
    draining: AtomicBool,
}

impl RequestQueue {
    pub fn new(limiter: Arc<RateLimiter>) -> Arc<Self> {
        Arc::new(Self {
            limiter,
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.lock_pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<QueuedRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `request` and wait for its result. The request runs once the limiter
    /// admits `identifier` on `endpoint`.
    pub async fn enqueue<F, Fut, T>(
        self: &Arc<Self>,
        request: F,
        endpoint: &str,
        identifier: &str,
    ) -> anyhow::Result<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            async move {
                let result = request().await;
                let _ = tx.send(result);
            }
            .boxed()
        });

        self.lock_pending().push_back(QueuedRequest {
            endpoint: endpoint.to_string(),
            identifier: identifier.to_string(),
            job,
        });
        self.start_draining();

        rx.await
            .map_err(|_| anyhow::anyhow!("Request queue dropped the request"))?
    }

    fn start_draining(self: &Arc<Self>) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain().await });
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.lock_pending().pop_front();
            let Some(item) = next else {
                self.draining.store(false, Ordering::Release);
                // An enqueue may have slipped in after the empty check.
                if self.lock_pending().is_empty()
                    || self
                        .draining
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    return;
                }
                continue;
            };

            while !self.limiter.check_limit(&item.endpoint, &item.identifier) {
                let now = Instant::now();
                let wait = self
                    .limiter
                    .reset_time(&item.endpoint, &item.identifier)
                    .map(|reset| reset.saturating_duration_since(now))
                    .unwrap_or(MAX_QUEUE_WAIT)
                    .clamp(MIN_QUEUE_WAIT, MAX_QUEUE_WAIT);
                tracing::debug!(
                    endpoint = %item.endpoint,
                    identifier = %item.identifier,
                    wait_ms = wait.as_millis() as u64,
                    "Queued request waiting for rate limit window"
                );
                tokio::time::sleep(wait).await;
            }

            (item.job)().await;
        }
    }
}
