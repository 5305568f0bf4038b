use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::config::FetchConfig;
use crate::document::Document;
use crate::error::FetchError;
use crate::http_client::Transport;

/// Time source and sleeper, so pacing can be driven by a fake in tests.
pub trait Clock {
    fn now(&self) -> Instant;
    fn utc_now(&self) -> DateTime<Utc>;
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Anything the pipeline can pull documents from.
pub trait DocumentSource {
    fn fetch(&mut self, url: &str) -> Result<Document, FetchError>;

    /// Logical fetches issued over the lifetime of this source.
    fn total_calls(&self) -> u64;
}

/// Request-count budget over a fixed window. Assumes a single caller.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    count: u32,
    window_start: Option<Instant>,
    enforced_waits: u32,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            count: 0,
            window_start: None,
            enforced_waits: 0,
        }
    }

    /// Called before every request. Once the window's budget is spent, blocks
    /// until the window has elapsed since it started, then opens a new one.
    /// Returns the time actually slept.
    pub fn acquire<C: Clock>(&mut self, clock: &mut C) -> Option<Duration> {
        let now = clock.now();
        let start = *self.window_start.get_or_insert(now);
        if self.count < self.limit {
            return None;
        }

        self.enforced_waits += 1;
        let elapsed = now.saturating_duration_since(start);
        let slept = if elapsed < self.window {
            let wait = self.window - elapsed;
            info!(
                wait_secs = wait.as_secs_f64(),
                requests = self.count,
                "request budget spent, waiting for window"
            );
            clock.sleep(wait);
            Some(wait)
        } else {
            None
        };
        self.count = 0;
        self.window_start = Some(clock.now());
        slept
    }

    pub fn record(&mut self) {
        self.count += 1;
    }

    pub fn window_count(&self) -> u32 {
        self.count
    }

    /// Times the budget was exhausted and a new window had to be opened.
    pub fn enforced_waits(&self) -> u32 {
        self.enforced_waits
    }
}

pub struct RateLimitedFetcher<T, C = SystemClock> {
    transport: T,
    clock: C,
    limiter: RateLimiter,
    request_delay: Duration,
    retry_attempts: u32,
    backoff_factor: Duration,
    total_calls: u64,
}

impl<T: Transport> RateLimitedFetcher<T, SystemClock> {
    pub fn new(transport: T, config: &FetchConfig) -> Self {
        Self::with_clock(transport, SystemClock, config)
    }
}

impl<T: Transport, C: Clock> RateLimitedFetcher<T, C> {
    pub fn with_clock(transport: T, clock: C, config: &FetchConfig) -> Self {
        Self {
            transport,
            clock,
            limiter: RateLimiter::new(config.requests_per_window, config.window),
            request_delay: config.request_delay,
            retry_attempts: config.retry_attempts,
            backoff_factor: config.backoff_factor,
            total_calls: 0,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.backoff_factor
            .saturating_mul(1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX))
    }
}

impl<T: Transport, C: Clock> DocumentSource for RateLimitedFetcher<T, C> {
    #[instrument(skip(self), fields(call = self.total_calls + 1))]
    fn fetch(&mut self, url: &str) -> Result<Document, FetchError> {
        self.limiter.acquire(&mut self.clock);
        self.clock.sleep(self.request_delay);

        self.total_calls += 1;
        self.limiter.record();

        let mut retry = 0u32;
        loop {
            match self.transport.get(url) {
                Ok(resp) if resp.status == 200 => {
                    debug!(bytes = resp.body.len(), "fetched document");
                    return Ok(Document::new(url, self.clock.utc_now(), resp.body));
                }
                Ok(resp) => {
                    warn!(status = resp.status, "non-success status");
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: resp.status,
                    });
                }
                Err(err) if retry < self.retry_attempts => {
                    retry += 1;
                    let wait = self.backoff(retry);
                    warn!(
                        error = %err,
                        retry,
                        backoff_secs = wait.as_secs_f64(),
                        "connection failure, retrying"
                    );
                    self.clock.sleep(wait);
                }
                Err(err) => {
                    return Err(FetchError::Transient {
                        url: url.to_string(),
                        attempts: retry + 1,
                        message: err.message,
                    });
                }
            }
        }
    }

    fn total_calls(&self) -> u64 {
        self.total_calls
    }
}
