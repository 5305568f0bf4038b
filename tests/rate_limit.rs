use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};

use fbref_ingest::config::FetchConfig;
use fbref_ingest::error::{FetchError, TransportError};
use fbref_ingest::fetcher::{Clock, DocumentSource, RateLimitedFetcher};
use fbref_ingest::http_client::{RawResponse, Transport};

const URL: &str = "https://fbref.test/en/matches/3a6836b4";

/// Advances only when something sleeps on it.
struct FakeClock {
    start: Instant,
    elapsed: Duration,
    utc: DateTime<Utc>,
    slept: Vec<Duration>,
}

impl FakeClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Duration::ZERO,
            utc: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            slept: Vec::new(),
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.utc
    }

    fn sleep(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        self.elapsed += duration;
        self.slept.push(duration);
    }
}

/// Replays canned outcomes, then answers 200 forever.
#[derive(Default)]
struct ScriptedTransport {
    script: RefCell<VecDeque<Result<RawResponse, TransportError>>>,
    calls: Cell<usize>,
}

impl ScriptedTransport {
    fn with(script: Vec<Result<RawResponse, TransportError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            calls: Cell::new(0),
        }
    }
}

impl Transport for &ScriptedTransport {
    fn get(&self, _url: &str) -> Result<RawResponse, TransportError> {
        self.calls.set(self.calls.get() + 1);
        self.script.borrow_mut().pop_front().unwrap_or_else(|| ok("<html></html>"))
    }
}

fn ok(body: &str) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
        status: 200,
        body: body.to_string(),
    })
}

fn refused() -> Result<RawResponse, TransportError> {
    Err(TransportError {
        message: "connection refused".to_string(),
    })
}

fn config(limit: u32, delay_secs: u64) -> FetchConfig {
    FetchConfig {
        requests_per_window: limit,
        window: Duration::from_secs(60),
        request_delay: Duration::from_secs(delay_secs),
        retry_attempts: 3,
        backoff_factor: Duration::from_secs(5),
        timeout: Duration::from_secs(15),
    }
}

#[test]
fn one_call_over_the_limit_waits_once_and_resets_the_window() {
    let transport = ScriptedTransport::default();
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, FakeClock::new(), &config(3, 0));

    for _ in 0..3 {
        fetcher.fetch(URL).unwrap();
    }
    assert_eq!(fetcher.limiter().window_count(), 3);
    assert_eq!(fetcher.limiter().enforced_waits(), 0);
    assert!(fetcher.clock().slept.is_empty());

    fetcher.fetch(URL).unwrap();
    assert_eq!(fetcher.limiter().enforced_waits(), 1);
    assert_eq!(fetcher.limiter().window_count(), 1);
    assert_eq!(fetcher.clock().slept, vec![Duration::from_secs(60)]);
    assert_eq!(fetcher.total_calls(), 4);
}

#[test]
fn window_wait_accounts_for_time_already_spent() {
    let transport = ScriptedTransport::default();
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, FakeClock::new(), &config(2, 3));

    for _ in 0..3 {
        fetcher.fetch(URL).unwrap();
    }
    let secs = |s| Duration::from_secs(s);
    assert_eq!(
        fetcher.clock().slept,
        vec![secs(3), secs(3), secs(54), secs(3)]
    );
    assert_eq!(fetcher.limiter().enforced_waits(), 1);
}

#[test]
fn expired_window_does_not_sleep() {
    let transport = ScriptedTransport::default();
    let mut cfg = config(1, 0);
    cfg.window = Duration::from_secs(10);
    cfg.request_delay = Duration::from_secs(20);
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, FakeClock::new(), &cfg);

    fetcher.fetch(URL).unwrap();
    fetcher.fetch(URL).unwrap();
    assert_eq!(
        fetcher.clock().slept,
        vec![Duration::from_secs(20), Duration::from_secs(20)]
    );
    assert_eq!(fetcher.limiter().window_count(), 1);
}

#[test]
fn connection_failures_retry_with_growing_backoff() {
    let transport = ScriptedTransport::with(vec![refused(), refused(), ok("<p>done</p>")]);
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, FakeClock::new(), &config(19, 0));

    let doc = fetcher.fetch(URL).unwrap();
    assert_eq!(doc.body, "<p>done</p>");
    assert_eq!(doc.url, URL);
    assert_eq!(transport.calls.get(), 3);
    assert_eq!(
        fetcher.clock().slept,
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
    // Retries are not separate logical calls.
    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(fetcher.limiter().window_count(), 1);
}

#[test]
fn retries_are_bounded() {
    let transport = ScriptedTransport::with(vec![refused(), refused(), refused(), refused()]);
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, FakeClock::new(), &config(19, 0));

    let err = fetcher.fetch(URL).unwrap_err();
    match err {
        FetchError::Transient { url, attempts, message } => {
            assert_eq!(url, URL);
            assert_eq!(attempts, 4);
            assert!(message.contains("refused"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.calls.get(), 4);
    let secs = |s| Duration::from_secs(s);
    assert_eq!(fetcher.clock().slept, vec![secs(5), secs(10), secs(20)]);
    assert_eq!(fetcher.total_calls(), 1);
}

#[test]
fn non_success_status_is_not_retried() {
    let transport = ScriptedTransport::with(vec![Ok(RawResponse {
        status: 429,
        body: String::new(),
    })]);
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, FakeClock::new(), &config(19, 0));

    let err = fetcher.fetch(URL).unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 429, .. }));
    assert_eq!(err.url(), URL);
    assert_eq!(transport.calls.get(), 1);
    assert!(fetcher.clock().slept.is_empty());
    assert_eq!(fetcher.total_calls(), 1);
}

#[test]
fn failed_fetches_still_spend_budget() {
    let transport = ScriptedTransport::with(vec![
        Ok(RawResponse {
            status: 404,
            body: String::new(),
        }),
        Ok(RawResponse {
            status: 404,
            body: String::new(),
        }),
    ]);
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, FakeClock::new(), &config(2, 0));

    assert!(fetcher.fetch(URL).is_err());
    assert!(fetcher.fetch(URL).is_err());
    fetcher.fetch(URL).unwrap();
    assert_eq!(fetcher.limiter().enforced_waits(), 1);
    assert_eq!(fetcher.total_calls(), 3);
}

#[test]
fn documents_are_stamped_with_fetch_time() {
    let transport = ScriptedTransport::default();
    let clock = FakeClock::new();
    let expected = clock.utc;
    let mut fetcher = RateLimitedFetcher::with_clock(&transport, clock, &config(19, 0));

    let doc = fetcher.fetch(URL).unwrap();
    assert_eq!(doc.fetched_at, expected);
}
