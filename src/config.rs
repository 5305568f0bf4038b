use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://fbref.com";
pub const LISTING_MARKER: &str = "Scores-and-Fixtures";
pub const MATCH_PATH_PREFIX: &str = "/en/matches/";

const APP_DIR: &str = "fbref_ingest";
const DB_FILE: &str = "football.sqlite";

const DEFAULT_STAT_TABLES: &[&str] = &[
    "summary",
    "passing",
    "passing_types",
    "defense",
    "possession",
    "misc",
];

/// Knobs for the request budget the fetcher enforces.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub requests_per_window: u32,
    pub window: Duration,
    pub request_delay: Duration,
    pub retry_attempts: u32,
    pub backoff_factor: Duration,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 19,
            window: Duration::from_secs(60),
            request_delay: Duration::from_secs(3),
            retry_attempts: 3,
            backoff_factor: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub base_url: String,
    pub fetch: FetchConfig,
    /// Ordered table-kind markers; a detail table whose id contains one of
    /// these contributes columns to player rows.
    pub stat_tables: Vec<String>,
    pub database_url: Option<String>,
    pub log_level: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            fetch: FetchConfig::default(),
            stat_tables: DEFAULT_STAT_TABLES.iter().map(|s| s.to_string()).collect(),
            database_url: None,
            log_level: "info".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let fetch = FetchConfig {
            requests_per_window: env_parse("INGEST_REQUESTS_LIMIT")
                .unwrap_or(defaults.fetch.requests_per_window)
                .max(1),
            window: env_secs("INGEST_WINDOW_SECS").unwrap_or(defaults.fetch.window),
            request_delay: env_secs("INGEST_REQUEST_DELAY_SECS")
                .unwrap_or(defaults.fetch.request_delay),
            retry_attempts: env_parse("INGEST_RETRY_ATTEMPTS")
                .unwrap_or(defaults.fetch.retry_attempts)
                .min(10),
            backoff_factor: env_secs("INGEST_BACKOFF_SECS")
                .unwrap_or(defaults.fetch.backoff_factor),
            timeout: env_secs("INGEST_TIMEOUT_SECS")
                .unwrap_or(defaults.fetch.timeout)
                .max(Duration::from_secs(1)),
        };

        let stat_tables = std::env::var("INGEST_STAT_TABLES")
            .ok()
            .map(|raw| parse_list(&raw))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.stat_tables);

        Self {
            base_url: env_non_empty("FBREF_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            fetch,
            stat_tables,
            database_url: env_non_empty("DATABASE_URL"),
            log_level: env_non_empty("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}

/// SQLite file used when no `DATABASE_URL` is configured.
pub fn default_db_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(DB_FILE))
}

fn app_data_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(APP_DIR));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(APP_DIR))
}

fn parse_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in raw.split([',', ';', ' ']) {
        let part = part.trim();
        if !part.is_empty() && !out.iter().any(|seen| seen == part) {
            out.push(part.to_string());
        }
    }
    out
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_non_empty(key).and_then(|v| v.parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
