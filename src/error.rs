use thiserror::Error;

/// A connection-level failure: nothing usable came back from the server.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

/// Failure of a single logical fetch, after the fetcher's own retries.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempts: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("request to {url} returned http {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            FetchError::Transient { url, .. } | FetchError::Status { url, .. } => url,
        }
    }
}

/// A parse unit's fields do not satisfy the record schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}`: {reason}")]
pub struct RecordValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl RecordValidationError {
    pub fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "required value is missing".to_string(),
        }
    }

    pub fn invalid(field: &'static str, raw: &str, expected: &str) -> Self {
        Self {
            field,
            reason: format!("cannot parse {raw:?} as {expected}"),
        }
    }
}

/// The document does not have the shape the extractor targets.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{url}: missing {element}")]
    MissingElement { url: String, element: &'static str },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("storage runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("schema error: {0}")]
    Schema(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid source {url}: {reason}")]
    InvalidSource { url: String, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
