use rusqlite::ErrorCode;
use thiserror::Error;

/// A single document (or listing page) could not be retrieved. Never fatal for a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },
    #[error("connection error for {url}: {message}")]
    Connection { url: String, message: String },
    #[error("could not extract content from {url}: {message}")]
    Parse { url: String, message: String },
}

impl FetchError {
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::Timeout { .. } => "timeout",
            FetchError::Http { .. } => "http_error",
            FetchError::Connection { .. } => "connection",
            FetchError::Parse { .. } => "parse_error",
        }
    }

    /// Timeouts, dropped connections, 429 and 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connection { .. } => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            FetchError::Parse { .. } => false,
        }
    }
}

/// The page was fetched but did not have the structure the strategy expects.
#[derive(Debug, Error)]
#[error("unexpected page structure at {url}: {message}")]
pub struct ParseError {
    pub url: String,
    pub message: String,
}

impl ParseError {
    pub fn new(url: &str, message: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF text extraction failed: {0}")]
    Pdf(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Store failures abort the whole run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transient storage failure (safe to re-run): {0}")]
    Transient(#[source] rusqlite::Error),
    #[error("storage failure: {0}")]
    Fatal(#[source] rusqlite::Error),
    #[error("invalid table name {0:?}")]
    InvalidTable(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        let transient = matches!(
            e.sqlite_error_code(),
            Some(
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
                    | ErrorCode::OutOfMemory
            )
        );
        if transient {
            StorageError::Transient(e)
        } else {
            StorageError::Fatal(e)
        }
    }
}
