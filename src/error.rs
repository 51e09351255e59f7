use reqwest::StatusCode;
use thiserror::Error;

/// Tick-local failures. None of these are fatal: the scheduler logs them at
/// the tick boundary and waits for the next tick. Startup configuration
/// problems are the only fatal class and are reported through `anyhow` in
/// `Config::from_env` before the loop starts.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The request never produced a response: connect failure or timeout.
    #[error("{endpoint}: request failed: {source}")]
    Connectivity {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The sensor API answered with a non-success status.
    #[error("{endpoint}: unexpected status {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },

    /// The response body was not the JSON we expected.
    #[error("{endpoint}: malformed response: {detail}")]
    Malformed {
        endpoint: &'static str,
        detail: String,
    },

    /// The response parsed as JSON but lacks a required field.
    #[error("{endpoint}: response missing `{field}`")]
    MissingField {
        endpoint: &'static str,
        field: &'static str,
    },

    /// The storage collaborator rejected or failed the blob upload.
    #[error("upload failed: {detail}")]
    Upload { detail: String },

    /// The durable store rejected or failed the record append.
    #[error("store append failed: {detail}")]
    Store { detail: String },
}

impl LoggerError {
    /// Stable label used in structured log fields and asserted by tests.
    pub fn kind(&self) -> &'static str {
        match self {
            LoggerError::Connectivity { .. } => "connectivity",
            LoggerError::Status { .. }
            | LoggerError::Malformed { .. }
            | LoggerError::MissingField { .. } => "protocol",
            LoggerError::Upload { .. } => "upload",
            LoggerError::Store { .. } => "store",
        }
    }

    pub(crate) fn connectivity(endpoint: &'static str, source: reqwest::Error) -> Self {
        LoggerError::Connectivity { endpoint, source }
    }

    pub(crate) fn upload(detail: impl Into<String>) -> Self {
        LoggerError::Upload {
            detail: detail.into(),
        }
    }

    pub(crate) fn store(detail: impl Into<String>) -> Self {
        LoggerError::Store {
            detail: detail.into(),
        }
    }
}
