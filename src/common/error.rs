//! Error types for miniroute

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Session Errors ===
    #[error("No coordination store session")]
    NoConnection,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Node Errors ===
    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Invalid node path: {0:?}")]
    InvalidPath(String),

    #[error("Store error: {0}")]
    Store(String),

    // === Watch Errors ===
    #[error("Watch on {path} failed: {reason}")]
    Watch { path: String, reason: String },

    // === Routing Errors ===
    #[error("No connection available")]
    NoAddressAvailable,

    #[error("Backend client for {addr} failed: {reason}")]
    Backend { addr: String, reason: String },

    // === Registration Errors ===
    #[error("Registration of {addr} failed: {source}")]
    Registration {
        addr: String,
        #[source]
        source: Box<Error>,
    },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("{0} is closed")]
    Closed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_)
                | Error::NoConnection
                | Error::Watch { .. }
                | Error::NoAddressAvailable
        )
    }

    /// Wrap a store failure as a registration failure for `addr`.
    pub fn registration(addr: impl Into<String>, source: Error) -> Self {
        Error::Registration {
            addr: addr.into(),
            source: Box::new(source),
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NoNode(_) => StatusCode::NOT_FOUND,
            Error::NodeExists(_) => StatusCode::CONFLICT,
            Error::InvalidConfig(_) | Error::InvalidPath(_) => StatusCode::BAD_REQUEST,
            Error::NoConnection
            | Error::ConnectionFailed(_)
            | Error::NoAddressAvailable
            | Error::Closed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
