use std::fmt;

use reqwest::StatusCode;

#[derive(Debug)]
pub enum Error {
    Network(reqwest::Error),
    Timeout,
    Auth(String),
    Configuration(String),
    Write(String),
    Protocol(String),
    NotInitialized,
    Unavailable(String),
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl Error {
    /// True when the vendor answered 401, i.e. the grant is no longer accepted.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Network(e) if e.status() == Some(StatusCode::UNAUTHORIZED))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network(e) => write!(f, "network error: {e}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Error::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Error::Write(msg) => write!(f, "write failed: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::NotInitialized => write!(f, "connection not initialized"),
            Error::Unavailable(what) => write!(f, "{what} not available yet"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Network(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
