//! Centralized error types for goatee.
//!
//! Every error carries a [`ErrorKind`] so the scheduler, not the component
//! that failed, decides whether the process keeps running.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Ends the process: bad configuration, rejected credentials.
    Fatal,
    /// Abandons the current cycle; the next scheduled cycle retries.
    Cycle,
    /// A shutdown was requested.
    Cancelled,
}

/// All errors produced by the goatee library.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file does not exist.
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// The configuration file could not be read or parsed.
    #[error("Invalid config file '{path}': {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    /// The log file could not be opened for appending.
    #[error("Cannot open log file '{path}': {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TCP connect or greeting failure.
    #[error("Connection to {server} failed: {reason}")]
    Connection { server: String, reason: String },

    /// TLS handshake or connector setup failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server rejected the credentials.
    #[error("Login failed for '{user}': {reason}")]
    Login { user: String, reason: String },

    /// Unexpected data or an operation issued in the wrong session state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server answered a command with NO.
    #[error("{command} rejected by server: {text}")]
    No { command: String, text: String },

    /// Server answered a command with BAD.
    #[error("{command} refused as malformed: {text}")]
    Bad { command: String, text: String },

    /// Server closed the session.
    #[error("Server sent BYE: {0}")]
    Bye(String),

    /// A command did not complete within its receive budget.
    #[error("{command} did not complete after {attempts} receive timeouts of {per_recv:?}")]
    Timeout {
        command: String,
        attempts: u32,
        per_recv: Duration,
    },

    /// I/O error with the associated path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The operation was interrupted by a shutdown request.
    #[error("Operation cancelled by shutdown request")]
    Cancelled,
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error for the scheduler.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigNotFound(_)
            | Self::InvalidConfig { .. }
            | Self::LogFile { .. }
            | Self::Login { .. } => ErrorKind::Fatal,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Connection { .. }
            | Self::Tls(_)
            | Self::Protocol(_)
            | Self::No { .. }
            | Self::Bad { .. }
            | Self::Bye(_)
            | Self::Timeout { .. }
            | Self::Io { .. } => ErrorKind::Cycle,
        }
    }
}

/// Network I/O without a path: wrap as a protocol failure so the cycle aborts.
impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Protocol(format!("I/O: {source}"))
    }
}

impl From<native_tls::Error> for Error {
    fn from(source: native_tls::Error) -> Self {
        Self::Tls(source.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            Error::ConfigNotFound(PathBuf::from("goatee.cfg")).kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            Error::Login {
                user: "me".into(),
                reason: "NO".into()
            }
            .kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            Error::Connection {
                server: "imap.example.com:993".into(),
                reason: "refused".into()
            }
            .kind(),
            ErrorKind::Cycle
        );
        assert_eq!(Error::Protocol("x".into()).kind(), ErrorKind::Cycle);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout {
            command: "UID FETCH".into(),
            attempts: 3,
            per_recv: Duration::from_secs(10),
        };
        assert_eq!(err.kind(), ErrorKind::Cycle);
        assert_eq!(
            err.to_string(),
            "UID FETCH did not complete after 3 receive timeouts of 10s"
        );
    }
}
