use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::request::Request;

/// Server error codes that mean the session lacks the right credentials.
const ACCESS_CODES: &[&str] = &[
    "ACCESS-DENIED",
    "USERNAME-REQUIRED",
    "PASSWORD-REQUIRED",
    "INVALID-USERNAME",
    "INVALID-PASSWORD",
    "ALREADY-SET-USERNAME",
    "ALREADY-SET-PASSWORD",
];

/// Top-level error type for the `nutly-api` crate.
///
/// Errors that carry a [`Request`] are operation-level: they belong to the
/// caller that issued that command. Errors without one are connection-level
/// and are what a supervising layer reacts to with reconnect-after-delay.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// TCP connect failed (refused, unreachable, DNS failure).
    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not complete within the configured timeout.
    #[error("connection to {host}:{port} timed out after {timeout_secs}s")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout_secs: u64,
    },

    /// Socket-level failure while a session was open.
    #[error("transport error: {source}")]
    Transport {
        request: Option<Arc<Request>>,
        #[source]
        source: std::io::Error,
    },

    /// The connection closed (remotely or by `disconnect()`) before the
    /// pending command completed.
    #[error("connection closed")]
    Closed { request: Option<Arc<Request>> },

    // ── Operation ───────────────────────────────────────────────────
    /// No terminating line arrived within the response window.
    #[error("no response within {}s", .timeout.as_secs_f64())]
    Timeout {
        request: Arc<Request>,
        timeout: Duration,
    },

    /// Another command held the connection for every retry attempt.
    /// The command was never written.
    #[error("connection busy: '{command}' not sent after {attempts} attempts")]
    Busy { command: String, attempts: u32 },

    /// The server answered with an `ERR <code>` line.
    #[error("server error: {code}")]
    Server { request: Arc<Request>, code: String },

    /// `USERNAME` / `PASSWORD` exchange was rejected or failed.
    #[error("authentication as '{username}' failed: {source}")]
    Authentication {
        username: String,
        #[source]
        source: Box<Error>,
    },

    /// A command line contained a newline and would have split on the wire.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

impl Error {
    /// The request this error resolved, if it was operation-level.
    pub fn request(&self) -> Option<&Arc<Request>> {
        match self {
            Self::Transport { request, .. } | Self::Closed { request } => request.as_ref(),
            Self::Timeout { request, .. } | Self::Server { request, .. } => Some(request),
            Self::Authentication { source, .. } => source.request(),
            Self::Connect { .. }
            | Self::ConnectTimeout { .. }
            | Self::Busy { .. }
            | Self::InvalidCommand(_) => None,
        }
    }

    /// Returns `true` when no command was in flight, i.e. the failure
    /// concerns the connection itself.
    pub fn is_connection_level(&self) -> bool {
        self.request().is_none() && !matches!(self, Self::Busy { .. } | Self::InvalidCommand(_))
    }

    /// Returns `true` for response-window and connect timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectTimeout { .. })
    }

    /// Returns `true` if credentials were missing or rejected.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Server { code, .. } => ACCESS_CODES.contains(&code.as_str()),
            _ => false,
        }
    }

    /// Returns `true` if retrying the same operation later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. }
                | Self::ConnectTimeout { .. }
                | Self::Transport { .. }
                | Self::Closed { .. }
                | Self::Timeout { .. }
                | Self::Busy { .. }
        )
    }

    /// The `ERR` code sent by the server, if any.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            Self::Authentication { source, .. } => source.server_code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Arc<Request> {
        Arc::new(Request {
            name: "localhost:3493".into(),
            id: 7,
            command: "GET VAR ups battery.charge".into(),
        })
    }

    #[test]
    fn timeout_is_operation_level() {
        let err = Error::Timeout {
            request: request(),
            timeout: Duration::from_secs(1),
        };
        assert!(!err.is_connection_level());
        assert!(err.is_timeout());
        assert_eq!(err.request().map(|r| r.id), Some(7));
        assert_eq!(err.to_string(), "no response within 1s");
    }

    #[test]
    fn closed_without_request_is_connection_level() {
        let err = Error::Closed { request: None };
        assert!(err.is_connection_level());
        assert!(err.is_transient());
    }

    #[test]
    fn busy_is_neither_connection_level_nor_tagged() {
        let err = Error::Busy {
            command: "LIST UPS".into(),
            attempts: 6,
        };
        assert!(err.request().is_none());
        assert!(!err.is_connection_level());
    }

    #[test]
    fn authentication_delegates_to_source() {
        let err = Error::Authentication {
            username: "monuser".into(),
            source: Box::new(Error::Server {
                request: request(),
                code: "INVALID-PASSWORD".into(),
            }),
        };
        assert!(err.is_auth_failure());
        assert_eq!(err.server_code(), Some("INVALID-PASSWORD"));
        assert_eq!(err.request().map(|r| r.id), Some(7));
    }

    #[test]
    fn access_denied_counts_as_auth_failure() {
        let err = Error::Server {
            request: request(),
            code: "ACCESS-DENIED".into(),
        };
        assert!(err.is_auth_failure());

        let err = Error::Server {
            request: request(),
            code: "VAR-NOT-SUPPORTED".into(),
        };
        assert!(!err.is_auth_failure());
    }
}
