// ── Core error types ──
//
// User-facing errors from nutly-core. The `From<nutly_api::Error>` impl
// folds wire-level failures into what a supervisor acts on: connection
// trouble (retry later) versus a rejected or failed operation.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {host}: {reason}")]
    ConnectionFailed { host: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("upsd disconnected")]
    Disconnected,

    // ── Operation errors ─────────────────────────────────────────────
    #[error("'{command}' timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Connection busy: {command}")]
    Busy { command: String },

    #[error("upsd rejected '{command}': {code}")]
    Rejected { command: String, code: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("UPS not found: {identifier}")]
    UnitNotFound { identifier: String },

    #[error("Host not found: {name}")]
    HostNotFound { name: String },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// `true` for failures a supervisor answers with reconnect-after-delay.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::AuthenticationFailed { .. } | Self::Disconnected
        )
    }
}

// ── Conversion from protocol errors ──────────────────────────────────

impl From<nutly_api::Error> for CoreError {
    fn from(err: nutly_api::Error) -> Self {
        use nutly_api::Error as Api;

        match err {
            Api::Connect { host, port, source } => CoreError::ConnectionFailed {
                host: format!("{host}:{port}"),
                reason: source.to_string(),
            },
            Api::ConnectTimeout {
                host,
                port,
                timeout_secs,
            } => CoreError::ConnectionFailed {
                host: format!("{host}:{port}"),
                reason: format!("timed out after {timeout_secs}s"),
            },
            Api::Authentication { username, source } => CoreError::AuthenticationFailed {
                message: format!("{username}: {source}"),
            },
            Api::Transport { .. } | Api::Closed { .. } => CoreError::Disconnected,
            Api::Timeout { request, timeout } => CoreError::Timeout {
                command: request.command.clone(),
                timeout_secs: timeout.as_secs(),
            },
            Api::Busy { command, .. } => CoreError::Busy { command },
            Api::Server { request, code } => CoreError::Rejected {
                command: request.command.clone(),
                code,
            },
            Api::InvalidCommand(command) => CoreError::ValidationFailed {
                message: format!("invalid command: {command}"),
            },
        }
    }
}
