//! CLI error types with miette diagnostics.
//!
//! Folds protocol and configuration errors into user-facing errors with
//! help text and a distinct process exit code per failure class.

use miette::Diagnostic;
use thiserror::Error;

use nutly_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

/// `ERR` codes that mean the named device, variable or command does not exist.
const NOT_FOUND_CODES: &[&str] = &[
    "UNKNOWN-UPS",
    "VAR-NOT-SUPPORTED",
    "CMD-NOT-SUPPORTED",
    "UNKNOWN-COMMAND",
];

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(nutly::connection_failed),
        help(
            "Check that upsd is running and listening on the given host.\n\
             Set the host with --host hostname[:port] or UPS_HOST."
        )
    )]
    ConnectionFailed { message: String },

    #[error("{message}")]
    #[diagnostic(code(nutly::disconnected))]
    Disconnected { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(nutly::auth_failed),
        help(
            "Verify the credentials against upsd.users.\n\
             Pass them with --username/--password or UPS_USERNAME/UPS_PASSWORD."
        )
    )]
    AuthFailed { message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(nutly::not_found),
        help("Run: nutly info to see the devices, variables and commands upsd offers")
    )]
    NotFound { message: String },

    #[error("upsd reports no devices")]
    #[diagnostic(
        code(nutly::no_device),
        help("Check the driver configuration in ups.conf on the server.")
    )]
    NoDevice,

    #[error("upsd reports several devices: {available}")]
    #[diagnostic(
        code(nutly::ambiguous_device),
        help("Pick one with --device (-d) or set UPS_DEVICE.")
    )]
    AmbiguousDevice { available: String },

    // ── Operation ────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(nutly::timeout),
        help("Increase the response window with --timeout (1-60 seconds).")
    )]
    Timeout { message: String },

    #[error("{message}")]
    #[diagnostic(code(nutly::busy))]
    Busy { message: String },

    #[error("{message}")]
    #[diagnostic(code(nutly::rejected))]
    Rejected { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(nutly::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(nutly::config),
        help("Run: nutly config path to see where the config file is expected")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render output: {0}")]
    #[diagnostic(code(nutly::json))]
    Json(#[from] serde_json::Error),

    #[error("Cannot render output: {0}")]
    #[diagnostic(code(nutly::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::NoDevice => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::AmbiguousDevice { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── nutly_api::Error → CliError mapping ──────────────────────────────

impl From<nutly_api::Error> for CliError {
    fn from(err: nutly_api::Error) -> Self {
        use nutly_api::Error;

        // Operation-level errors name the request they resolved.
        let message = match err.request() {
            Some(request) => format!("{request}: {err}"),
            None => err.to_string(),
        };

        if err.is_auth_failure() {
            return Self::AuthFailed { message };
        }

        match err {
            Error::Connect { .. } => Self::ConnectionFailed { message },
            Error::ConnectTimeout { .. } | Error::Timeout { .. } => Self::Timeout { message },
            Error::Transport { .. } | Error::Closed { .. } => Self::Disconnected { message },
            Error::Busy { .. } => Self::Busy { message },
            Error::Server { ref code, .. } if NOT_FOUND_CODES.contains(&code.as_str()) => {
                Self::NotFound { message }
            }
            Error::InvalidCommand(reason) => Self::Validation {
                field: "command".into(),
                reason,
            },
            Error::Server { .. } | Error::Authentication { .. } => Self::Rejected { message },
        }
    }
}
