//! Configuration for the nutly binary.
//!
//! A TOML file (platform config dir, or an explicit path) layered under
//! `NUTLY_*` environment variables, validated into a
//! `nutly_core::ManagerConfig`. Validation is lenient: bad entries are
//! reported as warnings and skipped, never fatal.

use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use nutly_api::{ClientConfig, DEFAULT_PORT};
use nutly_core::{HostConfig, ManagerConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,

    /// Response timeout in seconds, 1-60.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Milliseconds before retrying a host that failed to initialise.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub hosts: Vec<HostEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            retry_delay_ms: default_retry_delay_ms(),
            hosts: Vec::new(),
        }
    }
}

/// One `[[hosts]]` entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostEntry {
    /// Defaults to the hostname.
    pub name: Option<String>,
    /// `hostname[:port]`; IPv6 literals in brackets.
    pub host: Option<String>,
    pub username: Option<String>,
    /// Plaintext; prefer `UPS_PASSWORD`.
    pub password: Option<String>,
}

fn default_name() -> String {
    "UPS".into()
}
fn default_timeout() -> u64 {
    15
}
fn default_poll_interval() -> u64 {
    30
}
fn default_retry_delay_ms() -> u64 {
    600
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "nutly", "nutly").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("nutly");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the Config from `path` (or the default location) + environment.
///
/// A missing file is not an error; defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    debug!(path = %path.display(), exists = path.exists(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("NUTLY_").ignore(&["hosts"]));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Render `cfg` as TOML with passwords masked.
pub fn render_redacted(cfg: &Config) -> Result<String, ConfigError> {
    let mut shown = cfg.clone();
    for host in &mut shown.hosts {
        if host.password.is_some() {
            host.password = Some("********".into());
        }
    }
    Ok(toml::to_string_pretty(&shown)?)
}

// ── Host parsing ────────────────────────────────────────────────────

/// Split `hostname[:port]` into its parts. The port defaults to 3493.
///
/// IPv6 literals must be bracketed when a port is given
/// (`[fe80::1]:3493`); a bare IPv6 literal takes the default port.
pub fn parse_host(value: &str) -> Result<(String, u16), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid("host", "empty host"));
    }

    let (hostname, port) = if let Some(rest) = value.strip_prefix('[') {
        let (addr, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("host", format!("{value}: missing ']'")))?;
        addr.parse::<Ipv6Addr>()
            .map_err(|_| invalid("host", format!("{value}: invalid IPv6 address")))?;
        let port = match tail {
            "" => None,
            tail => Some(
                tail.strip_prefix(':')
                    .ok_or_else(|| invalid("host", format!("{value}: expected ':' after ']'")))?,
            ),
        };
        (addr, port)
    } else if value.matches(':').count() > 1 {
        value
            .parse::<Ipv6Addr>()
            .map_err(|_| invalid("host", format!("{value}: invalid IPv6 address")))?;
        (value, None)
    } else {
        match value.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (value, None),
        }
    };

    if hostname.is_empty() {
        return Err(invalid("host", format!("{value}: missing hostname")));
    }
    if !hostname.contains(':')
        && !hostname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(invalid("host", format!("{value}: invalid hostname")));
    }

    let port = match port {
        None => DEFAULT_PORT,
        Some(port) => match port.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => return Err(invalid("host", format!("{value}: invalid port '{port}'"))),
        },
    };

    Ok((hostname.to_owned(), port))
}

// ── Resolution ──────────────────────────────────────────────────────

/// Credentials from `UPS_USERNAME` / `UPS_PASSWORD`, used for host entries
/// that set none of their own.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl EnvCredentials {
    pub fn from_env() -> Self {
        Self {
            username: std::env::var("UPS_USERNAME").ok(),
            password: std::env::var("UPS_PASSWORD").ok(),
        }
    }
}

/// A validated configuration plus whatever was wrong with the input.
#[derive(Debug)]
pub struct Resolved {
    pub manager: ManagerConfig,
    pub warnings: Vec<String>,
}

/// Validate `cfg` into a [`ManagerConfig`].
pub fn resolve(cfg: &Config, env: &EnvCredentials) -> Resolved {
    let mut warnings = Vec::new();

    let timeout = if (1..=60).contains(&cfg.timeout) {
        cfg.timeout
    } else {
        warnings.push(format!(
            "timeout: {} is not between 1 and 60, using {}",
            cfg.timeout,
            default_timeout()
        ));
        default_timeout()
    };
    let timeout = Duration::from_secs(timeout);

    let mut hosts = Vec::new();
    for (i, entry) in cfg.hosts.iter().enumerate() {
        let Some(raw) = entry.host.as_deref() else {
            warnings.push(format!("hosts[{i}]: missing host"));
            continue;
        };
        let (hostname, port) = match parse_host(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warnings.push(format!("hosts[{i}]: {e}"));
                continue;
            }
        };

        let username = entry.username.clone().or_else(|| env.username.clone());
        let password = entry
            .password
            .clone()
            .or_else(|| env.password.clone())
            .map(SecretString::from);
        let name = entry.name.clone().unwrap_or_else(|| hostname.clone());

        let client = ClientConfig {
            name: None,
            hostname,
            port,
            username,
            password,
            timeout,
            ..ClientConfig::default()
        };
        hosts.push(HostConfig::new(name, client));
    }

    if hosts.is_empty() {
        let client = ClientConfig {
            username: env.username.clone(),
            password: env.password.clone().map(SecretString::from),
            timeout,
            ..ClientConfig::default()
        };
        hosts.push(HostConfig::new(client.hostname.clone(), client));
    }

    Resolved {
        manager: ManagerConfig {
            hosts,
            poll_interval: Duration::from_secs(cfg.poll_interval.max(1)),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        },
        warnings,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_host_variants() {
        assert_eq!(parse_host("localhost").unwrap(), ("localhost".into(), 3493));
        assert_eq!(parse_host("nas.lan:3500").unwrap(), ("nas.lan".into(), 3500));
        assert_eq!(parse_host("10.0.0.5").unwrap(), ("10.0.0.5".into(), 3493));
        assert_eq!(parse_host("[::1]:3494").unwrap(), ("::1".into(), 3494));
        assert_eq!(parse_host("[fe80::1]").unwrap(), ("fe80::1".into(), 3493));
        assert_eq!(parse_host("fe80::1").unwrap(), ("fe80::1".into(), 3493));
    }

    #[test]
    fn parse_host_rejects_garbage() {
        for bad in ["", ":3493", "nas:0", "nas:70000", "nas:abc", "[::1", "[zz::1]", "na s", "[::1]x"] {
            assert!(parse_host(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn resolve_defaults_to_localhost() {
        let resolved = resolve(&Config::default(), &EnvCredentials::default());
        assert!(resolved.warnings.is_empty());
        assert_eq!(resolved.manager.hosts.len(), 1);
        let host = &resolved.manager.hosts[0];
        assert_eq!(host.name, "localhost");
        assert_eq!(host.client.port, 3493);
        assert_eq!(host.client.timeout, Duration::from_secs(15));
        assert_eq!(resolved.manager.retry_delay, Duration::from_millis(600));
    }

    #[test]
    fn resolve_skips_bad_entries_with_warnings() {
        let cfg = Config {
            timeout: 90,
            hosts: vec![
                HostEntry {
                    host: Some("nas:99999".into()),
                    ..HostEntry::default()
                },
                HostEntry::default(),
                HostEntry {
                    name: Some("garage".into()),
                    host: Some("10.0.0.7".into()),
                    ..HostEntry::default()
                },
            ],
            ..Config::default()
        };
        let env = EnvCredentials {
            username: Some("monuser".into()),
            password: Some("secret".into()),
        };

        let resolved = resolve(&cfg, &env);
        assert_eq!(resolved.warnings.len(), 3, "{:?}", resolved.warnings);
        assert!(resolved.warnings[0].starts_with("timeout:"));
        assert_eq!(resolved.manager.hosts.len(), 1);

        let host = &resolved.manager.hosts[0];
        assert_eq!(host.name, "garage");
        assert_eq!(host.client.name.as_deref(), Some("garage"));
        assert_eq!(host.client.hostname, "10.0.0.7");
        assert_eq!(host.client.username.as_deref(), Some("monuser"));
        assert!(host.client.password.is_some());
        assert_eq!(host.client.timeout, Duration::from_secs(15));
    }

    #[test]
    fn entry_credentials_win_over_env() {
        let cfg = Config {
            hosts: vec![HostEntry {
                host: Some("nas".into()),
                username: Some("admin".into()),
                ..HostEntry::default()
            }],
            ..Config::default()
        };
        let env = EnvCredentials {
            username: Some("monuser".into()),
            password: None,
        };
        let resolved = resolve(&cfg, &env);
        assert_eq!(resolved.manager.hosts[0].client.username.as_deref(), Some("admin"));
        assert!(resolved.manager.hosts[0].client.password.is_none());
    }

    #[test]
    fn redacted_render_masks_passwords() {
        let cfg = Config {
            hosts: vec![HostEntry {
                host: Some("nas".into()),
                password: Some("hunter2".into()),
                ..HostEntry::default()
            }],
            ..Config::default()
        };
        let rendered = render_redacted(&cfg).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
    }
}
