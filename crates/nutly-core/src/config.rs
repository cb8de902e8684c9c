// ── Runtime supervision configuration ──
//
// These types describe which upsd hosts to watch and how often. They carry
// credentials and timing but never touch disk; the binary builds a
// `ManagerConfig` from the config file and hands it in.

use std::time::Duration;

use nutly_api::ClientConfig;

/// Default pause before retrying a host that failed to initialise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(600);

/// Default polling period for unit snapshots.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// One monitored upsd host.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Unique name; also tags every request on this host's connection.
    pub name: String,
    pub client: ClientConfig,
}

impl HostConfig {
    pub fn new(name: impl Into<String>, mut client: ClientConfig) -> Self {
        let name = name.into();
        client.name = Some(name.clone());
        Self { name, client }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self::new(client.hostname.clone(), client)
    }
}

/// Configuration for a [`HostManager`](crate::HostManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub hosts: Vec<HostConfig>,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hosts: vec![HostConfig::default()],
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}
