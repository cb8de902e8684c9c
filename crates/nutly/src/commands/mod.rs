//! Command dispatch: bridges CLI args -> upsd client -> output formatting.

pub mod config_cmd;
pub mod info;
pub mod monitor;
pub mod var;

use std::time::Duration;

use nutly_api::{Client, ClientConfig, ClientEvent, Device};
use secrecy::SecretString;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a upsd-bound command to the appropriate handler.
///
/// The client is disconnected before returning, whatever the outcome.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let client = Client::new(client_config(global)?);
    let log = spawn_event_log(&client);

    let result = async {
        client.connect().await?;
        match cmd {
            Command::Info(args) => info::handle(&client, &args, global).await,
            Command::Get(args) => var::get(&client, &args, global).await,
            Command::Set(args) => var::set(&client, &args).await,
            Command::Instcmd(args) => var::instcmd(&client, &args).await,
            // Handled before dispatch
            Command::Monitor(_) | Command::Config(_) | Command::Completions(_) => Ok(()),
        }
    }
    .await;

    client.disconnect().await;
    log.abort();
    result
}

/// Build the client settings from `--host`, credentials and `--timeout`.
pub fn client_config(global: &GlobalOpts) -> Result<ClientConfig, CliError> {
    let (hostname, port) =
        nutly_config::parse_host(&global.host).map_err(|e| CliError::Validation {
            field: "host".into(),
            reason: e.to_string(),
        })?;

    Ok(ClientConfig {
        username: global.username.clone(),
        password: global.password.clone().map(SecretString::from),
        ..ClientConfig::new(hostname, port).with_timeout(Duration::from_secs(global.timeout))
    })
}

/// Log protocol traffic: requests at debug, response bodies at trace.
fn spawn_event_log(client: &Client) -> JoinHandle<()> {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::Connected { host, port } => debug!("connected to {host}:{port}"),
                ClientEvent::Disconnected { host, port } => {
                    debug!("disconnected from {host}:{port}");
                }
                ClientEvent::Request(request) => debug!("{request}"),
                ClientEvent::Response(response) => {
                    let request = &response.request;
                    trace!(
                        "{}: request {}: response: {}",
                        request.name, request.id, response.body
                    );
                    debug!("{}: request {}: OK", request.name, request.id);
                }
                ClientEvent::Error { .. } => {}
            }
        }
    })
}

/// The named device, or the only device upsd reports when none is named.
pub async fn resolve_device(client: &Client, name: Option<&str>) -> Result<Device, CliError> {
    if let Some(name) = name {
        return Ok(client.device(name));
    }

    let devices = client.devices().await?;
    if devices.len() > 1 {
        return Err(CliError::AmbiguousDevice {
            available: devices.keys().cloned().collect::<Vec<_>>().join(", "),
        });
    }
    devices.into_values().next().ok_or(CliError::NoDevice)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;
    use secrecy::ExposeSecret;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["nutly"];
        argv.extend_from_slice(args);
        argv.push("info");
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn client_config_from_flags() {
        let config = client_config(&global(&["-H", "nas:3494", "-U", "mon", "-P", "s3cret", "-t", "9"]))
            .unwrap();
        assert_eq!(config.hostname, "nas");
        assert_eq!(config.port, 3494);
        assert_eq!(config.username.as_deref(), Some("mon"));
        assert_eq!(
            config.password.as_ref().map(|p| p.expose_secret().to_owned()).as_deref(),
            Some("s3cret")
        );
        assert_eq!(config.timeout, Duration::from_secs(9));
        assert_eq!(config.display_name(), "nas:3494");
    }

    #[test]
    fn bad_host_is_a_usage_error() {
        let err = client_config(&global(&["-H", "nas:99999"])).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::exit_code::USAGE);
    }
}
