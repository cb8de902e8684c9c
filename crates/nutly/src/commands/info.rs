//! `info`: server versions plus everything each device exposes.

use nutly_api::{Client, Device};
use serde_json::{Map, Value, json};

use crate::cli::{GlobalOpts, InfoArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(client: &Client, args: &InfoArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let version = client.version().await?;
    let api_version = client.api_version().await?;

    let mut devices = Map::new();
    for (id, device) in client.devices().await? {
        devices.insert(id, describe(&device, args.verbose).await?);
    }

    let info = json!({
        "version": version,
        "apiVersion": api_version,
        "devices": devices,
    });
    output::emit(global.output, &info)
}

/// One device. With `verbose`, commands map to their descriptions and
/// constants carry their type and description.
async fn describe(device: &Device, verbose: bool) -> Result<Value, CliError> {
    let command_list = device.commands().await?;
    let constant_map = device.constants().await?;

    let (commands, constants) = if verbose {
        let mut commands = Map::new();
        for command in command_list {
            let description = device.command_description(&command).await?;
            commands.insert(command, json!(description));
        }
        let mut constants = Map::new();
        for (key, value) in constant_map {
            let var_type = device.var_type(&key).await?;
            let description = device.description(Some(&key)).await?;
            constants.insert(
                key,
                json!({ "value": value, "type": var_type, "description": description }),
            );
        }
        (Value::Object(commands), Value::Object(constants))
    } else {
        (json!(command_list), json!(constant_map))
    };

    let description = device.description(None).await?;
    let n_clients = device.n_clients().await?;
    let clients = device.clients().await?;
    let variables = device.variables().await?;

    Ok(json!({
        "description": description,
        "nClients": n_clients,
        "clients": clients,
        "commands": commands,
        "constants": constants,
        "variables": variables,
    }))
}
