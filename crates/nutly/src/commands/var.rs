//! Single-device commands: `get`, `set`, `command`.

use nutly_api::Client;
use serde_json::json;
use tracing::info;

use crate::cli::{GetArgs, GlobalOpts, InstcmdArgs, SetArgs};
use crate::commands::resolve_device;
use crate::error::CliError;
use crate::output;

pub async fn get(client: &Client, args: &GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let device = resolve_device(client, args.device.device.as_deref()).await?;
    let value = device
        .value(&args.variable)
        .await?
        .ok_or_else(|| CliError::NotFound {
            message: format!("{}: no value for {}", device.name(), args.variable),
        })?;

    output::emit(
        global.output,
        &json!({
            "device": device.name(),
            "variable": args.variable,
            "value": value,
        }),
    )
}

pub async fn set(client: &Client, args: &SetArgs) -> Result<(), CliError> {
    let device = resolve_device(client, args.device.device.as_deref()).await?;
    device.set(&args.variable, &args.value).await?;
    info!(device = device.name(), variable = %args.variable, value = %args.value, "variable set");
    Ok(())
}

pub async fn instcmd(client: &Client, args: &InstcmdArgs) -> Result<(), CliError> {
    let device = resolve_device(client, args.device.device.as_deref()).await?;
    device.command(&args.command).await?;
    info!(device = device.name(), command = %args.command, "command accepted");
    Ok(())
}
