//! `monitor`: supervise every configured host and stream status changes.

use std::collections::BTreeMap;

use nutly_config::EnvCredentials;
use nutly_core::{HostManager, UpsSnapshot};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::{MonitorArgs, OutputFormat};
use crate::error::CliError;
use crate::output;

pub async fn handle(args: &MonitorArgs) -> Result<(), CliError> {
    let cfg = nutly_config::load_config(args.config.as_deref())?;
    let resolved = nutly_config::resolve(&cfg, &EnvCredentials::from_env());
    for warning in &resolved.warnings {
        warn!("config: {warning}");
    }

    let manager = HostManager::new(resolved.manager);
    let mut updates = manager.subscribe();
    manager.start().await;
    info!(name = %cfg.name, hosts = manager.hosts().count(), "monitoring");

    let mut last: BTreeMap<String, UpsSnapshot> = BTreeMap::new();
    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            update = updates.recv() => match update {
                Ok(snapshot) => {
                    if !changed(last.get(&snapshot.id), &snapshot) {
                        continue;
                    }
                    if let Err(e) = output::emit(OutputFormat::JsonCompact, &snapshot) {
                        break Err(e);
                    }
                    last.insert(snapshot.id.clone(), snapshot);
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "monitor fell behind"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    manager.shutdown().await;
    result
}

/// Whether `next` differs from `prev` in anything but its timestamp.
fn changed(prev: Option<&UpsSnapshot>, next: &UpsSnapshot) -> bool {
    prev.is_none_or(|prev| {
        let restamped = UpsSnapshot {
            updated_at: next.updated_at,
            ..prev.clone()
        };
        restamped != *next
    })
}
