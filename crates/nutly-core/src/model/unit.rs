// ── UPS unit identity ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Description upsd reports when the driver has none.
const UNAVAILABLE: &str = "Unavailable";

/// A UPS discovered on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsUnit {
    /// Upper-cased serial number, or the device name when there is none.
    pub id: String,
    pub name: String,
    /// Device name on the server.
    pub device: String,
    /// Name of the host serving this unit.
    pub host: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware: String,
}

fn non_empty<'a>(constants: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    constants
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

impl UpsUnit {
    /// Build the identity of `device` from its variables.
    ///
    /// Returns `None` unless `device.type` is `ups`.
    pub fn identify(
        host: &str,
        device: &str,
        description: Option<&str>,
        constants: &BTreeMap<String, String>,
    ) -> Option<Self> {
        if constants.get("device.type").map(String::as_str) != Some("ups") {
            return None;
        }

        let id = non_empty(constants, "device.serial")
            .map_or_else(|| device.to_owned(), str::to_uppercase);
        let name = description
            .filter(|d| !d.is_empty() && *d != UNAVAILABLE)
            .unwrap_or(host)
            .to_owned();

        Some(Self {
            id,
            name,
            device: device.to_owned(),
            host: host.to_owned(),
            manufacturer: non_empty(constants, "device.mfr").map(str::to_owned),
            model: non_empty(constants, "device.model").map(str::to_owned),
            firmware: non_empty(constants, "ups.firmware")
                .unwrap_or(env!("CARGO_PKG_VERSION"))
                .to_owned(),
        })
    }
}
