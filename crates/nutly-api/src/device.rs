// Device directory
//
// `Device` is a handle naming one UPS on one server. It holds no data of
// its own: every accessor is a fresh round trip through the owning client.

use std::collections::BTreeMap;

use tracing::debug;

use crate::client::Client;
use crate::error::Error;

/// A named device on a status server.
#[derive(Debug, Clone)]
pub struct Device {
    client: Client,
    name: String,
}

impl Device {
    pub(crate) fn new(client: Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// Server-assigned device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn scoped(&self, key: &str) -> String {
        format!("{} {key}", self.name)
    }

    // ── Single values ────────────────────────────────────────────

    /// Description of the device itself, or of variable `key`.
    ///
    /// `GET UPSDESC <dev>` / `GET DESC <dev> <key>`
    pub async fn description(&self, key: Option<&str>) -> Result<Option<String>, Error> {
        match key {
            Some(key) => self.client.get("DESC", Some(&self.scoped(key))).await,
            None => self.client.get("UPSDESC", Some(&self.name)).await,
        }
    }

    /// Type of variable `key`, e.g. `RW STRING:16` or `NUMBER`.
    ///
    /// `GET TYPE <dev> <key>`
    pub async fn var_type(&self, key: &str) -> Result<Option<String>, Error> {
        self.client.get("TYPE", Some(&self.scoped(key))).await
    }

    /// Description of instant command `command`.
    ///
    /// `GET CMDDESC <dev> <cmd>`
    pub async fn command_description(&self, command: &str) -> Result<Option<String>, Error> {
        self.client.get("CMDDESC", Some(&self.scoped(command))).await
    }

    /// Current value of variable `key`.
    ///
    /// `GET VAR <dev> <key>`
    pub async fn value(&self, key: &str) -> Result<Option<String>, Error> {
        self.client.get("VAR", Some(&self.scoped(key))).await
    }

    /// Number of clients logged in to this device.
    ///
    /// `GET NUMLOGINS <dev>`. `None` when the reply is not an integer.
    pub async fn n_clients(&self) -> Result<Option<u32>, Error> {
        let raw = self.client.get("NUMLOGINS", Some(&self.name)).await?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    // ── Lists ────────────────────────────────────────────────────

    /// Addresses of logged-in clients, sorted.
    ///
    /// `LIST CLIENT <dev>`
    pub async fn clients(&self) -> Result<Vec<String>, Error> {
        let mut clients = self.client.get_list(&format!("CLIENT {}", self.name)).await?;
        clients.sort();
        Ok(clients)
    }

    /// Supported instant commands, in server order.
    ///
    /// `LIST CMD <dev>`
    pub async fn commands(&self) -> Result<Vec<String>, Error> {
        self.client.get_list(&format!("CMD {}", self.name)).await
    }

    /// All variables.
    ///
    /// `LIST VAR <dev>`
    pub async fn constants(&self) -> Result<BTreeMap<String, String>, Error> {
        self.client.get_map(&format!("VAR {}", self.name)).await
    }

    /// Writable variables.
    ///
    /// `LIST RW <dev>`
    pub async fn variables(&self) -> Result<BTreeMap<String, String>, Error> {
        self.client.get_map(&format!("RW {}", self.name)).await
    }

    // ── Writes ───────────────────────────────────────────────────

    pub async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.client.set_var(&self.name, key, value).await
    }

    pub async fn command(&self, command: &str) -> Result<(), Error> {
        self.client.run_command(&self.name, command).await
    }
}

impl Client {
    /// Enumerate the devices on this server.
    ///
    /// `LIST UPS`. Handles are keyed and ordered by device name. Nothing is
    /// cached on the client beyond the names, see
    /// [`known_devices()`](Self::known_devices).
    pub async fn devices(&self) -> Result<BTreeMap<String, Device>, Error> {
        let listed = self.get_map("UPS").await?;
        debug!(count = listed.len(), "enumerated devices");
        self.remember_devices(listed.keys());
        Ok(listed
            .into_keys()
            .map(|name| {
                let device = Device::new(self.clone(), name.clone());
                (name, device)
            })
            .collect())
    }

    /// Handle for a device by name, without asking the server.
    pub fn device(&self, name: impl Into<String>) -> Device {
        Device::new(self.clone(), name)
    }

    /// Handles from the most recent [`devices()`](Self::devices) call.
    /// Empty after `disconnect()`.
    pub fn known_devices(&self) -> Vec<Device> {
        self.known_device_names()
            .into_iter()
            .map(|name| Device::new(self.clone(), name))
            .collect()
    }
}
