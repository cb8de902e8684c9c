// Protocol query verbs
//
// Everything here is built on `Client::send`: issue one command, wait for
// its terminator, parse the body with the line grammar. Each verb opens the
// session first if needed.

use std::collections::BTreeMap;

use tracing::debug;

use crate::client::Client;
use crate::error::Error;
use crate::grammar;

impl Client {
    /// Server version banner.
    ///
    /// `VER`
    pub async fn version(&self) -> Result<String, Error> {
        debug!("fetching server version");
        let response = self.send("VER", "").await?;
        Ok(response.body.trim().to_owned())
    }

    /// Network protocol version, e.g. `1.3`.
    ///
    /// `NETVER`
    pub async fn api_version(&self) -> Result<String, Error> {
        debug!("fetching protocol version");
        let response = self.send("NETVER", "").await?;
        Ok(response.body.trim().to_owned())
    }

    /// Fetch a single value.
    ///
    /// `GET <kind> [<key>]`, answered by `<kind> [<key>] "value"`.
    ///
    /// Returns `None` when the reply does not have that shape.
    pub async fn get(&self, kind: &str, key: Option<&str>) -> Result<Option<String>, Error> {
        let prefix = match key {
            Some(key) => format!("{kind} {key}"),
            None => kind.to_owned(),
        };
        debug!(%prefix, "get");
        let response = self.send(&format!("GET {prefix}"), &prefix).await?;
        Ok(grammar::parse_value(&response.body, &prefix))
    }

    /// Fetch a list of tokens, in server order.
    ///
    /// `LIST <key>` ... `END LIST <key>`
    pub async fn get_list(&self, key: &str) -> Result<Vec<String>, Error> {
        debug!(key, "list");
        let response = self
            .send(&format!("LIST {key}"), &format!("END LIST {key}"))
            .await?;
        Ok(grammar::parse_list(&response.body, key))
    }

    /// Fetch a token to value mapping.
    ///
    /// `LIST <key>` ... `END LIST <key>`, one `<key> <token> "value"` per line.
    pub async fn get_map(&self, key: &str) -> Result<BTreeMap<String, String>, Error> {
        debug!(key, "list map");
        let response = self
            .send(&format!("LIST {key}"), &format!("END LIST {key}"))
            .await?;
        Ok(grammar::parse_map(&response.body, key))
    }

    /// Write a read-write variable.
    ///
    /// `SET VAR <device> <key> "<value>"`
    pub async fn set_var(&self, device: &str, key: &str, value: &str) -> Result<(), Error> {
        debug!(device, key, value, "setting variable");
        let command = format!("SET VAR {device} {key} {}", grammar::quote(value));
        self.send(&command, "OK").await?;
        Ok(())
    }

    /// Run an instant command.
    ///
    /// `INSTCMD <device> <command>`
    pub async fn run_command(&self, device: &str, command: &str) -> Result<(), Error> {
        debug!(device, command, "running instant command");
        self.send(&format!("INSTCMD {device} {command}"), "OK").await?;
        Ok(())
    }
}
