// ── ups.status flags ──

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One token of the `ups.status` variable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString,
)]
pub enum StatusFlag {
    /// Mains present.
    #[strum(serialize = "OL")]
    #[serde(rename = "OL")]
    Online,
    #[strum(serialize = "OB")]
    #[serde(rename = "OB")]
    OnBattery,
    #[strum(serialize = "LB")]
    #[serde(rename = "LB")]
    LowBattery,
    #[strum(serialize = "HB")]
    #[serde(rename = "HB")]
    HighBattery,
    /// Battery needs replacing.
    #[strum(serialize = "RB")]
    #[serde(rename = "RB")]
    ReplaceBattery,
    #[strum(serialize = "CHRG")]
    #[serde(rename = "CHRG")]
    Charging,
    /// Inverter is powering the load.
    #[strum(serialize = "DISCHRG")]
    #[serde(rename = "DISCHRG")]
    Discharging,
    /// Bypass active, no battery protection.
    #[strum(serialize = "BYPASS")]
    #[serde(rename = "BYPASS")]
    Bypass,
    /// Runtime calibration (on battery).
    #[strum(serialize = "CAL")]
    #[serde(rename = "CAL")]
    Calibrating,
    /// Not supplying power to the load.
    #[strum(serialize = "OFF")]
    #[serde(rename = "OFF")]
    Off,
    #[strum(serialize = "OVER")]
    #[serde(rename = "OVER")]
    Overloaded,
    /// Bucking incoming voltage.
    #[strum(serialize = "TRIM")]
    #[serde(rename = "TRIM")]
    Trimming,
    #[strum(serialize = "BOOST")]
    #[serde(rename = "BOOST")]
    Boosting,
    #[strum(serialize = "FSD")]
    #[serde(rename = "FSD")]
    ForcedShutdown,
    #[strum(serialize = "ALARM")]
    #[serde(rename = "ALARM")]
    Alarm,
}

/// Parsed `ups.status`. Tokens outside the known set are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsStatus {
    pub flags: Vec<StatusFlag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other: Vec<String>,
}

impl UpsStatus {
    pub fn parse(raw: &str) -> Self {
        let mut status = Self::default();
        for token in raw.split_whitespace() {
            match StatusFlag::from_str(token) {
                Ok(flag) if !status.flags.contains(&flag) => status.flags.push(flag),
                Ok(_) => {}
                Err(_) => status.other.push(token.to_owned()),
            }
        }
        status
    }

    pub fn has(&self, flag: StatusFlag) -> bool {
        self.flags.contains(&flag)
    }
}

impl std::fmt::Display for UpsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens: Vec<String> = self
            .flags
            .iter()
            .map(ToString::to_string)
            .chain(self.other.iter().cloned())
            .collect();
        f.write_str(&tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_known_and_unknown_tokens() {
        let status = UpsStatus::parse("OL CHRG  WAIT");
        assert_eq!(status.flags, vec![StatusFlag::Online, StatusFlag::Charging]);
        assert_eq!(status.other, vec!["WAIT"]);
        assert!(status.has(StatusFlag::Online));
        assert!(!status.has(StatusFlag::OnBattery));
    }

    #[test]
    fn duplicates_collapse() {
        let status = UpsStatus::parse("OB OB LB");
        assert_eq!(status.flags, vec![StatusFlag::OnBattery, StatusFlag::LowBattery]);
    }

    #[test]
    fn display_round_trips_tokens() {
        assert_eq!(UpsStatus::parse("OB DISCHRG LB").to_string(), "OB DISCHRG LB");
        assert_eq!(StatusFlag::ForcedShutdown.to_string(), "FSD");
    }

    #[test]
    fn empty_status() {
        let status = UpsStatus::parse("");
        assert!(status.flags.is_empty());
        assert!(status.other.is_empty());
    }
}
