// ── Periodic UPS snapshot ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{StatusFlag, UpsStatus};
use super::unit::UpsUnit;

/// Threshold assumed when the UPS does not report `battery.charge.low`.
const DEFAULT_LOW_BATTERY: f64 = 20.0;

/// Interpreted state of one UPS at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsSnapshot {
    pub id: String,
    pub name: String,
    pub host: String,
    pub status: UpsStatus,
    pub online: bool,
    pub charging: bool,
    /// Percent.
    pub battery_level: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub input_voltage: Option<f64>,
    pub output_voltage: Option<f64>,
    /// Percent of nominal.
    pub load: Option<f64>,
    /// Watts.
    pub current_consumption: Option<f64>,
    /// Seconds; only reported while running on battery.
    pub remaining_runtime: Option<u64>,
    /// Percent. 100 when the battery needs replacing.
    pub low_battery_threshold: f64,
    pub fault: bool,
    pub last_event: Option<String>,
    pub mute: bool,
    pub outlet_in_use: bool,
    pub updated_at: DateTime<Utc>,
}

fn number(vars: &BTreeMap<String, String>, key: &str) -> Option<f64> {
    vars.get(key)?.trim().parse().ok()
}

fn text<'a>(vars: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(String::as_str).filter(|v| !v.is_empty())
}

impl UpsSnapshot {
    /// Interpret a `LIST VAR` map for `unit`.
    ///
    /// `clients` is the login count; when unknown the outlet is assumed
    /// in use.
    pub fn from_variables(
        unit: &UpsUnit,
        vars: &BTreeMap<String, String>,
        clients: Option<u32>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = UpsStatus::parse(vars.get("ups.status").map_or("", String::as_str));
        let online = status.has(StatusFlag::Online);

        let load = number(vars, "ups.load");
        let current_consumption = number(vars, "ups.realpower").or_else(|| {
            let nominal = number(vars, "ups.realpower.nominal")?;
            Some(load? * nominal / 100.0)
        });

        let remaining_runtime = if online {
            None
        } else {
            vars.get("battery.runtime")
                .and_then(|v| v.trim().split('.').next())
                .and_then(|v| v.parse().ok())
        };

        let low_battery_threshold = if status.has(StatusFlag::ReplaceBattery) {
            100.0
        } else {
            number(vars, "battery.charge.low").unwrap_or(DEFAULT_LOW_BATTERY)
        };

        let alarm = text(vars, "ups.alarm");
        let last_event = match (text(vars, "ups.test.result"), alarm) {
            (Some(result), Some(alarm)) => Some(format!("{result} - {alarm}")),
            (Some(result), None) => Some(result.to_owned()),
            (None, alarm) => alarm.map(str::to_owned),
        };

        Self {
            id: unit.id.clone(),
            name: unit.name.clone(),
            host: unit.host.clone(),
            online,
            charging: status.has(StatusFlag::Charging),
            fault: status.has(StatusFlag::Alarm) || alarm.is_some(),
            status,
            battery_level: number(vars, "battery.charge"),
            battery_voltage: number(vars, "battery.voltage"),
            input_voltage: number(vars, "input.voltage"),
            output_voltage: number(vars, "output.voltage"),
            load,
            current_consumption,
            remaining_runtime,
            low_battery_threshold,
            last_event,
            mute: matches!(
                text(vars, "ups.beeper.status"),
                Some("disabled" | "muted")
            ),
            outlet_in_use: clients.is_none_or(|n| n > 0),
            updated_at: now,
        }
    }

    /// Placeholder for a unit whose variables could not be read.
    pub fn faulted(unit: &UpsUnit, now: DateTime<Utc>) -> Self {
        let mut snapshot = Self::from_variables(unit, &BTreeMap::new(), None, now);
        snapshot.fault = true;
        snapshot
    }
}
