use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

/// Device identifier as advertised (e.g. `0x0000000003360248`)
pub type DeviceId = String;

/// Power state of a light
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    Off,
    On,
    /// Not reported or not recognised
    #[default]
    Unknown,
}

impl Power {
    /// Map the protocol's `"on"`/`"off"` strings
    pub fn from_wire(value: &str) -> Self {
        match value {
            "on" => Power::On,
            "off" => Power::Off,
            _ => Power::Unknown,
        }
    }
}

/// Connectivity status of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Offline,
    /// Seen in a discovery response, never connected
    Discovered,
    Connecting,
    /// Heartbeat query in flight
    Refreshing,
    Online,
}

/// A Yeelight device and the last known state of its light
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Connectable `host:port`
    pub address: String,
    pub name: String,
    pub model: String,
    pub fw_ver: i64,
    pub cache_control: String,

    pub power: Power,
    /// Brightness percentage, 1-100
    pub bright: i64,
    /// Color temperature in kelvin
    pub ct: i64,
    /// Packed `0xRRGGBB`
    pub rgb: i64,
    /// 0-359
    pub hue: i64,
    /// 0-100
    pub sat: i64,
    /// 1 = rgb, 2 = color temperature, 3 = hsv
    pub color_mode: i64,

    /// Command names the firmware accepts
    pub support: BTreeSet<String>,
    pub status: Status,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Device {
    /// Check whether the firmware accepts a command
    pub fn supports(&self, method: &str) -> bool {
        self.support.contains(method)
    }
}
