//! Apply property pushes and property query results onto a [`Device`].

use crate::protocol::{Notification, PROPS_METHOD};
use crate::types::{Device, Power};
use serde_json::Value;

/// Properties queried by the periodic heartbeat
pub const CORE_PROPERTIES: &[&str] = &["power", "bright", "ct", "rgb", "hue", "sat", "color_mode", "name"];

/// Read an integer that may arrive as a JSON number or a numeric string
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Overwrite one field. Returns `true` if the key is known and the value usable.
fn apply_property(device: &mut Device, key: &str, value: &Value) -> bool {
    let slot = match key {
        "power" => {
            return match value.as_str() {
                Some(s) => {
                    device.power = Power::from_wire(s);
                    true
                }
                None => false,
            };
        }
        "name" => {
            return match value.as_str() {
                Some(s) => {
                    device.name = s.to_string();
                    true
                }
                None => false,
            };
        }
        "bright" => &mut device.bright,
        "ct" => &mut device.ct,
        "rgb" => &mut device.rgb,
        "hue" => &mut device.hue,
        "sat" => &mut device.sat,
        "color_mode" => &mut device.color_mode,
        _ => return false,
    };

    match as_int(value) {
        Some(v) => {
            *slot = v;
            true
        }
        None => {
            tracing::warn!("Ignoring non-numeric value {} for {}", value, key);
            false
        }
    }
}

/// Apply a notification. Only `props` pushes are considered; unknown keys are skipped.
///
/// Returns whether any field was written.
pub fn apply_notification(device: &mut Device, notification: &Notification) -> bool {
    if notification.method != PROPS_METHOD {
        tracing::debug!("Ignoring notification method {}", notification.method);
        return false;
    }

    let mut applied = false;
    for (key, value) in &notification.params {
        applied |= apply_property(device, key, value);
    }
    applied
}

/// Apply a `get_prop` result, pairing requested names with returned values in order
pub fn apply_properties<S: AsRef<str>>(device: &mut Device, names: &[S], values: &[Value]) -> bool {
    if names.len() != values.len() {
        tracing::warn!(
            "Property result length mismatch: asked for {}, got {}",
            names.len(),
            values.len()
        );
    }

    let mut applied = false;
    for (name, value) in names.iter().zip(values) {
        // Unsupported properties come back as empty strings
        if value.as_str() == Some("") {
            continue;
        }
        applied |= apply_property(device, name.as_ref(), value);
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn device() -> Device {
        Device {
            id: "0x1".into(),
            address: "127.0.0.1:55443".into(),
            name: "desk".into(),
            model: "color".into(),
            fw_ver: 18,
            cache_control: "max-age=3600".into(),
            power: Power::Off,
            bright: 10,
            ct: 4000,
            rgb: 0,
            hue: 0,
            sat: 0,
            color_mode: 2,
            support: BTreeSet::new(),
            status: Status::Online,
            last_seen: None,
        }
    }

    fn props(params: Value) -> Notification {
        Notification {
            method: "props".into(),
            params: params.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn bright_only_changes_bright() {
        let mut d = device();
        let before = d.clone();
        assert!(apply_notification(&mut d, &props(json!({"bright": 50}))));
        assert_eq!(d.bright, 50);
        assert_eq!(d.power, before.power);
        assert_eq!(d.ct, before.ct);
        assert_eq!(d.rgb, before.rgb);
        assert_eq!(d.hue, before.hue);
        assert_eq!(d.sat, before.sat);
        assert_eq!(d.color_mode, before.color_mode);
        assert_eq!(d.name, before.name);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut d = device();
        assert!(!apply_notification(&mut d, &props(json!({"music_on": 1}))));
        assert_eq!(d.bright, 10);

        assert!(apply_notification(
            &mut d,
            &props(json!({"power": "on", "flowing": 0, "rgb": 16711680}))
        ));
        assert_eq!(d.power, Power::On);
        assert_eq!(d.rgb, 0xff0000);
    }

    #[test]
    fn other_methods_are_noops() {
        let mut d = device();
        let n = Notification {
            method: "something".into(),
            params: json!({"bright": 99}).as_object().cloned().unwrap(),
        };
        assert!(!apply_notification(&mut d, &n));
        assert_eq!(d.bright, 10);
    }

    #[test]
    fn property_results_accept_strings() {
        let mut d = device();
        let values = vec![json!("on"), json!("80"), json!("2700"), json!(""), json!("kitchen")];
        assert!(apply_properties(&mut d, &["power", "bright", "ct", "rgb", "name"], &values));
        assert_eq!(d.power, Power::On);
        assert_eq!(d.bright, 80);
        assert_eq!(d.ct, 2700);
        assert_eq!(d.rgb, 0);
        assert_eq!(d.name, "kitchen");
    }
}
