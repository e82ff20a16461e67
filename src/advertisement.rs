//! Turn discovery response headers into a [`Device`].

use crate::error::{Result, YeelightError};
use crate::types::{Device, Power, Status};
use std::collections::{BTreeSet, HashMap};

/// Header name to value, as received in a discovery response
pub type Headers = HashMap<String, String>;

/// URI scheme every `Location` header must carry
pub const LOCATION_SCHEME: &str = "yeelight://";

/// Rename capability as some firmware advertises it
const LEGACY_RENAME_TOKEN: &str = "set_ble_name";
const RENAME_TOKEN: &str = "set_name";

/// Look up a header ignoring ASCII case
fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim())
}

fn int_field(headers: &Headers, field: &'static str) -> Result<i64> {
    let raw = header(headers, field).unwrap_or_default();
    raw.parse().map_err(|_| YeelightError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

/// Split the space separated `Support` header into a capability set
pub fn parse_support(raw: &str) -> BTreeSet<String> {
    raw.split_whitespace()
        .map(|token| {
            if token == LEGACY_RENAME_TOKEN {
                RENAME_TOKEN.to_string()
            } else {
                token.to_string()
            }
        })
        .collect()
}

/// Build a device from the headers of one discovery response
pub fn parse_advertisement(headers: &Headers) -> Result<Device> {
    let location = header(headers, "Location").unwrap_or_default();
    let address = location
        .strip_prefix(LOCATION_SCHEME)
        .ok_or_else(|| YeelightError::MalformedAdvertisement(format!("bad location {:?}", location)))?;

    let text = |name: &str| header(headers, name).unwrap_or_default().to_string();

    Ok(Device {
        id: text("Id"),
        address: address.to_string(),
        name: text("Name"),
        model: text("Model"),
        fw_ver: int_field(headers, "FW_Ver")?,
        cache_control: text("Cache-Control"),
        power: Power::from_wire(header(headers, "Power").unwrap_or_default()),
        bright: int_field(headers, "Bright")?,
        ct: int_field(headers, "Ct")?,
        rgb: int_field(headers, "Rgb")?,
        hue: int_field(headers, "Hue")?,
        sat: int_field(headers, "Sat")?,
        color_mode: int_field(headers, "Color_mode")?,
        support: parse_support(&text("Support")),
        status: Status::Discovered,
        last_seen: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Headers {
        [
            ("Location", "yeelight://10.10.200.205:55443"),
            ("Server", "POSIX UPnP/1.0 YGLC/1"),
            ("Model", "mono"),
            ("Fw_ver", "40"),
            (
                "Support",
                "get_prop set_default set_power toggle set_bright start_cf stop_cf set_scene cron_add cron_get cron_del set_adjust set_name",
            ),
            ("Power", "off"),
            ("Ct", "4000"),
            ("Rgb", "0"),
            ("Cache-Control", "max-age=3600"),
            ("Id", "0x0000000003360248"),
            ("Sat", "0"),
            ("Name", "White"),
            ("Bright", "100"),
            ("Color_mode", "2"),
            ("Hue", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn parses_full_advertisement() {
        let device = parse_advertisement(&sample()).unwrap();
        assert_eq!(device.id, "0x0000000003360248");
        assert_eq!(device.address, "10.10.200.205:55443");
        assert_eq!(device.name, "White");
        assert_eq!(device.model, "mono");
        assert_eq!(device.fw_ver, 40);
        assert_eq!(device.power, Power::Off);
        assert_eq!(device.bright, 100);
        assert_eq!(device.ct, 4000);
        assert_eq!(device.color_mode, 2);
        assert_eq!(device.cache_control, "max-age=3600");
        assert_eq!(device.status, Status::Discovered);
        assert_eq!(device.support.len(), 13);
        assert!(device.supports("set_adjust"));
    }

    #[test]
    fn support_matches_header_split() {
        let mut headers = sample();
        headers.insert("Support".into(), "get_prop set_power toggle".into());
        let device = parse_advertisement(&headers).unwrap();
        let expected: BTreeSet<String> = ["get_prop", "set_power", "toggle"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(device.support, expected);
        assert!(!device.supports("set_name"));
    }

    #[test]
    fn legacy_rename_token_is_remapped() {
        let support = parse_support("toggle set_ble_name");
        assert!(support.contains("set_name"));
        assert!(!support.contains("set_ble_name"));
    }

    #[test]
    fn rejects_location_without_scheme() {
        let mut headers = sample();
        headers.insert("Location".into(), "http://10.10.200.205:55443".into());
        assert!(matches!(
            parse_advertisement(&headers),
            Err(YeelightError::MalformedAdvertisement(_))
        ));

        headers.remove("Location");
        assert!(matches!(
            parse_advertisement(&headers),
            Err(YeelightError::MalformedAdvertisement(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_fields() {
        for field in ["Fw_ver", "Bright", "Sat", "Ct", "Rgb", "Hue", "Color_mode"] {
            let mut headers = sample();
            headers.insert(field.to_string(), "abc".into());
            match parse_advertisement(&headers) {
                Err(YeelightError::InvalidField { value, .. }) => assert_eq!(value, "abc"),
                other => panic!("{}: expected invalid field, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn unknown_power_value() {
        let mut headers = sample();
        headers.insert("Power".into(), "maybe".into());
        assert_eq!(parse_advertisement(&headers).unwrap().power, Power::Unknown);
    }
}
