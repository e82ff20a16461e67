//! Convenience commands built on [`Session::send_command`].
//!
//! Each wrapper checks its arguments against the ranges the lights accept and
//! returns the request id without waiting for the result.

use crate::error::{Result, YeelightError};
use crate::session::Session;
use serde_json::{json, Value};
use std::time::Duration;

/// Shortest transition the lights accept
pub const MIN_TRANSITION: Duration = Duration::from_millis(30);

pub const MAX_RGB: u32 = 0xFF_FF_FF;
pub const MAX_HUE: u16 = 359;
pub const MAX_SAT: u8 = 100;
pub const MIN_CT: u16 = 1700;
pub const MAX_CT: u16 = 6500;

/// How a light moves to a new state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Effect {
    #[default]
    Sudden,
    Smooth(Duration),
}

impl Effect {
    /// Smooth transition over `duration`
    pub fn smooth(duration: Duration) -> Self {
        Effect::Smooth(duration)
    }

    /// The `effect, duration` parameter pair
    fn params(self) -> Result<[Value; 2]> {
        match self {
            Effect::Sudden => Ok([json!("sudden"), json!(MIN_TRANSITION.as_millis() as u64)]),
            Effect::Smooth(d) if d < MIN_TRANSITION => Err(YeelightError::InvalidParameter(format!(
                "transition of {:?} is shorter than {:?}",
                d, MIN_TRANSITION
            ))),
            Effect::Smooth(d) => Ok([json!("smooth"), json!(d.as_millis() as u64)]),
        }
    }
}

fn with_effect(mut params: Vec<Value>, effect: Effect) -> Result<Vec<Value>> {
    params.extend(effect.params()?);
    Ok(params)
}

fn check<T: PartialOrd + std::fmt::Display>(name: &str, value: T, min: T, max: T) -> Result<()> {
    if value < min || value > max {
        return Err(YeelightError::InvalidParameter(format!(
            "{} {} outside {}..={}",
            name, value, min, max
        )));
    }
    Ok(())
}

impl Session {
    /// Flip the power state
    pub async fn toggle(&self) -> Result<u32> {
        self.send_command("toggle", vec![]).await
    }

    /// Switch the light on or off
    pub async fn set_power(&self, on: bool, effect: Effect) -> Result<u32> {
        let state = if on { "on" } else { "off" };
        self.send_command("set_power", with_effect(vec![json!(state)], effect)?)
            .await
    }

    /// Set brightness, 1-100
    pub async fn set_brightness(&self, bright: u8, effect: Effect) -> Result<u32> {
        check("brightness", bright, 1, 100)?;
        self.send_command("set_bright", with_effect(vec![json!(bright)], effect)?)
            .await
    }

    /// Set color temperature in kelvin, 1700-6500
    pub async fn set_temperature(&self, ct: u16, effect: Effect) -> Result<u32> {
        check("color temperature", ct, MIN_CT, MAX_CT)?;
        self.send_command("set_ct_abx", with_effect(vec![json!(ct)], effect)?)
            .await
    }

    /// Set a packed `0xRRGGBB` color
    pub async fn set_rgb(&self, rgb: u32, effect: Effect) -> Result<u32> {
        check("rgb", rgb, 0, MAX_RGB)?;
        self.send_command("set_rgb", with_effect(vec![json!(rgb)], effect)?)
            .await
    }

    /// Set hue (0-359) and saturation (0-100)
    pub async fn set_hsv(&self, hue: u16, sat: u8, effect: Effect) -> Result<u32> {
        check("hue", hue, 0, MAX_HUE)?;
        check("saturation", sat, 0, MAX_SAT)?;
        self.send_command("set_hsv", with_effect(vec![json!(hue), json!(sat)], effect)?)
            .await
    }

    /// Rename the device; the stored name changes once the device acknowledges
    pub async fn set_name(&self, name: &str) -> Result<u32> {
        if name.is_empty() {
            return Err(YeelightError::InvalidParameter("empty name".to_string()));
        }
        self.send_command("set_name", vec![json!(name)]).await
    }

    /// Query properties; the result lists values in the requested order
    pub async fn get_properties(&self, names: &[&str]) -> Result<u32> {
        if names.is_empty() {
            return Err(YeelightError::InvalidParameter("no properties requested".to_string()));
        }
        let params = names.iter().map(|n| json!(n)).collect();
        self.send_command("get_prop", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Device, Power, Status};

    fn session() -> Session {
        let support = [
            "toggle",
            "set_power",
            "set_bright",
            "set_ct_abx",
            "set_rgb",
            "set_hsv",
            "set_name",
            "get_prop",
        ];
        Session::new(Device {
            id: "0x7".into(),
            address: "127.0.0.1:1".into(),
            name: String::new(),
            model: "color".into(),
            fw_ver: 1,
            cache_control: String::new(),
            power: Power::Unknown,
            bright: 0,
            ct: 0,
            rgb: 0,
            hue: 0,
            sat: 0,
            color_mode: 1,
            support: support.iter().map(|s| s.to_string()).collect(),
            status: Status::Discovered,
            last_seen: None,
        })
    }

    #[test]
    fn effect_params() {
        assert_eq!(
            Effect::Sudden.params().unwrap(),
            [json!("sudden"), json!(30)]
        );
        assert_eq!(
            Effect::smooth(Duration::from_millis(500)).params().unwrap(),
            [json!("smooth"), json!(500)]
        );
        assert!(Effect::smooth(Duration::from_millis(10)).params().is_err());
    }

    #[tokio::test]
    async fn ranges_are_checked_before_sending() {
        let s = session();
        let invalid = |r: Result<u32>| matches!(r, Err(YeelightError::InvalidParameter(_)));

        assert!(invalid(s.set_rgb(0x1_000_000, Effect::Sudden).await));
        assert!(invalid(s.set_hsv(360, 50, Effect::Sudden).await));
        assert!(invalid(s.set_hsv(120, 101, Effect::Sudden).await));
        assert!(invalid(s.set_brightness(0, Effect::Sudden).await));
        assert!(invalid(s.set_brightness(101, Effect::Sudden).await));
        assert!(invalid(s.set_temperature(1600, Effect::Sudden).await));
        assert!(invalid(s.set_name("").await));
        assert!(invalid(s.get_properties(&[]).await));
        assert!(invalid(
            s.set_power(true, Effect::smooth(Duration::from_millis(1))).await
        ));
    }

    #[tokio::test]
    async fn valid_values_reach_the_connection_check() {
        let s = session();
        let not_connected = |r: Result<u32>| matches!(r, Err(YeelightError::NotConnected));

        assert!(not_connected(s.set_rgb(0xFF_FF_FF, Effect::Sudden).await));
        assert!(not_connected(s.set_hsv(359, 100, Effect::Sudden).await));
        assert!(not_connected(s.set_brightness(100, Effect::Sudden).await));
        assert!(not_connected(s.toggle().await));
    }
}
