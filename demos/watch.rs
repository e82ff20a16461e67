//! Search for lights, connect to each one and print what they report.

use std::time::Duration;
use yeelight_lan::{discover, event_channel, DeviceEvent, DiscoveryConfig, Registry};

const WATCH_FOR: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let registry = Registry::new();
    let config = DiscoveryConfig::default().with_wait(Duration::from_secs(2));
    for device in discover(&config).await? {
        registry.insert(device);
    }

    if registry.is_empty() {
        println!("No lights found");
        return Ok(());
    }

    for device in registry.devices() {
        println!(
            "{} {:?} at {} (fw {}, power {:?}, bright {})",
            device.id, device.name, device.address, device.fw_ver, device.power, device.bright
        );
    }

    let (events, mut rx) = event_channel();
    let failed = registry.connect_all(events).await;
    for id in failed {
        println!("Could not connect to {}", id);
    }

    for session in registry.sessions() {
        if session.device().supports("get_prop") {
            session.get_properties(&["power", "bright", "name"]).await?;
        }
    }

    let deadline = tokio::time::sleep(WATCH_FOR);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = rx.recv() => match event {
                Some(DeviceEvent::Result { device_id, result }) => {
                    match result.error {
                        Some(error) => println!("{} result #{} failed: {}", device_id, result.id, error.message),
                        None => println!("{} result #{}: {:?}", device_id, result.id, result.result),
                    }
                }
                Some(DeviceEvent::Notification { device_id, notification }) => {
                    println!("{} {}: {:?}", device_id, notification.method, notification.params);
                }
                None => break,
            }
        }
    }

    registry.close_all().await;
    Ok(())
}
