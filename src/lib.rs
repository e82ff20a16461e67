//! Rust library for discovering and controlling Yeelight smart lights over the LAN
//!
//! This library provides an async API for the Yeelight LAN control protocol. It supports:
//!
//! - Discovery via multicast search
//! - Persistent per-device sessions with managed reconnect
//! - Request/result correlation with bounded waits
//! - Device state kept in sync from property notifications and periodic polling
//! - Power, brightness, color temperature, RGB, HSV and name commands
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use yeelight_lan::{discover, event_channel, DiscoveryConfig, Effect, Registry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new();
//!     for device in discover(&DiscoveryConfig::default()).await? {
//!         registry.insert(device);
//!     }
//!
//!     let (events, mut rx) = event_channel();
//!     registry.connect_all(events).await;
//!
//!     for session in registry.sessions() {
//!         let id = session.set_brightness(40, Effect::smooth(Duration::from_millis(500))).await?;
//!         session.wait_result(id, Duration::from_secs(2)).await?;
//!     }
//!
//!     // Property pushes from every light arrive on one channel
//!     while let Some(event) = rx.recv().await {
//!         println!("{}: {:?}", event.device_id(), event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Discovery**: multicast search producing raw header maps
//! - **Advertisement**: header maps to [`Device`] records
//! - **Session**: one TCP stream per device, a reader task and a processing loop
//! - **Correlator**: matches results to pending commands by request id
//! - **Sync**: applies notifications and property results to the device state
//! - **Registry**: caller-owned set of sessions keyed by device id
//! - **Protocol**: `\r\n`-delimited JSON message structures

mod advertisement;
mod commands;
mod config;
mod correlator;
mod discovery;
mod error;
mod event;
mod protocol;
mod registry;
mod session;
mod sync;
mod types;

// Public exports
pub use advertisement::{parse_advertisement, parse_support, Headers, LOCATION_SCHEME};
pub use commands::Effect;
pub use config::{DiscoveryConfig, SessionConfig, MULTICAST_ADDR, SEARCH_TARGET};
pub use correlator::PendingCall;
pub use discovery::{discover, parse_search_response, search};
pub use error::{Result, YeelightError};
pub use event::{event_channel, DeviceEvent, EventReceiver, EventSender};
pub use protocol::{Command, CommandResult, ErrorBody, Notification, WireMessage, LINE_TERMINATOR};
pub use registry::Registry;
pub use session::Session;
pub use sync::{apply_notification, apply_properties, CORE_PROPERTIES};
pub use types::{Device, DeviceId, Power, Status};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
