use crate::advertisement::{parse_advertisement, Headers};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::event::EventSender;
use crate::lock;
use crate::session::Session;
use crate::types::{Device, DeviceId};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Known devices and their sessions, keyed by device id
///
/// The registry is owned by the caller and shared by handle; nothing in the
/// crate keeps devices in global state.
///
/// # Example
///
/// ```no_run
/// use yeelight_lan::{discover, event_channel, DiscoveryConfig, Registry};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = Registry::new();
///     for device in discover(&DiscoveryConfig::default()).await? {
///         registry.insert(device);
///     }
///
///     let (events, mut rx) = event_channel();
///     registry.connect_all(events).await;
///
///     while let Some(event) = rx.recv().await {
///         println!("{:?}", event);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Registry {
    sessions: Arc<Mutex<BTreeMap<DeviceId, Session>>>,
    update_tx: Arc<broadcast::Sender<DeviceId>>,
    config: SessionConfig,
}

impl Registry {
    /// Create an empty registry with default session timings
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Create an empty registry whose sessions use `config`
    pub fn with_config(config: SessionConfig) -> Self {
        let (update_tx, _) = broadcast::channel(100);
        Self {
            sessions: Arc::new(Mutex::new(BTreeMap::new())),
            update_tx: Arc::new(update_tx),
            config,
        }
    }

    /// Subscribe to ids of newly inserted devices
    pub fn subscribe_updates(&self) -> broadcast::Receiver<DeviceId> {
        self.update_tx.subscribe()
    }

    /// Add a device, returning its session.
    ///
    /// Lights answer a search several times; a device whose id is already
    /// known keeps its existing session.
    pub fn insert(&self, device: Device) -> Session {
        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.get(&device.id) {
            tracing::debug!("Device {} already known", device.id);
            return existing.clone();
        }

        let id = device.id.clone();
        tracing::info!("New device {} ({}) at {}", id, device.name, device.address);
        let session = Session::with_config(device, self.config.clone());
        sessions.insert(id.clone(), session.clone());
        drop(sessions);

        let _ = self.update_tx.send(id);
        session
    }

    /// Parse a discovery response and insert the device it describes
    pub fn ingest(&self, headers: &Headers) -> Result<Session> {
        match parse_advertisement(headers) {
            Ok(device) => Ok(self.insert(device)),
            Err(e) => {
                tracing::warn!("Rejected advertisement: {}", e);
                Err(e)
            }
        }
    }

    /// Get the session for a device
    pub fn get(&self, id: &str) -> Option<Session> {
        lock(&self.sessions).get(id).cloned()
    }

    /// Remove a device; its session is returned so the caller can close it
    pub fn remove(&self, id: &str) -> Option<Session> {
        lock(&self.sessions).remove(id)
    }

    /// Get the known device ids
    pub fn ids(&self) -> Vec<DeviceId> {
        lock(&self.sessions).keys().cloned().collect()
    }

    /// Get all sessions
    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.sessions).values().cloned().collect()
    }

    /// Get a snapshot of every device
    pub fn devices(&self) -> Vec<Device> {
        self.sessions().iter().map(Session::device).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start every session that is not listening yet, concurrently.
    ///
    /// Returns the ids that failed to connect; their sessions stay registered.
    pub async fn connect_all(&self, events: EventSender) -> Vec<DeviceId> {
        let idle: Vec<Session> = self.sessions().into_iter().filter(|s| !s.is_listening()).collect();

        let attempts = idle.into_iter().map(|session| {
            let events = events.clone();
            async move {
                match session.listen(events).await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!("Failed to connect to {}: {}", session.id(), e);
                        Some(session.id())
                    }
                }
            }
        });

        join_all(attempts).await.into_iter().flatten().collect()
    }

    /// Close every session
    pub async fn close_all(&self) {
        let closes = self.sessions().into_iter().map(|session| async move {
            if let Err(e) = session.close().await {
                tracing::debug!("Error closing {}: {}", session.id(), e);
            }
        });
        join_all(closes).await;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
