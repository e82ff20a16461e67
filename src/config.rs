use std::net::SocketAddr;
use std::time::Duration;

/// Multicast group and port the lights listen on for searches
pub const MULTICAST_ADDR: &str = "239.255.255.250:1982";

/// Search target understood by the lights
pub const SEARCH_TARGET: &str = "wifi_bulb";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);
const RESULT_RETENTION: Duration = Duration::from_secs(60);
const SEARCH_WAIT: Duration = Duration::from_secs(1);

/// Timing knobs for a [`Session`](crate::Session)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on establishing the TCP stream
    pub connect_timeout: Duration,
    /// Idle time after which a heartbeat query is sent
    pub refresh_interval: Duration,
    /// How long the heartbeat result may take
    pub heartbeat_timeout: Duration,
    /// How long unclaimed results and unanswered calls are kept
    pub result_retention: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            refresh_interval: REFRESH_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            result_retention: RESULT_RETENTION,
        }
    }
}

impl SessionConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_result_retention(mut self, retention: Duration) -> Self {
        self.result_retention = retention;
        self
    }
}

/// Parameters of a multicast search
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Where the search request is sent
    pub multicast_addr: String,
    pub search_target: String,
    /// How long responses are collected
    pub wait: Duration,
    /// Local address to bind; an ephemeral port on all interfaces when `None`
    pub bind_addr: Option<SocketAddr>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            multicast_addr: MULTICAST_ADDR.to_string(),
            search_target: SEARCH_TARGET.to_string(),
            wait: SEARCH_WAIT,
            bind_addr: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    pub fn with_multicast_addr(mut self, addr: impl Into<String>) -> Self {
        self.multicast_addr = addr.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(2));

        let discovery = DiscoveryConfig::default().with_wait(Duration::from_millis(250));
        assert_eq!(discovery.multicast_addr, "239.255.255.250:1982");
        assert_eq!(discovery.search_target, "wifi_bulb");
        assert_eq!(discovery.wait, Duration::from_millis(250));
    }
}
