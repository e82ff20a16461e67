//! Multicast search for lights on the local network.

use crate::advertisement::{parse_advertisement, Headers};
use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::types::Device;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{timeout_at, Instant};

const MAX_DATAGRAM: usize = 2048;

/// Build the search request sent to the multicast group
fn search_request(config: &DiscoveryConfig) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\nHOST: {}\r\nMAN: \"ssdp:discover\"\r\nST: {}\r\n\r\n",
        config.multicast_addr, config.search_target
    )
}

/// Parse one search response into its headers; the status line must be `HTTP/1.1 200 OK`
pub fn parse_search_response(text: &str) -> Option<Headers> {
    let mut lines = text.split("\r\n").flat_map(|l| l.split('\n'));
    let status = lines.next()?.trim();
    if !status.starts_with("HTTP/1.1 200") {
        tracing::debug!("Ignoring search reply with status {:?}", status);
        return None;
    }

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    Some(headers)
}

/// Send a search and collect the raw headers of every reply until `config.wait` elapses
pub async fn search(config: &DiscoveryConfig) -> Result<Vec<Headers>> {
    let bind: SocketAddr = config.bind_addr.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
    let socket = UdpSocket::bind(bind).await?;

    let target = lookup_host(config.multicast_addr.as_str())
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot resolve {}", config.multicast_addr),
            )
        })?;

    tracing::info!("Searching for {} on {}", config.search_target, target);
    socket.send_to(search_request(config).as_bytes(), target).await?;

    let replies = collect_replies(&socket, Instant::now() + config.wait).await;
    tracing::info!("Search finished with {} replies", replies.len());
    Ok(replies)
}

/// Gather replies until `deadline`; a receive error ends the search early
async fn collect_replies(socket: &UdpSocket, deadline: Instant) -> Vec<Headers> {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut replies = Vec::new();

    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                tracing::warn!("Search receive error, stopping early: {}", e);
                break;
            }
            Err(_) => break,
        };

        let text = String::from_utf8_lossy(&buf[..len]);
        tracing::debug!("Search reply from {}: {}", from, text);
        if let Some(headers) = parse_search_response(&text) {
            replies.push(headers);
        }
    }
    replies
}

/// Search and turn the replies into devices, one per id
pub async fn discover(config: &DiscoveryConfig) -> Result<Vec<Device>> {
    let replies = search(config).await?;
    Ok(devices_from_replies(&replies))
}

fn devices_from_replies(replies: &[Headers]) -> Vec<Device> {
    let mut seen = BTreeSet::new();
    let mut devices = Vec::new();

    for headers in replies {
        match parse_advertisement(headers) {
            Ok(device) => {
                if seen.insert(device.id.clone()) {
                    devices.push(device);
                }
            }
            Err(e) => tracing::warn!("Invalid search reply: {}", e),
        }
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const REPLY: &str = "HTTP/1.1 200 OK\r\n\
        Cache-Control: max-age=3600\r\n\
        Date: \r\n\
        Ext: \r\n\
        Location: yeelight://192.168.1.239:55443\r\n\
        Server: POSIX UPnP/1.0 YGLC/1\r\n\
        id: 0x000000000015243f\r\n\
        model: color\r\n\
        fw_ver: 18\r\n\
        support: get_prop set_default set_power toggle set_bright start_cf stop_cf set_scene cron_add cron_get cron_del set_ct_abx set_rgb\r\n\
        power: on\r\n\
        bright: 100\r\n\
        color_mode: 2\r\n\
        ct: 4000\r\n\
        rgb: 16711680\r\n\
        hue: 100\r\n\
        sat: 35\r\n\
        name: my_bulb\r\n\r\n";

    #[test]
    fn parses_reply_headers() {
        let headers = parse_search_response(REPLY).unwrap();
        assert_eq!(headers.get("Location").unwrap(), "yeelight://192.168.1.239:55443");
        assert_eq!(headers.get("id").unwrap(), "0x000000000015243f");
        assert_eq!(headers.get("Date").unwrap(), "");

        let device = parse_advertisement(&headers).unwrap();
        assert_eq!(device.address, "192.168.1.239:55443");
        assert_eq!(device.name, "my_bulb");
        assert_eq!(device.rgb, 0xff0000);
        assert!(device.supports("set_rgb"));
    }

    #[test]
    fn ignores_non_ok_replies() {
        assert!(parse_search_response("M-SEARCH * HTTP/1.1\r\nST: wifi_bulb\r\n\r\n").is_none());
        assert!(parse_search_response("").is_none());
    }

    #[test]
    fn deduplicates_by_id() {
        let reply = parse_search_response(REPLY).unwrap();
        let mut broken = reply.clone();
        broken.insert("Location".into(), "nowhere".into());
        let devices = devices_from_replies(&[reply.clone(), reply, broken]);
        assert_eq!(devices.len(), 1);
    }

    #[test]
    fn request_names_target() {
        let request = search_request(&DiscoveryConfig::default());
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1982\r\n"));
        assert!(request.contains("ST: wifi_bulb\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn search_collects_unicast_replies() {
        // A fake light answering on loopback stands in for the multicast group
        let light = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let light_addr = light.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            let (len, from) = light.recv_from(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..len]).contains("ST: wifi_bulb"));
            light.send_to(REPLY.as_bytes(), from).await.unwrap();
            light.send_to(REPLY.as_bytes(), from).await.unwrap();
        });

        let config = DiscoveryConfig::default()
            .with_multicast_addr(light_addr.to_string())
            .with_bind_addr("127.0.0.1:0".parse().unwrap())
            .with_wait(Duration::from_millis(300));

        let devices = discover(&config).await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "0x000000000015243f");
    }

    #[tokio::test]
    async fn receive_error_ends_search_early() {
        let closed = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let closed_addr = closed.local_addr().unwrap();
        drop(closed);

        // A connected socket reports the port-unreachable reply as a receive error
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(closed_addr).await.unwrap();
        socket.send(b"M-SEARCH").await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let replies = tokio::time::timeout(Duration::from_secs(1), collect_replies(&socket, deadline))
            .await
            .expect("search kept waiting after a receive error");
        assert!(replies.is_empty());
    }
}
