use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use anyhow::{Context, Result};
use url::Url;
use shared::protocol::SSDP_DISCOVER;
use shared::types::DiscoveryResponse;
use crate::config::DiscoveryConfig;

const RECV_BUFFER_SIZE: usize = 8192;

/// Minimal SSDP search client: one M-SEARCH, then collect answers for 2 x MX.
#[derive(Debug, Clone)]
pub struct SsdpClient {
    target: SocketAddr,
    mx: Duration,
}

impl SsdpClient {
    pub fn new(target: SocketAddr, mx: Duration) -> Self {
        Self { target, mx }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.multicast_addr, config.mx())
    }

    /// Run one discovery round.
    ///
    /// Every distinct response is sent to `delegate`; matching and duplicate
    /// filtering happen here, in order, so the consumer only ever sees each
    /// response once. Returns once the collection window has closed, with the
    /// number of distinct responses delivered.
    pub async fn discover(
        &self,
        service_type: &str,
        delegate: mpsc::UnboundedSender<DiscoveryResponse>,
    ) -> Result<usize> {
        let socket = UdpSocket::bind(bind_addr_for(self.target))
            .await
            .context("Failed to bind SSDP socket")?;

        let request = build_search_request(self.target, self.mx, service_type);
        socket
            .send_to(request.as_bytes(), self.target)
            .await
            .with_context(|| format!("Failed to send M-SEARCH to {}", self.target))?;

        let deadline = Instant::now() + self.mx * 2;
        let mut filter = ResponseFilter::default();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => break,
                Ok(Ok((len, from))) => {
                    let Some(response) = filter.accept(&buf[..len]) else {
                        tracing::trace!("Dropped SSDP datagram from {}", from);
                        continue;
                    };
                    // The consumer going away just means nobody cares about the rest of the round
                    let _ = delegate.send(response);
                }
                Ok(Err(e)) => {
                    tracing::debug!("SSDP receive error: {}", e);
                }
            }
        }

        tracing::debug!(
            "Discovery for {} finished with {} distinct responses",
            service_type,
            filter.len()
        );
        Ok(filter.len())
    }
}

fn bind_addr_for(target: SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}

/// M-SEARCH isn't a real HTTP method, so the request is assembled by hand.
pub fn build_search_request(target: SocketAddr, mx: Duration, service_type: &str) -> String {
    [
        "M-SEARCH * HTTP/1.1".to_string(),
        format!("HOST: {}", target),
        format!("MAN: {}", SSDP_DISCOVER),
        format!("MX: {}", mx.as_secs()),
        format!("ST: {}", service_type),
        String::new(),
        String::new(),
    ]
    .join("\r\n")
}

/// Parse a datagram as an HTTP response header block.
///
/// Returns `None` for anything incomplete or malformed, or when LOCATION, ST
/// or USN is missing. Header names are upper-cased.
pub fn parse_response(datagram: &[u8]) -> Option<DiscoveryResponse> {
    let text = std::str::from_utf8(datagram).ok()?;
    let (head, _) = text
        .split_once("\r\n\r\n")
        .or_else(|| text.split_once("\n\n"))?;

    let mut lines = head.lines();
    let status = lines.next()?;
    if !status.starts_with("HTTP/") {
        return None;
    }

    let mut headers = BTreeMap::new();
    for line in lines {
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        headers.insert(name.to_ascii_uppercase(), value.trim().to_string());
    }

    let location = Url::parse(&headers.remove("LOCATION")?).ok()?;
    let search_target = headers.remove("ST")?;
    let usn = headers.remove("USN")?;

    Some(DiscoveryResponse {
        location,
        search_target,
        usn,
        extra_headers: headers,
    })
}

/// Per-round duplicate filter. Devices routinely answer more than once.
#[derive(Debug, Default)]
pub struct ResponseFilter {
    seen: HashSet<DiscoveryResponse>,
}

impl ResponseFilter {
    /// Parse and return the response if it is well formed and not seen before
    pub fn accept(&mut self, datagram: &[u8]) -> Option<DiscoveryResponse> {
        let response = parse_response(datagram)?;
        if self.seen.insert(response.clone()) {
            Some(response)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE_A: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age=180\r\n\
        LOCATION: http://10.0.0.5:8080/description.xml\r\n\
        ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
        USN: uuid:5f9ec1b3-ed59-1900-4530-0005cd000001::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
        Server: KnOS/3.2 UPnP/1.0 DMP/3.5\r\n\
        \r\n";

    const RESPONSE_B: &str = "HTTP/1.1 200 OK\r\n\
        location: http://10.0.0.6:8080/description.xml\r\n\
        st: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
        usn: uuid:other::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
        \r\n";

    #[test]
    fn test_search_request_format() {
        let target: SocketAddr = "239.255.255.250:1900".parse().unwrap();
        let request = build_search_request(
            target,
            Duration::from_secs(1),
            "urn:schemas-upnp-org:device:MediaRenderer:1",
        );

        assert_eq!(
            request,
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: 239.255.255.250:1900\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: 1\r\n\
             ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_parse_response_extracts_fields() {
        let response = parse_response(RESPONSE_A.as_bytes()).unwrap();

        assert_eq!(response.location.as_str(), "http://10.0.0.5:8080/description.xml");
        assert_eq!(response.search_target, "urn:schemas-upnp-org:device:MediaRenderer:1");
        assert!(response.usn.starts_with("uuid:5f9ec1b3"));
        assert_eq!(response.extra_headers.get("CACHE-CONTROL").map(String::as_str), Some("max-age=180"));
        assert_eq!(
            response.extra_headers.get("SERVER").map(String::as_str),
            Some("KnOS/3.2 UPnP/1.0 DMP/3.5"),
            "Header names should be upper-cased"
        );
        assert!(!response.extra_headers.contains_key("LOCATION"));
    }

    #[test]
    fn test_parse_response_header_names_case_insensitive() {
        let response = parse_response(RESPONSE_B.as_bytes()).unwrap();
        assert_eq!(response.location.as_str(), "http://10.0.0.6:8080/description.xml");
        assert!(response.extra_headers.is_empty());
    }

    #[test]
    fn test_parse_response_rejects_incomplete() {
        // No terminating blank line
        let truncated = RESPONSE_A.trim_end_matches("\r\n");
        assert!(parse_response(truncated.as_bytes()).is_none());

        // Missing USN
        let no_usn = "HTTP/1.1 200 OK\r\nLOCATION: http://10.0.0.5/d.xml\r\nST: upnp:rootdevice\r\n\r\n";
        assert!(parse_response(no_usn.as_bytes()).is_none());

        // Bad location
        let bad_location = "HTTP/1.1 200 OK\r\nLOCATION: not a url\r\nST: a\r\nUSN: b\r\n\r\n";
        assert!(parse_response(bad_location.as_bytes()).is_none());

        // A request, not a response
        let notify = "NOTIFY * HTTP/1.1\r\nLOCATION: http://10.0.0.5/d.xml\r\nST: a\r\nUSN: b\r\n\r\n";
        assert!(parse_response(notify.as_bytes()).is_none());

        // Header line without a colon
        let garbled = "HTTP/1.1 200 OK\r\nLOCATION http://10.0.0.5/d.xml\r\nST: a\r\nUSN: b\r\n\r\n";
        assert!(parse_response(garbled.as_bytes()).is_none());

        assert!(parse_response(&[0xff, 0xfe, 0x00]).is_none());
    }

    #[test]
    fn test_filter_fires_once_per_distinct_response() {
        let orders: [&[&str]; 4] = [
            &[RESPONSE_A, RESPONSE_A, RESPONSE_B],
            &[RESPONSE_B, RESPONSE_A, RESPONSE_B, RESPONSE_A],
            &[RESPONSE_A, "garbage", RESPONSE_A, RESPONSE_A, RESPONSE_B, RESPONSE_B],
            &[RESPONSE_B, RESPONSE_B, RESPONSE_B, RESPONSE_A],
        ];

        for order in orders {
            let mut filter = ResponseFilter::default();
            let delivered: Vec<_> = order
                .iter()
                .filter_map(|d| filter.accept(d.as_bytes()))
                .collect();

            assert_eq!(delivered.len(), 2, "Each distinct response should be delivered once");
            assert_ne!(delivered[0], delivered[1]);
            assert_eq!(filter.len(), 2);
        }
    }

    #[test]
    fn test_filter_distinguishes_extra_headers() {
        let with_header = RESPONSE_B.replace("\r\n\r\n", "\r\nEXT: \r\n\r\n");
        let mut filter = ResponseFilter::default();

        assert!(filter.accept(RESPONSE_B.as_bytes()).is_some());
        assert!(filter.accept(with_header.as_bytes()).is_some());
        assert!(filter.accept(with_header.as_bytes()).is_none());
    }

    #[tokio::test]
    async fn test_discover_over_loopback() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = device.local_addr().unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (len, from) = device.recv_from(&mut buf).await.unwrap();
            for payload in [RESPONSE_A, RESPONSE_A, "HTTP/1.1 200 OK\r\n", RESPONSE_B, RESPONSE_A] {
                device.send_to(payload.as_bytes(), from).await.unwrap();
            }
            String::from_utf8_lossy(&buf[..len]).to_string()
        });

        let client = SsdpClient::new(target, Duration::from_secs(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        let delivered = client
            .discover("urn:schemas-upnp-org:device:MediaRenderer:1", tx)
            .await
            .unwrap();

        assert!(
            started.elapsed() >= Duration::from_millis(1900),
            "Discovery should block for the whole collection window"
        );

        let request = responder.await.unwrap();
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n"));

        let mut responses = Vec::new();
        while let Ok(response) = rx.try_recv() {
            responses.push(response);
        }
        assert_eq!(delivered, 2);
        assert_eq!(responses.len(), 2);
    }
}
