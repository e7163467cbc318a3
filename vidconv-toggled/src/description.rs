use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use anyhow::Result;
use url::Url;
use shared::types::{DeviceInfo, DiscoveryResponse};
use crate::markup::{element_section, element_text};
use crate::ssdp::SsdpClient;

/// Turns discovery responses into compatible devices by reading their UPnP
/// device description. Anything we can't use is skipped, not reported:
/// a search routinely turns up TVs, speakers and routers.
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    client: reqwest::Client,
    ssdp: SsdpClient,
    manufacturers: Arc<Vec<String>>,
}

impl DeviceResolver {
    pub fn new(client: reqwest::Client, ssdp: SsdpClient, manufacturers: Vec<String>) -> Self {
        Self {
            client,
            ssdp,
            manufacturers: Arc::new(manufacturers),
        }
    }

    /// Fetch and parse the description at `location`
    pub async fn resolve(&self, location: &Url) -> Option<DeviceInfo> {
        let response = match self.client.get(location.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", location, e);
                return None;
            }
        };
        let body = match response.error_for_status() {
            Ok(r) => r.text().await,
            Err(e) => Err(e),
        };
        let xml = match body {
            Ok(xml) => xml,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", location, e);
                return None;
            }
        };

        let device = parse_description(&xml, location, &self.manufacturers);
        if device.is_none() {
            tracing::debug!("Skipping {}: not a compatible device", location);
        }
        device
    }

    /// Run one discovery round and resolve every response concurrently.
    ///
    /// Devices are sent to `devices` as soon as they resolve. Returns when the
    /// discovery window has closed and every description fetch has finished.
    pub async fn discover_compatible_devices(
        &self,
        service_type: &str,
        devices: mpsc::UnboundedSender<DeviceInfo>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DiscoveryResponse>();
        let mut fetches = JoinSet::new();

        let spawn_fetches = async {
            while let Some(response) = rx.recv().await {
                let resolver = self.clone();
                let devices = devices.clone();
                fetches.spawn(async move {
                    if let Some(device) = resolver.resolve(&response.location).await {
                        tracing::debug!("Resolved {}", device.debug_description());
                        let _ = devices.send(device);
                    }
                });
            }
        };

        let (discovered, ()) = tokio::join!(self.ssdp.discover(service_type, tx), spawn_fetches);

        while let Some(joined) = fetches.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Description fetch task failed: {}", e);
            }
        }

        discovered.map(|_| ())
    }
}

/// Build a `DeviceInfo` from a device description if the root device is made
/// by one of `manufacturers`. The presentation URL is resolved against `location`.
pub fn parse_description(xml: &str, location: &Url, manufacturers: &[String]) -> Option<DeviceInfo> {
    let device = element_section(xml, "device", "deviceList")?;

    let manufacturer = element_text(device, "manufacturer")?;
    if !manufacturers.iter().any(|m| *m == manufacturer) {
        return None;
    }

    let presentation_url = location.join(&element_text(device, "presentationURL")?).ok()?;
    let friendly_name = element_text(device, "friendlyName")?;

    Some(DeviceInfo::new(friendly_name, presentation_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use crate::transport::build_client;

    fn description(manufacturer: &str, presentation_url: &str, name: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>{name}</friendlyName>
    <manufacturer>{manufacturer}</manufacturer>
    <modelName>*AVR-X2000</modelName>
    <presentationURL>{presentation_url}</presentationURL>
  </device>
</root>"#
        )
    }

    fn manufacturers() -> Vec<String> {
        vec!["Denon".to_string(), "Marantz".to_string()]
    }

    fn resolver(ssdp_target: std::net::SocketAddr) -> DeviceResolver {
        DeviceResolver::new(
            build_client(Duration::from_secs(5)).unwrap(),
            SsdpClient::new(ssdp_target, Duration::from_secs(1)),
            manufacturers(),
        )
    }

    #[test]
    fn test_parse_description_resolves_relative_url() {
        let location = Url::parse("http://10.0.0.5:8080/description.xml").unwrap();
        let device = parse_description(&description("Denon", "/", "Living Room"), &location, &manufacturers())
            .unwrap();

        assert_eq!(device.name, "Living Room");
        assert_eq!(device.base_url.as_str(), "http://10.0.0.5:8080/");
    }

    #[test]
    fn test_parse_description_absolute_url() {
        let location = Url::parse("http://10.0.0.5:8080/description.xml").unwrap();
        let device = parse_description(
            &description("Marantz", "http://10.0.0.5/", "Den"),
            &location,
            &manufacturers(),
        )
        .unwrap();

        assert_eq!(device.base_url.as_str(), "http://10.0.0.5/");
    }

    #[test]
    fn test_parse_description_filters_manufacturer() {
        let location = Url::parse("http://10.0.0.7/desc.xml").unwrap();
        assert!(parse_description(&description("Sonos, Inc.", "/", "Kitchen"), &location, &manufacturers()).is_none());
        assert!(parse_description(&description("denon", "/", "Case"), &location, &manufacturers()).is_none());
    }

    #[test]
    fn test_parse_description_missing_fields() {
        let location = Url::parse("http://10.0.0.7/desc.xml").unwrap();
        let no_presentation = "<root><device><manufacturer>Denon</manufacturer>\
                               <friendlyName>X</friendlyName></device></root>";
        assert!(parse_description(no_presentation, &location, &manufacturers()).is_none());

        let no_name = "<root><device><manufacturer>Denon</manufacturer>\
                       <presentationURL>/</presentationURL></device></root>";
        assert!(parse_description(no_name, &location, &manufacturers()).is_none());

        assert!(parse_description("not xml at all", &location, &manufacturers()).is_none());
    }

    #[tokio::test]
    async fn test_resolve_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/description.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(description("Denon", "/", "AVR")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let resolver = resolver("127.0.0.1:1900".parse().unwrap());

        let location = Url::parse(&format!("{}/description.xml", server.uri())).unwrap();
        let device = resolver.resolve(&location).await.unwrap();
        assert_eq!(device.base_url.as_str(), format!("{}/", server.uri()));

        let missing = Url::parse(&format!("{}/missing.xml", server.uri())).unwrap();
        assert!(resolver.resolve(&missing).await.is_none());
    }

    #[tokio::test]
    async fn test_discover_compatible_devices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/denon.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(description("Denon", "/", "AVR")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tv.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(description("Samsung", "/", "TV")))
            .mount(&server)
            .await;

        let fake_device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = fake_device.local_addr().unwrap();
        let uri = server.uri();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (_, from) = fake_device.recv_from(&mut buf).await.unwrap();
            for (file, usn) in [("denon.xml", "uuid:a"), ("tv.xml", "uuid:b"), ("denon.xml", "uuid:a")] {
                let datagram = format!(
                    "HTTP/1.1 200 OK\r\nLOCATION: {uri}/{file}\r\n\
                     ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\nUSN: {usn}\r\n\r\n"
                );
                fake_device.send_to(datagram.as_bytes(), from).await.unwrap();
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        resolver(target)
            .discover_compatible_devices("urn:schemas-upnp-org:device:MediaRenderer:1", tx)
            .await
            .unwrap();

        let mut devices = Vec::new();
        while let Ok(device) = rx.try_recv() {
            devices.push(device);
        }
        assert_eq!(devices.len(), 1, "Only the Denon should resolve, and only once");
        assert_eq!(devices[0].name, "AVR");
    }
}
