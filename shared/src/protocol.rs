use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// SSDP multicast group and port
pub const SSDP_MULTICAST_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900));

/// Search target used to find AV receivers
pub const MEDIA_RENDERER_SERVICE_TYPE: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";

/// MAN header value for a discovery query
pub const SSDP_DISCOVER: &str = "\"ssdp:discover\"";

/// Default MX (maximum response wait) in seconds
pub const DEFAULT_MX_SECS: u64 = 1;

/// Manufacturers whose web interface we know how to drive
pub const SUPPORTED_MANUFACTURERS: [&str; 2] = ["Denon", "Marantz"];

/// Device web interface paths, relative to the device base URL.
/// The priming page has to be requested before the status page, otherwise the
/// status page sometimes comes back with neither radio button checked.
pub const PRIMING_PATH: &str = "SETUP/VIDEO/r_video.asp";
pub const STATUS_PATH: &str = "SETUP/VIDEO/d_video.asp";
pub const SUBMIT_PATH: &str = "SETUP/VIDEO/s_video.asp";

/// Form field carrying the video conversion setting
pub const SETTING_FIELD: &str = "radioVideoConvMode";
pub const SETTING_ON: &str = "ON";
pub const SETTING_OFF: &str = "OFF";

/// Where users are pointed when something goes wrong
pub const DEFAULT_CONTACT: &str = "vidconvtoggle@jjc1138.net";

/// Encode a setting the way the web interface expects it
pub fn setting_value(setting: bool) -> &'static str {
    if setting {
        SETTING_ON
    } else {
        SETTING_OFF
    }
}
