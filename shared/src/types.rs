use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use url::Url;

/// A compatible device found on the network.
/// Identity is the base URL only: a renamed device is still the same device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Human-readable name, e.g. "Living Room AVR"
    pub name: String,

    /// Base URL of the device's web interface
    pub base_url: Url,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, base_url: Url) -> Self {
        Self {
            name: name.into(),
            base_url,
        }
    }

    /// Name and address, for error messages and logs
    pub fn debug_description(&self) -> String {
        format!("{} <{}>", self.name, self.base_url)
    }
}

impl PartialEq for DeviceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.base_url == other.base_url
    }
}

impl Eq for DeviceInfo {}

impl Hash for DeviceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.base_url.hash(state);
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A single SSDP search response.
/// Equality is structural so repeated answers from the same service collapse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryResponse {
    /// LOCATION header: where the device description lives
    pub location: Url,

    /// ST header
    pub search_target: String,

    /// USN header
    pub usn: String,

    /// Every other header, keys upper-cased
    pub extra_headers: BTreeMap<String, String>,
}

impl fmt::Display for DiscoveryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.location, self.search_target, self.usn)
    }
}
