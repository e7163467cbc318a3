use std::fmt;
use std::sync::Arc;
use shared::types::DeviceInfo;

/// Shared so an error can sit in the model's error slot and still be cloned
/// across the lane boundary.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The HTTP transport failed (DNS, connect, timeout)
    CouldNotAccessWebInterface,
    /// HTTP worked but the page did not look the way we expect
    WebInterfaceNotAsExpected,
    /// Not raised at the moment
    SubmittingChangeFailed,
    /// The verify read after a toggle still showed the old value.
    /// Usually means the device is in standby.
    SettingDidNotChange,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CouldNotAccessWebInterface => "could not access web interface",
            Self::WebInterfaceNotAsExpected => "web interface not as expected",
            Self::SubmittingChangeFailed => "submitting change failed",
            Self::SettingDidNotChange => "setting did not change",
        };
        f.write_str(s)
    }
}

/// A failure talking to a known device.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}{}", .info.as_deref().map(|i| format!(": {i}")).unwrap_or_default())]
pub struct AppError {
    pub kind: ErrorKind,
    pub info: Option<String>,
    #[source]
    pub cause: Option<Cause>,
}

impl AppError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            info: None,
            cause: None,
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = Some(info.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Transport-level failure reaching the device
    pub fn access(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::CouldNotAccessWebInterface).with_cause(cause)
    }

    /// The device answered but not with what we can work with
    pub fn unexpected(info: impl Into<String>) -> Self {
        Self::new(ErrorKind::WebInterfaceNotAsExpected).with_info(info)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_status() {
            let info = match e.status() {
                Some(status) => format!("Unexpected HTTP status {status}"),
                None => "Unexpected HTTP status".to_string(),
            };
            Self::unexpected(info).with_cause(e)
        } else if e.is_decode() {
            Self::new(ErrorKind::WebInterfaceNotAsExpected).with_cause(e)
        } else {
            Self::access(e)
        }
    }
}

/// Which operation produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchSetting,
    Toggle,
}

/// A failed toggle, tagged with the step that failed.
/// A failed verify read counts as a fetch failure, not a toggle failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation:?} failed: {error}")]
pub struct ToggleError {
    pub operation: Operation,
    #[source]
    pub error: AppError,
}

impl ToggleError {
    pub fn fetch(error: AppError) -> Self {
        Self {
            operation: Operation::FetchSetting,
            error,
        }
    }

    pub fn toggle(error: AppError) -> Self {
        Self {
            operation: Operation::Toggle,
            error,
        }
    }
}

/// Human-readable description of an error for a particular device
pub fn describe_error(error: &AppError, device: &DeviceInfo) -> String {
    let d = device.debug_description();
    let headline = match error.kind {
        ErrorKind::CouldNotAccessWebInterface => {
            format!("Found device {d} but couldn't access web interface.")
        }
        ErrorKind::WebInterfaceNotAsExpected => {
            format!("Found device {d} but web interface wasn't as expected.")
        }
        ErrorKind::SubmittingChangeFailed => {
            format!("Found device {d} and accessed web interface but changing setting failed.")
        }
        ErrorKind::SettingDidNotChange => {
            format!("Found device {d} but the setting did not change. Is it switched on?")
        }
    };

    let mut parts = vec![headline];
    if let Some(info) = &error.info {
        parts.push(info.clone());
    }
    if let Some(cause) = &error.cause {
        parts.push(cause.to_string());
    }
    parts.join("\n\n")
}

pub fn error_contact_instruction(contact: &str) -> String {
    format!("Please contact {contact} with the above error information.")
}

pub fn no_devices_notice(contact: &str) -> String {
    format!("No devices found.\n\nIf you need help, contact {contact}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn device() -> DeviceInfo {
        DeviceInfo::new("AVR", Url::parse("http://10.0.0.5/").unwrap())
    }

    #[test]
    fn test_describe_error_headline_only() {
        let text = describe_error(&AppError::new(ErrorKind::SettingDidNotChange), &device());
        assert_eq!(
            text,
            "Found device AVR <http://10.0.0.5/> but the setting did not change. Is it switched on?"
        );
    }

    #[test]
    fn test_describe_error_with_info_and_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let error = AppError::new(ErrorKind::CouldNotAccessWebInterface)
            .with_info("while priming")
            .with_cause(cause);

        let text = describe_error(&error, &device());
        let parts: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].contains("couldn't access web interface"));
        assert_eq!(parts[1], "while priming");
        assert_eq!(parts[2], "timed out");
    }

    #[test]
    fn test_display_includes_info() {
        let error = AppError::unexpected("Couldn't find setting input element");
        assert_eq!(
            error.to_string(),
            "web interface not as expected: Couldn't find setting input element"
        );
        assert_eq!(AppError::new(ErrorKind::SettingDidNotChange).to_string(), "setting did not change");
    }

    #[test]
    fn test_source_is_cause() {
        use std::error::Error as _;
        let error = AppError::access(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(error.source().map(|s| s.to_string()).as_deref(), Some("boom"));
    }
}
