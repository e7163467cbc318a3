use std::future::Future;
use std::time::Duration;
use url::Url;
use shared::protocol::{
    setting_value, PRIMING_PATH, SETTING_FIELD, SETTING_OFF, SETTING_ON, STATUS_PATH, SUBMIT_PATH,
};
use shared::types::DeviceInfo;
use crate::error::AppError;
use crate::markup::input_elements;

/// The two operations we perform against a resolved device.
/// Neither retries; that is up to the caller.
pub trait DeviceTransport: Send + Sync + 'static {
    /// Read the current video conversion setting
    fn fetch_setting(&self, device: &DeviceInfo) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Submit a new video conversion setting
    fn set_setting(
        &self,
        device: &DeviceInfo,
        setting: bool,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Build the short-timeout, non-persistent client used for everything that
/// talks to devices (description fetches included).
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(0)
        .user_agent(concat!("vidconv-toggled/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Talks to the receiver's embedded web interface over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn endpoint(device: &DeviceInfo, path: &str) -> Result<Url, AppError> {
    device
        .base_url
        .join(path)
        .map_err(|e| AppError::unexpected(format!("Bad device URL {}", device.base_url)).with_cause(e))
}

impl DeviceTransport for HttpTransport {
    async fn fetch_setting(&self, device: &DeviceInfo) -> Result<bool, AppError> {
        // Only transport failures on the priming request matter
        self.client
            .get(endpoint(device, PRIMING_PATH)?)
            .send()
            .await
            .map_err(AppError::access)?;

        let body = self
            .client
            .get(endpoint(device, STATUS_PATH)?)
            .send()
            .await
            .map_err(AppError::access)?
            .error_for_status()?
            .text()
            .await?;

        parse_setting(&body)
    }

    async fn set_setting(&self, device: &DeviceInfo, setting: bool) -> Result<(), AppError> {
        self.client
            .post(endpoint(device, SUBMIT_PATH)?)
            .form(&[(SETTING_FIELD, setting_value(setting))])
            .send()
            .await
            .map_err(AppError::access)?
            .error_for_status()?;

        tracing::debug!("Submitted {}={} to {}", SETTING_FIELD, setting_value(setting), device);
        Ok(())
    }
}

/// Read the setting out of the status page's radio buttons.
/// Exactly one of the ON/OFF buttons has to be checked.
pub fn parse_setting(html: &str) -> Result<bool, AppError> {
    let inputs = input_elements(html);
    let radio = |value: &str| {
        inputs
            .iter()
            .find(|i| i.attr("name") == Some(SETTING_FIELD) && i.attr("value") == Some(value))
    };

    let (Some(on), Some(off)) = (radio(SETTING_ON), radio(SETTING_OFF)) else {
        return Err(AppError::unexpected("Couldn't find setting input element"));
    };

    let on_checked = on.has_attr("checked");
    let off_checked = off.has_attr("checked");
    if on_checked == off_checked {
        return Err(AppError::unexpected("Setting on and off elements had same value"));
    }

    Ok(on_checked)
}
