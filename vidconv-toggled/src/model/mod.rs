//! Reconciliation of poll results and toggles into the device list the UI shows.
//!
//! `Model` is single-threaded on purpose: it is owned by the lane in
//! `model_manager` and every result is marshalled there before it touches the
//! collections below, so none of them need locking.

pub mod counter;

use std::time::Duration;
use tokio::time::Instant;
use shared::types::DeviceInfo;
use crate::config::Config;
use crate::error::{
    describe_error, error_contact_instruction, no_devices_notice, AppError, Operation, ToggleError,
};
use counter::Counter;

/// Notifications for whatever is presenting the device list.
/// Called synchronously on the model's lane.
pub trait ModelDelegate {
    fn insert_device_row(&mut self, index: usize);
    fn reload_device_row(&mut self, index: usize);
    fn delete_device_row(&mut self, index: usize);
    fn delete_device_rows(&mut self, indices: &[usize]);
    fn update_notice_text(&mut self, text: &str);
}

#[derive(Debug, Clone)]
pub struct DeviceSetting {
    pub device: DeviceInfo,
    pub setting: bool,
    pub retrieved: Instant,
}

#[derive(Debug, Clone)]
pub struct OperationError {
    pub device: DeviceInfo,
    pub error: AppError,
    pub operation: Operation,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Settings older than this are dropped by `age_out`
    pub stale_after: Duration,
    /// How long without any device before the "no devices" notice shows
    pub no_devices_after: Duration,
    pub contact: String,
}

impl ModelSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            stale_after: config.model.stale_after(),
            no_devices_after: config.model.no_devices_after(),
            contact: config.notice.contact.clone(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Model<D> {
    delegate: D,
    settings: ModelSettings,
    /// Display order: first seen first
    device_settings: Vec<DeviceSetting>,
    /// At most one per device
    errors: Vec<OperationError>,
    last_seen: Instant,
    toggles_outstanding: Counter<DeviceInfo>,
    notice: String,
}

impl<D: ModelDelegate> Model<D> {
    pub fn new(delegate: D, settings: ModelSettings) -> Self {
        Self {
            delegate,
            settings,
            device_settings: Vec::new(),
            errors: Vec::new(),
            last_seen: Instant::now(),
            toggles_outstanding: Counter::default(),
            notice: String::new(),
        }
    }

    #[cfg(test)]
    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    /// Polling is (re)starting: give devices a fresh grace period before
    /// the "no devices" notice.
    pub fn start(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn device_count(&self) -> usize {
        self.device_settings.len()
    }

    pub fn device_at(&self, index: usize) -> Option<(&DeviceInfo, bool)> {
        self.device_settings.get(index).map(|s| (&s.device, s.setting))
    }

    #[cfg(test)]
    pub fn errors(&self) -> &[OperationError] {
        &self.errors
    }

    pub fn notice_text(&self) -> &str {
        &self.notice
    }

    #[cfg(test)]
    pub fn toggles_outstanding(&self, device: &DeviceInfo) -> usize {
        self.toggles_outstanding.get(device)
    }

    fn index_of(&self, device: &DeviceInfo) -> Option<usize> {
        self.device_settings.iter().position(|s| s.device == *device)
    }

    pub fn record_fetch_result(&mut self, device: DeviceInfo, setting: bool) {
        let now = Instant::now();
        self.last_seen = now;

        match self.index_of(&device) {
            Some(index) => {
                let outstanding = self.toggles_outstanding.contains(&device);
                let entry = &mut self.device_settings[index];
                entry.retrieved = now;
                // While a toggle is in flight this result may predate it; showing it
                // would flip the switch back and then forward again.
                if entry.setting != setting && !outstanding {
                    entry.setting = setting;
                    entry.device = device.clone();
                    self.delegate.reload_device_row(index);
                }
            }
            None => {
                self.device_settings.push(DeviceSetting {
                    device: device.clone(),
                    setting,
                    retrieved: now,
                });
                self.delegate.insert_device_row(self.device_settings.len() - 1);
            }
        }

        self.remove_error(&device, Operation::FetchSetting);
        self.update_notice_text();
    }

    /// The stored setting can no longer be trusted, so it is removed along with recording the error
    pub fn record_fetch_error(&mut self, device: DeviceInfo, error: AppError) {
        tracing::warn!("Fetching setting from {} failed: {}", device.debug_description(), error);
        self.record_operation_error(device.clone(), error, Operation::FetchSetting);
        self.remove_setting(&device);
        self.update_notice_text();
    }

    pub fn record_toggle_error(&mut self, device: DeviceInfo, error: AppError) {
        tracing::warn!("Toggling {} failed: {}", device.debug_description(), error);
        self.record_operation_error(device, error, Operation::Toggle);
    }

    /// Replace the device's error slot, whatever operation the previous error came from
    pub fn record_operation_error(&mut self, device: DeviceInfo, error: AppError, operation: Operation) {
        self.last_seen = Instant::now();
        let entry = OperationError {
            device,
            error,
            operation,
        };

        match self.errors.iter().position(|e| e.device == entry.device) {
            Some(index) => self.errors[index] = entry,
            None => self.errors.push(entry),
        }
        self.update_notice_text();
    }

    pub fn begin_toggle(&mut self, device: &DeviceInfo) {
        self.toggles_outstanding.increment(device.clone());
    }

    pub fn end_toggle(&mut self, device: &DeviceInfo) {
        self.toggles_outstanding.decrement(device);
    }

    /// Start a toggle of the device at `index`.
    ///
    /// Marks the toggle outstanding and shows the wanted value straight away.
    /// Returns the device and wanted setting for the caller to act on, or
    /// `None` if there is no such row.
    pub fn toggle_at(&mut self, index: usize) -> Option<(DeviceInfo, bool)> {
        let entry = self.device_settings.get_mut(index)?;
        let wanted = !entry.setting;
        entry.setting = wanted;
        let device = entry.device.clone();

        self.begin_toggle(&device);
        self.delegate.reload_device_row(index);
        Some((device, wanted))
    }

    /// Ingest the outcome of a toggle started with `toggle_at` or `begin_toggle`.
    /// The toggle stops being outstanding before the result is applied.
    pub fn finish_toggle(&mut self, device: DeviceInfo, result: Result<bool, ToggleError>) {
        self.end_toggle(&device);
        match result {
            Ok(setting) => self.record_fetch_result(device, setting),
            Err(ToggleError {
                operation: Operation::FetchSetting,
                error,
            }) => self.record_fetch_error(device, error),
            Err(ToggleError {
                operation: Operation::Toggle,
                error,
            }) => self.record_toggle_error(device, error),
        }
    }

    pub fn reset_errors(&mut self) {
        self.errors.clear();
        self.last_seen = Instant::now();
        self.update_notice_text();
    }

    /// Drop settings that haven't been refreshed recently
    pub fn age_out(&mut self) {
        let now = Instant::now();
        let stale_after = self.settings.stale_after;
        let is_current = |s: &DeviceSetting| now.duration_since(s.retrieved) <= stale_after;

        if !self.device_settings.iter().all(is_current) {
            let mut removed = Vec::new();
            let mut index = 0;
            self.device_settings.retain(|s| {
                let keep = is_current(s);
                if !keep {
                    removed.push(index);
                }
                index += 1;
                keep
            });

            tracing::debug!("Aged out {} stale device settings", removed.len());
            self.delegate.delete_device_rows(&removed);
        }

        if self.havent_seen_a_device_in_a_while(now) {
            self.update_notice_text();
        }
    }

    fn remove_error(&mut self, device: &DeviceInfo, operation: Operation) {
        // It worked this time, so whatever caused the earlier failure is presumably fixed
        self.errors
            .retain(|e| !(e.device == *device && e.operation == operation));
    }

    fn remove_setting(&mut self, device: &DeviceInfo) {
        if let Some(index) = self.index_of(device) {
            self.device_settings.remove(index);
            self.delegate.delete_device_row(index);
        }
    }

    fn havent_seen_a_device_in_a_while(&self, now: Instant) -> bool {
        self.device_settings.is_empty()
            && self.errors.is_empty()
            && now.duration_since(self.last_seen) > self.settings.no_devices_after
    }

    fn compute_notice_text(&self) -> String {
        if !self.errors.is_empty() {
            let mut parts: Vec<String> = self
                .errors
                .iter()
                .map(|e| describe_error(&e.error, &e.device))
                .collect();
            parts.push(error_contact_instruction(&self.settings.contact));
            parts.join("\n\n")
        } else if self.havent_seen_a_device_in_a_while(Instant::now()) {
            no_devices_notice(&self.settings.contact)
        } else {
            String::new()
        }
    }

    /// Only tells the delegate when the text actually changed
    fn update_notice_text(&mut self) {
        let text = self.compute_notice_text();
        if text != self.notice {
            self.notice = text;
            self.delegate.update_notice_text(&self.notice);
        }
    }
}
