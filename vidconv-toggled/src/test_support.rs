use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use url::Url;
use shared::types::DeviceInfo;
use crate::error::AppError;
use crate::model::ModelDelegate;
use crate::transport::DeviceTransport;

pub fn device(host: &str) -> DeviceInfo {
    DeviceInfo::new(format!("AVR {host}"), Url::parse(&format!("http://{host}/")).unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch,
    Set(bool),
}

/// Transport that replays canned results in order and records what was asked of it
#[derive(Default)]
pub struct ScriptedTransport {
    fetches: Mutex<VecDeque<Result<bool, AppError>>>,
    sets: Mutex<VecDeque<Result<(), AppError>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new(fetches: Vec<Result<bool, AppError>>, sets: Vec<Result<(), AppError>>) -> Self {
        Self {
            fetches: Mutex::new(fetches.into()),
            sets: Mutex::new(sets.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

impl DeviceTransport for ScriptedTransport {
    async fn fetch_setting(&self, _device: &DeviceInfo) -> Result<bool, AppError> {
        self.calls.lock().unwrap().push(Call::Fetch);
        self.fetches.lock().unwrap().pop_front().expect("unscripted fetch")
    }

    async fn set_setting(&self, _device: &DeviceInfo, setting: bool) -> Result<(), AppError> {
        self.calls.lock().unwrap().push(Call::Set(setting));
        self.sets.lock().unwrap().pop_front().expect("unscripted set")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Inserted(usize),
    Reloaded(usize),
    Deleted(usize),
    DeletedMany(Vec<usize>),
    Notice(String),
}

/// Delegate that records every notification; clones share the log
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn row_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| !matches!(e, Event::Notice(_)))
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl ModelDelegate for Recorder {
    fn insert_device_row(&mut self, index: usize) {
        self.push(Event::Inserted(index));
    }

    fn reload_device_row(&mut self, index: usize) {
        self.push(Event::Reloaded(index));
    }

    fn delete_device_row(&mut self, index: usize) {
        self.push(Event::Deleted(index));
    }

    fn delete_device_rows(&mut self, indices: &[usize]) {
        self.push(Event::DeletedMany(indices.to_vec()));
    }

    fn update_notice_text(&mut self, text: &str) {
        self.push(Event::Notice(text.to_string()));
    }
}
