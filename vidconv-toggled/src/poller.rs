use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use anyhow::Result;
use shared::types::DeviceInfo;
use crate::description::DeviceResolver;
use crate::error::{AppError, ErrorKind, ToggleError};
use crate::transport::DeviceTransport;

/// Pause before retrying after a discovery round failed outright (e.g. no network)
const FAILED_ROUND_BACKOFF: Duration = Duration::from_secs(1);

/// The result of reading one device's setting
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub device: DeviceInfo,
    pub result: Result<bool, AppError>,
}

/// Drives discovery, status polling and toggles. Results go to whoever owns
/// the receiving end of the `results` channel; the poller never keeps state
/// about devices itself.
pub struct Poller<T> {
    transport: Arc<T>,
    resolver: DeviceResolver,
    service_type: String,
}

impl<T: DeviceTransport> Poller<T> {
    pub fn new(transport: Arc<T>, resolver: DeviceResolver, service_type: impl Into<String>) -> Self {
        Self {
            transport,
            resolver,
            service_type: service_type.into(),
        }
    }

    /// One discovery round. A fetch is spawned onto `fetches` for every
    /// compatible device as soon as it resolves; this does not wait for them.
    async fn fetch_all_statuses<M>(&self, fetches: &TaskTracker, results: &mpsc::Sender<M>) -> Result<()>
    where
        M: From<FetchOutcome> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let spawn_fetches = async {
            while let Some(device) = rx.recv().await {
                let transport = Arc::clone(&self.transport);
                let results = results.clone();
                fetches.spawn(async move {
                    let result = transport.fetch_setting(&device).await;
                    if results.send(FetchOutcome { device, result }.into()).await.is_err() {
                        tracing::debug!("Fetch result dropped, nobody is listening");
                    }
                });
            }
        };

        let (discovered, ()) = tokio::join!(
            self.resolver.discover_compatible_devices(&self.service_type, tx),
            spawn_fetches
        );
        discovered
    }

    /// Discover devices and fetch every device's setting once.
    /// Returns when every fetch has reported.
    pub async fn fetch_all_statuses_once<M>(&self, results: mpsc::Sender<M>) -> Result<()>
    where
        M: From<FetchOutcome> + Send + 'static,
    {
        let fetches = TaskTracker::new();
        let discovered = self.fetch_all_statuses(&fetches, &results).await;
        fetches.close();
        fetches.wait().await;
        discovered
    }

    /// Poll back to back until cancelled. The discovery window paces the loop.
    ///
    /// Cancellation is checked before each round; fetches that are already
    /// running are allowed to finish before this returns.
    pub async fn run_periodically<M>(&self, results: mpsc::Sender<M>, cancel: CancellationToken)
    where
        M: From<FetchOutcome> + Send + 'static,
    {
        tracing::info!("Starting periodic polling for {}", self.service_type);
        let fetches = TaskTracker::new();

        while !cancel.is_cancelled() {
            if let Err(e) = self.fetch_all_statuses(&fetches, &results).await {
                tracing::error!("Discovery round failed: {:#}", e);
                tokio::select! {
                    _ = tokio::time::sleep(FAILED_ROUND_BACKOFF) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        fetches.close();
        fetches.wait().await;
        tracing::info!("Periodic polling stopped");
    }

    /// Write `wanted`, then read back to verify.
    ///
    /// A failed write is a toggle failure; a failed read-back is a fetch
    /// failure. Reading back the old value means the device ignored us, which
    /// is what a receiver in standby does.
    pub async fn toggle_device(&self, device: &DeviceInfo, wanted: bool) -> Result<bool, ToggleError> {
        self.transport
            .set_setting(device, wanted)
            .await
            .map_err(ToggleError::toggle)?;

        let verified = self
            .transport
            .fetch_setting(device)
            .await
            .map_err(ToggleError::fetch)?;

        if verified != wanted {
            return Err(ToggleError::toggle(AppError::new(ErrorKind::SettingDidNotChange)));
        }
        Ok(verified)
    }

    /// Flip whatever the device currently has
    pub async fn toggle_setting(&self, device: &DeviceInfo) -> Result<bool, ToggleError> {
        let current = self
            .transport
            .fetch_setting(device)
            .await
            .map_err(ToggleError::fetch)?;
        self.toggle_device(device, !current).await
    }
}
