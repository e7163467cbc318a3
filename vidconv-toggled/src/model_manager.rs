use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::types::DeviceInfo;
use crate::error::ToggleError;
use crate::model::{Model, ModelDelegate, ModelSettings};
use crate::poller::{FetchOutcome, Poller};
use crate::transport::DeviceTransport;

/// Commands sent to the model lane
pub enum ModelCommand {
    Fetched(FetchOutcome),
    ToggleFinished {
        device: DeviceInfo,
        result: Result<bool, ToggleError>,
    },
    ToggleAt(usize, oneshot::Sender<Option<(DeviceInfo, bool)>>),
    DeviceCount(oneshot::Sender<usize>),
    DeviceAt(usize, oneshot::Sender<Option<(DeviceInfo, bool)>>),
    NoticeText(oneshot::Sender<String>),
    Start,
    ResetErrors,
    AgeOut,
    Shutdown,
}

impl From<FetchOutcome> for ModelCommand {
    fn from(outcome: FetchOutcome) -> Self {
        Self::Fetched(outcome)
    }
}

/// Handle to the thread that owns the `Model`.
///
/// Every mutation of the device list happens on that one thread, in the
/// order the commands arrive.
#[derive(Clone)]
pub struct ModelHandle {
    tx: mpsc::Sender<ModelCommand>,
}

impl ModelHandle {
    /// Spawn the lane. Must be called from within a tokio runtime; toggles
    /// started on the lane run on that runtime.
    pub fn spawn<D, T>(delegate: D, settings: ModelSettings, poller: Arc<Poller<T>>) -> Result<Self>
    where
        D: ModelDelegate + Send + 'static,
        T: DeviceTransport,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .context("Model lane needs a tokio runtime for toggles")?;
        let (tx, mut rx) = mpsc::channel::<ModelCommand>(256);
        // Weak so that dropping every handle still ends the lane
        let completions = tx.downgrade();

        thread::Builder::new()
            .name("model-lane".to_string())
            .spawn(move || {
                let mut model = Model::new(delegate, settings);

                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        ModelCommand::Fetched(FetchOutcome { device, result }) => match result {
                            Ok(setting) => model.record_fetch_result(device, setting),
                            Err(error) => model.record_fetch_error(device, error),
                        },
                        ModelCommand::ToggleFinished { device, result } => {
                            model.finish_toggle(device, result);
                        }
                        ModelCommand::ToggleAt(index, reply) => {
                            let started = model.toggle_at(index);
                            if let Some((device, wanted)) = started.clone() {
                                let Some(tx) = completions.upgrade() else {
                                    // Nobody left to apply the result to
                                    model.end_toggle(&device);
                                    let _ = reply.send(None);
                                    continue;
                                };
                                let poller = Arc::clone(&poller);
                                tracing::info!("Toggling {} to {}", device.debug_description(), wanted);
                                runtime.spawn(async move {
                                    let result = poller.toggle_device(&device, wanted).await;
                                    if tx.send(ModelCommand::ToggleFinished { device, result }).await.is_err() {
                                        tracing::debug!("Toggle finished after the model lane stopped");
                                    }
                                });
                            }
                            let _ = reply.send(started);
                        }
                        ModelCommand::DeviceCount(reply) => {
                            let _ = reply.send(model.device_count());
                        }
                        ModelCommand::DeviceAt(index, reply) => {
                            let row = model.device_at(index).map(|(d, s)| (d.clone(), s));
                            let _ = reply.send(row);
                        }
                        ModelCommand::NoticeText(reply) => {
                            let _ = reply.send(model.notice_text().to_string());
                        }
                        ModelCommand::Start => model.start(),
                        ModelCommand::ResetErrors => model.reset_errors(),
                        ModelCommand::AgeOut => model.age_out(),
                        ModelCommand::Shutdown => {
                            tracing::info!("Model lane shutting down");
                            break;
                        }
                    }
                }
            })
            .context("Failed to spawn model lane")?;

        Ok(Self { tx })
    }

    /// Sender for poll results; `Poller` converts its outcomes into commands
    pub fn sender(&self) -> mpsc::Sender<ModelCommand> {
        self.tx.clone()
    }

    async fn send(&self, cmd: ModelCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("Model lane has stopped"))
    }

    async fn request<R>(&self, cmd: impl FnOnce(oneshot::Sender<R>) -> ModelCommand) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.send(cmd(reply)).await?;
        rx.await.context("Model lane dropped the reply")
    }

    /// Toggle the device shown at `index`. Returns the device and the
    /// setting being requested, or `None` if there is no such row.
    pub async fn toggle_at(&self, index: usize) -> Result<Option<(DeviceInfo, bool)>> {
        self.request(|reply| ModelCommand::ToggleAt(index, reply)).await
    }

    pub async fn device_count(&self) -> Result<usize> {
        self.request(ModelCommand::DeviceCount).await
    }

    pub async fn device_at(&self, index: usize) -> Result<Option<(DeviceInfo, bool)>> {
        self.request(|reply| ModelCommand::DeviceAt(index, reply)).await
    }

    /// Every row in display order
    pub async fn devices(&self) -> Result<Vec<(DeviceInfo, bool)>> {
        let count = self.device_count().await?;
        let mut rows = Vec::with_capacity(count);
        for index in 0..count {
            // Rows can age out between the two requests
            if let Some(row) = self.device_at(index).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub async fn notice_text(&self) -> Result<String> {
        self.request(ModelCommand::NoticeText).await
    }

    pub async fn start(&self) -> Result<()> {
        self.send(ModelCommand::Start).await
    }

    pub async fn reset_errors(&self) -> Result<()> {
        self.send(ModelCommand::ResetErrors).await
    }

    pub async fn age_out(&self) -> Result<()> {
        self.send(ModelCommand::AgeOut).await
    }

    /// Shutdown the model lane
    pub async fn shutdown(&self) -> Result<()> {
        self.send(ModelCommand::Shutdown).await
    }
}

/// Periodic polling plus age-out, started and stopped together
pub struct Session<T> {
    poller: Arc<Poller<T>>,
    model: ModelHandle,
    age_out_interval: Duration,
    running: Option<Running>,
}

struct Running {
    cancel: CancellationToken,
    poll_task: JoinHandle<()>,
    age_out_task: JoinHandle<()>,
}

impl<T: DeviceTransport> Session<T> {
    pub fn new(poller: Arc<Poller<T>>, model: ModelHandle, age_out_interval: Duration) -> Self {
        Self {
            poller,
            model,
            age_out_interval,
            running: None,
        }
    }

    /// Start polling. Starting a running session does nothing.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }
        self.model.start().await?;

        let cancel = CancellationToken::new();

        let poll_task = {
            let poller = Arc::clone(&self.poller);
            let results = self.model.sender();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run_periodically(results, cancel).await })
        };

        let age_out_task = {
            let model = self.model.clone();
            let cancel = cancel.clone();
            let period = self.age_out_interval;
            tokio::spawn(async move { run_age_out(model, period, cancel).await })
        };

        tracing::info!("Session started");
        self.running = Some(Running {
            cancel,
            poll_task,
            age_out_task,
        });
        Ok(())
    }

    /// Stop polling and wait for in-flight fetches to report.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.cancel.cancel();
        running.poll_task.await.context("Poller task failed")?;
        running.age_out_task.await.context("Age-out task failed")?;
        tracing::info!("Session stopped");
        Ok(())
    }
}

async fn run_age_out(model: ModelHandle, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = model.age_out().await {
                    tracing::error!("Failed to age out device settings: {}", e);
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}
