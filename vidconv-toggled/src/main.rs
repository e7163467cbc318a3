mod config;
mod console;
mod description;
mod error;
mod markup;
mod model;
mod model_manager;
mod poller;
mod ssdp;
mod transport;
#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use anyhow::{bail, Context, Result};
use url::Url;
use shared::types::DeviceInfo;
use crate::config::Config;
use crate::console::{format_setting, ConsoleDelegate};
use crate::description::DeviceResolver;
use crate::error::{describe_error, error_contact_instruction, no_devices_notice};
use crate::model::ModelSettings;
use crate::model_manager::{ModelHandle, Session};
use crate::poller::{FetchOutcome, Poller};
use crate::ssdp::SsdpClient;
use crate::transport::{build_client, HttpTransport};

const DEFAULT_CONFIG_PATH: &str = "/etc/vidconv-toggle/toggled.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Watch,
    List,
    Toggle(Url),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cli {
    mode: Mode,
    config_path: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Cli> {
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().context("--config needs a path")?;
            config_path = Some(PathBuf::from(path));
        } else if let Some(path) = arg.strip_prefix("--config=") {
            config_path = Some(PathBuf::from(path));
        } else {
            positional.push(arg);
        }
    }

    let mode = match positional.as_slice() {
        [] => Mode::Watch,
        [cmd] if cmd == "watch" => Mode::Watch,
        [cmd] if cmd == "list" => Mode::List,
        [cmd, url] if cmd == "toggle" => {
            Mode::Toggle(Url::parse(url).with_context(|| format!("Invalid device URL {url}"))?)
        }
        [cmd] if cmd == "toggle" => bail!("toggle needs the device's base URL"),
        other => bail!("Unexpected arguments: {}", other.join(" ")),
    };

    Ok(Cli { mode, config_path })
}

/// Everything that talks to the network, wired from config
fn build_poller(config: &Config) -> Result<Arc<Poller<HttpTransport>>> {
    let client = build_client(config.device.request_timeout()).context("Failed to build HTTP client")?;
    let resolver = DeviceResolver::new(
        client.clone(),
        SsdpClient::from_config(&config.discovery),
        config.device.manufacturers.clone(),
    );
    let transport = Arc::new(HttpTransport::new(client));
    Ok(Arc::new(Poller::new(transport, resolver, config.discovery.service_type.clone())))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vidconv_toggled=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args(std::env::args().skip(1))?;
    let config = Config::load_or_default(cli.config_path.as_deref(), Path::new(DEFAULT_CONFIG_PATH))?;
    let poller = build_poller(&config)?;

    match cli.mode {
        Mode::Watch => watch(config, poller).await,
        Mode::List => list(config, poller).await,
        Mode::Toggle(base_url) => toggle(config, poller, base_url).await,
    }
}

async fn watch(config: Config, poller: Arc<Poller<HttpTransport>>) -> Result<ExitCode> {
    tracing::info!("Starting vidconv-toggled");

    let model = ModelHandle::spawn(
        ConsoleDelegate::new(std::io::stdout()),
        ModelSettings::from_config(&config),
        Arc::clone(&poller),
    )?;
    let mut session = Session::new(poller, model.clone(), config.model.age_out_interval());
    session.start().await?;

    let input = console::spawn_stdin_reader()?;
    let outcome = tokio::select! {
        result = console::run(&model, input, std::io::stdout()) => result,
        result = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            result.context("Failed to listen for ctrl-c")
        }
    };

    if let Err(e) = session.stop().await {
        tracing::error!("Failed to stop polling: {:#}", e);
    }
    if let Err(e) = model.shutdown().await {
        tracing::error!("Failed to shutdown model lane: {:#}", e);
    }

    tracing::info!("Shutdown complete");
    outcome.map(|()| ExitCode::SUCCESS)
}

async fn list(config: Config, poller: Arc<Poller<HttpTransport>>) -> Result<ExitCode> {
    let (tx, mut rx) = mpsc::channel::<FetchOutcome>(256);
    let round = tokio::spawn(async move { poller.fetch_all_statuses_once(tx).await });

    let mut found = 0;
    let mut failed = 0;
    while let Some(FetchOutcome { device, result }) = rx.recv().await {
        found += 1;
        match result {
            Ok(setting) => println!("{}: {}", device, format_setting(setting)),
            Err(error) => {
                failed += 1;
                eprintln!("{}\n", describe_error(&error, &device));
            }
        }
    }
    round.await.context("Discovery task failed")??;

    if failed > 0 {
        eprintln!("{}", error_contact_instruction(&config.notice.contact));
        return Ok(ExitCode::FAILURE);
    }
    if found == 0 {
        eprintln!("{}", no_devices_notice(&config.notice.contact));
    }
    Ok(ExitCode::SUCCESS)
}

async fn toggle(config: Config, poller: Arc<Poller<HttpTransport>>, base_url: Url) -> Result<ExitCode> {
    let device = DeviceInfo::new(base_url.to_string(), base_url);

    match poller.toggle_setting(&device).await {
        Ok(setting) => {
            println!("{}: {}", device, format_setting(setting));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}\n", describe_error(&e.error, &device));
            eprintln!("{}", error_contact_instruction(&config.notice.contact));
            Ok(ExitCode::FAILURE)
        }
    }
}
