use std::io::{BufRead, Write};
use std::thread;
use tokio::sync::mpsc;
use anyhow::{Context, Result};
use shared::types::DeviceInfo;
use crate::model::ModelDelegate;
use crate::model_manager::ModelHandle;

/// Prints model notifications as they happen.
///
/// The delegate only learns row indices, so row changes are announced and
/// `list` shows the rows themselves.
pub struct ConsoleDelegate<W> {
    out: W,
}

impl<W: Write> ConsoleDelegate<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            tracing::error!("Failed to write to console: {}", e);
        }
    }
}

impl<W: Write> ModelDelegate for ConsoleDelegate<W> {
    fn insert_device_row(&mut self, index: usize) {
        self.line(&format!("+ device at row {index}"));
    }

    fn reload_device_row(&mut self, index: usize) {
        self.line(&format!("~ row {index} changed"));
    }

    fn delete_device_row(&mut self, index: usize) {
        self.line(&format!("- row {index} removed"));
    }

    fn delete_device_rows(&mut self, indices: &[usize]) {
        let rows: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
        self.line(&format!("- rows {} removed", rows.join(", ")));
    }

    fn update_notice_text(&mut self, text: &str) {
        if text.is_empty() {
            self.line("(notice cleared)");
        } else {
            self.line(text);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Toggle(usize),
    Reset,
    Quit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command {0:?}, try `help`")]
    Unknown(String),
    #[error("`toggle` needs a row number")]
    MissingRow,
    #[error("Not a row number: {0:?}")]
    BadRow(String),
}

const HELP: &str = "Commands: list, toggle N, reset, quit";

/// Parse one line of input. Blank lines are `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "list" | "ls" => ConsoleCommand::List,
        "toggle" | "t" => {
            let row = words.next().ok_or(CommandError::MissingRow)?;
            let index = row.parse().map_err(|_| CommandError::BadRow(row.to_string()))?;
            ConsoleCommand::Toggle(index)
        }
        "reset" => ConsoleCommand::Reset,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        "help" | "?" => ConsoleCommand::Help,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

pub fn format_setting(setting: bool) -> &'static str {
    if setting {
        "on"
    } else {
        "off"
    }
}

pub fn format_row(index: usize, device: &DeviceInfo, setting: bool) -> String {
    format!("{index}: {device}: {}", format_setting(setting))
}

/// Read stdin on its own thread so a pending read never holds up shutdown
pub fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Run commands until `quit` or end of input
pub async fn run<W: Write>(model: &ModelHandle, mut lines: mpsc::Receiver<String>, mut out: W) -> Result<()> {
    writeln!(out, "{}", HELP)?;

    while let Some(line) = lines.recv().await {
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };

        match command {
            ConsoleCommand::List => {
                let rows = model.devices().await?;
                if rows.is_empty() {
                    writeln!(out, "No devices yet")?;
                }
                for (index, (device, setting)) in rows.iter().enumerate() {
                    writeln!(out, "{}", format_row(index, device, *setting))?;
                }
                let notice = model.notice_text().await?;
                if !notice.is_empty() {
                    writeln!(out, "\n{}", notice)?;
                }
            }
            ConsoleCommand::Toggle(index) => match model.toggle_at(index).await? {
                Some((device, wanted)) => {
                    writeln!(out, "Turning {} {}", device, format_setting(wanted))?;
                }
                None => writeln!(out, "No device at row {index}")?,
            },
            ConsoleCommand::Reset => model.reset_errors().await?,
            ConsoleCommand::Help => writeln!(out, "{}", HELP)?,
            ConsoleCommand::Quit => break,
        }
    }

    Ok(())
}
