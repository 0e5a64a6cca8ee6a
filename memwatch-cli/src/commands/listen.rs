//! `memwatch listen`: observer side, printing every change it receives.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use memwatch_core::{DiffEntry, TransportKind};
use memwatch_daemon::{DaemonError, DatagramObserver, DuplexObserver, StreamEvent};

use crate::ConfigOverrides;

/// Arguments for `memwatch listen`.
#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Stop after this many changed values.
    #[arg(long)]
    pub count: Option<usize>,

    /// Control line to send once connected (duplex only).
    #[arg(long)]
    pub send: Vec<String>,

    /// Emit one JSON object per line.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ChangeJson<'a> {
    received_at: String,
    chain: &'a str,
    value: String,
}

impl ListenArgs {
    pub fn run(self) -> Result<()> {
        let config = self.overrides.resolve()?;
        let limit = self.count.unwrap_or(usize::MAX);
        let mut printed = 0usize;

        match config.transport {
            TransportKind::Datagram => {
                let observer = DatagramObserver::bind(&config.socket).with_context(|| {
                    format!("failed to bind {}", config.socket.display())
                })?;
                while printed < limit {
                    let batch = match observer.recv() {
                        Ok(Some(batch)) => batch,
                        Ok(None) => continue,
                        // One bad datagram says nothing about the next one.
                        Err(err @ (DaemonError::Codec(_) | DaemonError::Protocol(_))) => {
                            eprintln!("{} {err}", "skipped datagram:".yellow());
                            continue;
                        }
                        Err(err) => return Err(err).context("failed to receive batch"),
                    };
                    for entry in batch.iter().take(limit - printed) {
                        print_change(entry, self.json)?;
                        printed += 1;
                    }
                }
            }
            TransportKind::Duplex => {
                let mut observer = DuplexObserver::connect(&config.socket).with_context(|| {
                    format!("failed to connect to {}", config.socket.display())
                })?;
                for message in &self.send {
                    observer
                        .send_control(message)
                        .context("failed to send control message")?;
                }
                while printed < limit {
                    let Some(event) = observer.next_event().context("failed to read event")?
                    else {
                        eprintln!("watcher closed the connection");
                        break;
                    };
                    match event {
                        StreamEvent::Changed => {}
                        StreamEvent::Ack(message) => {
                            if !self.json {
                                println!("{} {message}", "ack".cyan());
                            }
                        }
                        StreamEvent::Record(entry) => {
                            print_change(&entry, self.json)?;
                            printed += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn print_change(entry: &DiffEntry, json: bool) -> Result<()> {
    if json {
        let line = ChangeJson {
            received_at: Utc::now().to_rfc3339(),
            chain: &entry.name.0,
            value: format!("{:08x}", entry.value),
        };
        println!(
            "{}",
            serde_json::to_string(&line).context("failed to serialize change")?
        );
    } else {
        println!("{} = {}", entry.name.0.bold(), format!("{:08x}", entry.value).green());
    }
    Ok(())
}
