//! memwatch: stream pointer-chain changes from a memory image to an observer.
//!
//! # Usage
//!
//! ```text
//! memwatch watch  [--locations <file>] [--socket <path>] [--transport datagram|duplex]
//!                 [--image <file>] [--base <hex>] [--byte-order big|little] [--tick-ms <n>]
//! memwatch check  [--locations <file>] [--image <file>] [--base <hex>] [--json]
//! memwatch listen [--socket <path>] [--transport datagram|duplex] [--count <n>] [--send <msg>] [--json]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use commands::{check::CheckArgs, listen::ListenArgs, watch::WatchArgs};
use memwatch_core::{
    config::{self, ImageConfig},
    ByteOrder, TransportKind, WatcherConfig,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "memwatch",
    version,
    about = "Stream changes in watched memory locations over a Unix socket",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the watcher in the foreground until ctrl-c.
    Watch(WatchArgs),

    /// Resolve every chain once against the image and print the values.
    Check(CheckArgs),

    /// Act as the observer: receive and print changes.
    Listen(ListenArgs),
}

// ---------------------------------------------------------------------------
// Shared overrides on top of ~/.memwatch/config.yaml
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    /// Chain definition file.
    #[arg(long)]
    pub locations: Option<PathBuf>,

    /// Socket path shared with the observer.
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// IPC strategy.
    #[arg(long)]
    pub transport: Option<TransportKind>,

    /// Memory image file.
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Address the first byte of the image maps to (hex).
    #[arg(long, value_parser = parse_hex_u32)]
    pub base: Option<u32>,

    /// Word byte order inside the image.
    #[arg(long)]
    pub byte_order: Option<ByteOrder>,

    /// Milliseconds between ticks.
    #[arg(long)]
    pub tick_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Load the config file and apply any flags given on the command line.
    pub fn resolve(self) -> Result<WatcherConfig> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let mut config = config::load_at(&home).context("failed to load config.yaml")?;

        if let Some(locations) = self.locations {
            config.locations = locations;
        }
        if let Some(socket) = self.socket {
            config.socket = socket;
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.tick_ms = tick_ms;
        }

        if let Some(path) = self.image {
            let base = config.image.as_ref().map(|i| i.base).unwrap_or_default();
            let byte_order = config
                .image
                .as_ref()
                .map(|i| i.byte_order)
                .unwrap_or_default();
            config.image = Some(ImageConfig {
                path,
                base,
                byte_order,
            });
        }
        if let Some(image) = config.image.as_mut() {
            if let Some(base) = self.base {
                image.base = base;
            }
            if let Some(byte_order) = self.byte_order {
                image.byte_order = byte_order;
            }
        }
        Ok(config)
    }
}

fn parse_hex_u32(s: &str) -> std::result::Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("'{s}' is not a 32-bit hex address: {e}"))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Listen(args) => args.run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_base_accepts_prefix() {
        assert_eq!(parse_hex_u32("0x80000000"), Ok(0x8000_0000));
        assert_eq!(parse_hex_u32("8000"), Ok(0x8000));
        assert!(parse_hex_u32("0x1_0000_0000").is_err());
    }

    #[test]
    fn cli_parses_watch_flags() {
        let cli = Cli::try_parse_from([
            "memwatch",
            "watch",
            "--transport",
            "duplex",
            "--base",
            "80000000",
            "--byte-order",
            "little",
        ])
        .expect("parse");
        let Commands::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.overrides.transport, Some(TransportKind::Duplex));
        assert_eq!(args.overrides.base, Some(0x8000_0000));
        assert_eq!(args.overrides.byte_order, Some(ByteOrder::Little));
    }
}
