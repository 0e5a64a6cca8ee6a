//! `memwatch check`: one-shot resolution of every chain.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use memwatch_core::{resolve, ChainTable, MemoryImage};

use crate::ConfigOverrides;

/// Arguments for `memwatch check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ChainJson {
    chain: String,
    offsets: Vec<String>,
    value: String,
}

#[derive(Tabled)]
struct ChainRow {
    #[tabled(rename = "chain")]
    chain: String,
    #[tabled(rename = "hops")]
    hops: usize,
    #[tabled(rename = "value")]
    value: String,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let config = self.overrides.resolve()?;
        let image_config = config
            .image
            .as_ref()
            .context("no memory image configured; pass --image or set image.path")?;

        let table = ChainTable::load_at(&config.locations).with_context(|| {
            format!("failed to load chains from {}", config.locations.display())
        })?;
        let image = MemoryImage::load_at(
            &image_config.path,
            image_config.base,
            image_config.byte_order,
        )
        .context("failed to load memory image")?;

        if self.json {
            let rows: Vec<ChainJson> = table
                .iter()
                .map(|chain| ChainJson {
                    chain: chain.name.to_string(),
                    offsets: chain.offsets.iter().map(|o| format!("{o:x}")).collect(),
                    value: format!("{:08x}", resolve(chain, &image)),
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize check JSON")?
            );
            return Ok(());
        }

        println!(
            "memwatch v{} | {} chains | {} bytes at {:#010x}",
            env!("CARGO_PKG_VERSION"),
            table.len(),
            image.len(),
            image.base(),
        );
        let rows: Vec<ChainRow> = table
            .iter()
            .map(|chain| {
                let value = resolve(chain, &image);
                let rendered = format!("{value:08x}");
                ChainRow {
                    chain: chain.name.to_string(),
                    hops: chain.offsets.len(),
                    value: if value == 0 {
                        rendered.bright_black().to_string()
                    } else {
                        rendered.green().to_string()
                    },
                }
            })
            .collect();
        let mut rendered = Table::new(rows);
        rendered.with(Style::rounded());
        println!("{rendered}");
        Ok(())
    }
}
