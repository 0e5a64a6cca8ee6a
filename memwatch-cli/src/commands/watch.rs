//! `memwatch watch`: run the tick loop in the foreground.

use anyhow::{Context, Result};
use clap::Args;

use memwatch_daemon::start_blocking;

use crate::ConfigOverrides;

/// Arguments for `memwatch watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let config = self.overrides.resolve()?;
        start_blocking(config).context("watcher exited with error")
    }
}
