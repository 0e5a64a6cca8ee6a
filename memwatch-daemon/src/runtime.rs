use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memwatch_core::{config::ImageConfig, MemoryImage, WatcherConfig};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{io_err, DaemonError};
use crate::watcher::MemoryWatcher;

/// Quiet period after the last write to the image before it is reloaded.
pub const IMAGE_SETTLE: Duration = Duration::from_millis(200);

/// Start the tick loop on a fresh runtime and block until ctrl-c.
pub fn start_blocking(config: WatcherConfig) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the tick loop until ctrl-c.
pub async fn run(config: WatcherConfig) -> Result<(), DaemonError> {
    run_until(config, async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received ctrl-c, stopping watcher"),
            Err(err) => tracing::error!(error = %err, "ctrl-c handler failed, stopping watcher"),
        }
    })
    .await
}

/// Run the tick loop until `shutdown` completes.
///
/// Steps the watcher once per `config.tick_ms` against the configured memory
/// image. The image is reloaded once its file has gone [`IMAGE_SETTLE`]
/// without another write, so a dump written in several steps is only read
/// when complete.
pub async fn run_until<F>(config: WatcherConfig, shutdown: F) -> Result<(), DaemonError>
where
    F: Future<Output = ()>,
{
    let image_config = config.image.clone().ok_or(DaemonError::NoImage)?;
    let mut image = load_image(image_config.clone()).await?;
    let mut watcher = MemoryWatcher::try_new(&config)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut image_watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    // Dumps are usually replaced rather than edited in place, so watch the
    // directory instead of the file.
    image_watcher.watch(&watch_dir(&image_config.path), RecursiveMode::NonRecursive)?;

    let mut interval = tokio::time::interval(config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);
    let mut reload_due: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "image watcher event error");
                        continue;
                    }
                };
                if is_image_event(&event, &image_config.path) {
                    reload_due = Some(settle_deadline(Instant::now()));
                }
            }
            _ = tokio::time::sleep_until(reload_due.unwrap_or_else(Instant::now)), if reload_due.is_some() => {
                reload_due = None;
                match load_image(image_config.clone()).await {
                    Ok(fresh) => {
                        tracing::debug!(bytes = fresh.len(), "memory image reloaded");
                        image = fresh;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "memory image reload failed, keeping previous contents");
                    }
                }
            }
            _ = interval.tick() => {
                let summary = watcher.step(&image);
                if summary.changed > 0 || summary.acknowledged > 0 {
                    tracing::debug!(
                        changed = summary.changed,
                        acknowledged = summary.acknowledged,
                        "tick",
                    );
                }
            }
        }
    }

    watcher.shutdown();
    Ok(())
}

async fn load_image(config: ImageConfig) -> Result<MemoryImage, DaemonError> {
    tokio::task::spawn_blocking(move || {
        MemoryImage::load_at(&config.path, config.base, config.byte_order)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("image load join error: {err}")))?
    .map_err(DaemonError::from)
}

fn settle_deadline(event_at: Instant) -> Instant {
    event_at + IMAGE_SETTLE
}

fn watch_dir(image: &Path) -> PathBuf {
    match image.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_image_event(event: &Event, image: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == image.file_name())
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
