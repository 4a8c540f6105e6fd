//! Background reload plumbing: the periodic index reload and the config
//! file watcher.
//!
//! The watcher polls the config file's mtime and, on change, rebuilds the
//! configuration snapshot (command-line values keep precedence). Directory,
//! index-name, or API changes force a full rebuild; a reload-interval change
//! restarts the scheduler; a port change only takes effect on restart.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mdqa_core::{config::config_file_path, Result, ServerConfig};
use mdqa_embed::{EmbeddingCache, OpenAiChat, OpenAiEmbedder};
use mdqa_index::ReloadScheduler;

use crate::state::AppState;

const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Start the periodic reload task for the current configuration.
pub fn spawn_scheduler(state: &Arc<AppState>) -> ReloadScheduler {
    let interval = Duration::from_secs(state.snapshot().reload_interval);
    let state = state.clone();
    ReloadScheduler::start(interval, move || {
        let state = state.clone();
        async move {
            let config = state.snapshot();
            match state.manager.incremental_update(&config).await {
                Ok(outcome) => {
                    if let Some(reason) = outcome.fallback {
                        info!("performed full rebuild (reason: {reason})");
                    } else if outcome.skipped {
                        debug!("reload skipped, another update was in flight");
                    } else if outcome.has_changes() {
                        info!(
                            "incremental update completed: {} added, {} modified, {} deleted",
                            outcome.added.len(),
                            outcome.modified.len(),
                            outcome.deleted.len()
                        );
                    }
                }
                Err(e) => error!("error reloading indexes: {e}"),
            }
        }
    })
}

/// Watches the configuration file and applies hot-reloadable changes.
pub struct ConfigWatcher {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn start(state: Arc<AppState>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let path = config_file_path(&state.cli);
            let mut last_seen = file_mtime(&path);
            info!("configuration file watcher started: {}", path.display());

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(WATCH_POLL_INTERVAL) => {}
                    _ = shutdown_rx.changed() => break,
                }

                let current = file_mtime(&path);
                if current == last_seen {
                    continue;
                }
                last_seen = current;

                if let Err(e) = apply_config_change(&state).await {
                    error!("error reloading configuration: {e}");
                }
            }
        });
        Self { shutdown, task }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

fn file_mtime(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn apply_config_change(state: &Arc<AppState>) -> Result<()> {
    let new = ServerConfig::load(&state.cli)?;
    let old = state.snapshot();
    if new == old {
        return Ok(());
    }

    let api_changed = new.api != old.api;
    let corpus_changed = new.directories != old.directories || new.index_name != old.index_name;
    let interval_changed = new.reload_interval != old.reload_interval;

    info!("configuration reloaded");
    if new.port != old.port {
        warn!("port change detected; a server restart is required for it to take effect");
    }

    *state.config.write() = new.clone();

    if api_changed {
        info!("updating API configuration");
        let cache_dir = mdqa_core::config::config_dir();
        let paths = mdqa_core::CachePaths::new(&cache_dir)?;
        let cache = Arc::new(EmbeddingCache::new(paths.embeddings_dir));
        state.manager.set_embedder(Arc::new(OpenAiEmbedder::new(&new.api, cache)?));
        *state.chat.write() = Arc::new(OpenAiChat::new(&new.api)?);
    }

    if interval_changed {
        info!("restarting reload scheduler (new interval: {}s)", new.reload_interval);
        let mut slot = state.scheduler.lock().await;
        if let Some(old_scheduler) = slot.take() {
            old_scheduler.stop().await;
        }
        *slot = Some(spawn_scheduler(state));
    }

    if api_changed || corpus_changed {
        info!("performing full rebuild with the new configuration");
        state.manager.full_rebuild(&new).await?;
    }

    Ok(())
}
