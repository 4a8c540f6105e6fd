//! Periodic reload scheduling.
//!
//! One background task sleeps for the configured interval and then runs the
//! reload callback. The callback is awaited to completion before the next
//! sleep, and a reentry flag drops any overlapping trigger, so two reloads
//! never run concurrently.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ReloadScheduler {
    shutdown: watch::Sender<bool>,
    reloading: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReloadScheduler {
    /// Spawn the reload loop. `reload` is called once per interval.
    pub fn start<F, Fut>(interval: Duration, reload: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let reloading = Arc::new(AtomicBool::new(false));
        let flag = reloading.clone();

        let task = tokio::spawn(async move {
            info!("reload scheduler started (interval: {}s)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }

                if flag.swap(true, Ordering::SeqCst) {
                    debug!("reload already in progress, dropping this tick");
                    continue;
                }
                reload().await;
                flag.store(false, Ordering::SeqCst);
            }
            info!("reload scheduler stopped");
        });

        Self { shutdown, reloading, task }
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::SeqCst)
    }

    /// Signal shutdown and wait for the loop to drain its current reload.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
