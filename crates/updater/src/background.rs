//! Periodic background refresh worker.
//!
//! Runs on a dedicated thread with its own single-threaded runtime so a
//! long page-fetch sequence never competes with the caller's executor.
//! Only the [`CacheStrategy::Periodic`] strategy starts the worker; every
//! refresh error is logged and swallowed, the loop itself never dies.

use crate::config::CacheStrategy;
use crate::orchestrator::CacheOrchestrator;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct BackgroundRefresher {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundRefresher {
    /// Start the worker if the orchestrator's strategy asks for one.
    /// Returns an inert handle otherwise.
    pub fn start(orchestrator: Arc<CacheOrchestrator>) -> Self {
        if orchestrator.config().strategy != CacheStrategy::Periodic {
            log::debug!(
                "cache strategy is '{}', background refresher not started",
                orchestrator.config().strategy.as_str()
            );
            return Self {
                stop: None,
                handle: None,
            };
        }

        let interval = orchestrator.config().update_interval;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("cache-refresh".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        log::error!("background refresher runtime failed to start: {err}");
                        return;
                    }
                };

                log::info!(
                    "background cache refresher started, interval {}s",
                    interval.as_secs()
                );
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            let outcomes = runtime.block_on(orchestrator.ensure_ready(false));
                            let failed = outcomes.values().filter(|o| o.is_failed()).count();
                            if failed > 0 {
                                log::warn!("background refresh: {failed} sources failed");
                            }
                        }
                    }
                }
                log::info!("background cache refresher stopped");
            });

        match handle {
            Ok(handle) => Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            },
            Err(err) => {
                log::error!("failed to spawn background refresher: {err}");
                Self {
                    stop: None,
                    handle: None,
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signal the worker and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}
