//! Periodic expiry work.
//!
//! # Responsibilities
//! - Prune expired sessions and age out the closed-session queue
//! - Prune both cache tiers in bounded batches
//! - Drop unpolled messages past their retention window

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time;

use crate::engine::{Engine, MaintenanceReport};

/// Drives [`Engine::run_maintenance`] on a fixed interval.
pub struct MaintenanceTask {
    engine: Arc<Engine>,
}

impl MaintenanceTask {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let interval = Duration::from_millis(self.engine.config().cache.prune_interval_ms.max(1));
        tracing::info!(interval_ms = interval.as_millis() as u64, "Maintenance task starting");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.engine.run_maintenance(Instant::now());
                    if report != MaintenanceReport::default() {
                        tracing::debug!(?report, "Maintenance pass");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::lifecycle::Shutdown;

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let engine = Engine::builder(EngineConfig::default()).build();
        let shutdown = Shutdown::new();
        let task = tokio::spawn(MaintenanceTask::new(engine).run(shutdown.subscribe()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger();
        time::timeout(Duration::from_secs(1), task)
            .await
            .expect("maintenance task did not stop")
            .unwrap();
    }
}
