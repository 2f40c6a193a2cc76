// Detached entry sweeper
// Periodically drops queue entries whose members did not reconnect in time

use crate::application::gateway::QueueGateway;
use crate::application::shutdown::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Background loop around [`QueueGateway::sweep_detached`]
pub struct DetachedSweeper {
    gateway: Arc<QueueGateway>,
    every: Duration,
}

impl DetachedSweeper {
    /// `every` is clamped to at least one millisecond
    pub fn new(gateway: Arc<QueueGateway>, every: Duration) -> Self {
        Self {
            gateway,
            every: every.max(Duration::from_millis(1)),
        }
    }

    /// Run until shutdown. Should be spawned in tokio::spawn
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            interval_ms = self.every.as_millis() as u64,
            grace_ms = self.gateway.config().disconnect_grace_ms,
            "Detached sweeper started"
        );

        let mut tick = interval(self.every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let removed = self.gateway.sweep_detached().await;
                    if removed > 0 {
                        info!(removed, "Expired detached queue entries");
                    } else {
                        debug!("No detached entries expired");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Detached sweeper stopped");
    }
}
