//! Background task that sweeps abandoned sessions.

use super::store::SessionStore;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default inactivity after which a session is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Sweep `store` every `interval` until `shutdown` is cancelled.
pub fn spawn_reaper(
    store: SessionStore,
    interval: Duration,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Session reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = store.sweep_at(Instant::now(), idle_timeout);
                    if !evicted.is_empty() {
                        info!(
                            evicted = evicted.len(),
                            remaining = store.len(),
                            "Session sweep finished"
                        );
                    }
                }
            }
        }
    })
}
