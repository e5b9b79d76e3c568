//! Background task that reclaims space held by expired objects.
//!
//! Expired objects are already unreachable through the store's read path;
//! the sweeper only keeps the backing table from growing without bound.

use crate::services::lifecycle_service::LifecycleService;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

pub fn spawn(service: LifecycleService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match service.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "expired objects reclaimed"),
                Err(err) => warn!(error = %err, "expiry sweep failed"),
            }
        }
    })
}
