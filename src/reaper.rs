//! Expiry reaper: periodic housekeeping over both registries.
//!
//! A late callback after a sweep resolves to NotFound at the dispatcher,
//! which is exactly the contract — the reaper never races a delivery into a
//! wrong state, it only forgets what nobody can redeem anymore.

use crate::pagination::PaginationStore;
use crate::registry::{Clock, PendingRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub fn spawn_reaper(
    registry: Arc<PendingRegistry>,
    pagination: Arc<PaginationStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick has nothing to sweep.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let now = clock.now();
            let pending_swept = registry.sweep(now);
            let pagination_swept = pagination.sweep(now);
            tracing::debug!(pending_swept, pagination_swept, "expiry sweep complete");
        }
    })
}
