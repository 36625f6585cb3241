//! Scheduled maintenance jobs

use crate::clock::SharedClock;
use crate::errors::Result;
use crate::metrics;
use crate::rel::attachment::AttachmentType;
use crate::rel::store::AttachmentStore;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Invitations live this long before the cleanup job drops them
pub fn default_invitation_max_age() -> Duration {
    Duration::days(2)
}

/// Delete invitations created before `now - max_age`
pub async fn clear_expired_invitations(
    store: &dyn AttachmentStore,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<u64> {
    let cutoff = now - max_age;
    let removed = store
        .remove_created_before(AttachmentType::Invitation, cutoff)
        .await?;

    metrics::record_cleanup(removed);
    if removed > 0 {
        metrics::record_attachments_deleted("expired", removed);
    }
    info!(removed, cutoff = %cutoff, "Expired invitations cleared");
    Ok(removed)
}

/// Runs [`clear_expired_invitations`] on a fixed interval
pub struct CleanupWorker {
    store: Arc<dyn AttachmentStore>,
    clock: SharedClock,
    interval: std::time::Duration,
    max_age: Duration,
}

impl CleanupWorker {
    pub fn new(store: Arc<dyn AttachmentStore>, clock: SharedClock, interval: std::time::Duration) -> Self {
        Self {
            store,
            clock,
            interval,
            max_age: default_invitation_max_age(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// One pass of every job
    pub async fn run_once(&self) -> Result<u64> {
        clear_expired_invitations(self.store.as_ref(), self.clock.now(), self.max_age).await
    }

    /// Tick until `shutdown` resolves. The first pass runs immediately; a
    /// failed pass is logged and retried on the next tick.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.interval.as_secs(),
            max_age_hours = self.max_age.num_hours(),
            "Cleanup worker started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Cleanup pass failed");
                    }
                }
            }
        }

        info!("Cleanup worker stopped");
    }
}
