//! Background loop that refreshes due feeds and tidies up old rows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{CleanupConfig, RefreshConfig};
use crate::error::Result;
use crate::feed::{FeedFetcher, FeedSource};

use super::refresher::Refresher;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub read_removed: usize,
    pub tombstones_pruned: usize,
}

pub struct RefreshScheduler<S = FeedFetcher> {
    refresher: Arc<Refresher<S>>,
    tick: Duration,
    batch_size: usize,
    cleanup: CleanupConfig,
    last_cleanup: Option<Instant>,
}

impl<S: FeedSource + 'static> RefreshScheduler<S> {
    pub fn new(refresher: Arc<Refresher<S>>, refresh: &RefreshConfig, cleanup: CleanupConfig) -> Self {
        Self {
            refresher,
            tick: refresh.tick(),
            batch_size: refresh.batch_size.max(1),
            cleanup,
            last_cleanup: None,
        }
    }

    /// Refreshes up to one batch of due feeds, oldest schedule first.
    /// Returns how many refreshes succeeded.
    pub async fn tick_once(&self, now: DateTime<Utc>) -> usize {
        let repository = self.refresher.repository();
        let due = match repository.list_due_feeds(now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to list feeds due for refresh: {}", e);
                return 0;
            }
        };

        if due.is_empty() {
            debug!("No feeds due for refresh");
            return 0;
        }

        debug!("Refreshing {} due feed(s)", due.len());
        let mut refreshed = 0;
        for feed_id in due {
            match self.refresher.refresh(feed_id).await {
                Ok(_) => refreshed += 1,
                Err(e) if e.is_transient() => {
                    debug!("Feed {} will be retried later: {}", feed_id, e)
                }
                Err(e) => warn!("Skipping feed {}: {}", feed_id, e),
            }
        }
        refreshed
    }

    /// Removes items read longer ago than the retention window and
    /// tombstones older than their retention.
    pub async fn housekeeping(&self, now: DateTime<Utc>) -> Result<HousekeepingReport> {
        let repository = self.refresher.repository();
        let read_removed = repository
            .cleanup_read(now - self.cleanup.read_retention())
            .await?;
        let tombstones_pruned = repository
            .prune_tombstones(now - self.cleanup.tombstone_retention())
            .await?;

        if read_removed > 0 || tombstones_pruned > 0 {
            info!(
                "Housekeeping removed {} read item(s) and {} tombstone(s)",
                read_removed, tombstones_pruned
            );
        }
        Ok(HousekeepingReport {
            read_removed,
            tombstones_pruned,
        })
    }

    async fn housekeeping_if_due(&mut self, now: DateTime<Utc>) {
        let due = self
            .last_cleanup
            .map_or(true, |last| last.elapsed() >= self.cleanup.interval());
        if !due {
            return;
        }

        if let Err(e) = self.housekeeping(now).await {
            error!("Housekeeping failed: {}", e);
        }
        self.last_cleanup = Some(Instant::now());
    }

    /// Runs until `shutdown` flips to `true` or its sender goes away.
    /// A tick already in progress is allowed to finish.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Refresh scheduler started (tick: {}s, batch: {})",
            self.tick.as_secs(),
            self.batch_size
        );

        let mut timer = interval(self.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let now = Utc::now();
                    self.tick_once(now).await;
                    self.housekeeping_if_due(now).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Refresh scheduler stopped");
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, join }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stops scheduling new ticks and waits for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!("Refresh scheduler task failed: {}", e);
        }
    }
}
