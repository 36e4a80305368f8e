use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::config::RefreshConfig;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::{normalize_url, FeedDocument, FeedFetcher, FeedSource, FetchOutcome};
use crate::models::{NewItem, RefreshMeta, Validators};

use super::backoff::BackoffPolicy;

/// What a single refresh attempt did.
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub feed_id: i64,
    pub inserted: usize,
    pub pruned: usize,
    pub not_modified: bool,
    pub unchanged_count: i64,
    pub next_refresh_at: DateTime<Utc>,
}

/// Fetches, reconciles and reschedules feeds.
///
/// One instance is shared (behind an `Arc`) by the background scheduler
/// and by anything that triggers a refresh on demand. All refreshes go
/// through the same lock, so at most one runs at a time.
pub struct Refresher<S = FeedFetcher> {
    repository: Arc<Repository>,
    source: S,
    backoff: BackoffPolicy,
    item_cap: usize,
    error_max_chars: usize,
    lock: Mutex<()>,
}

impl Refresher<FeedFetcher> {
    pub fn from_config(repository: Arc<Repository>, config: &RefreshConfig) -> Result<Self> {
        let fetcher = FeedFetcher::new(config)?;
        Ok(Self::new(repository, fetcher, config))
    }
}

impl<S: FeedSource> Refresher<S> {
    pub fn new(repository: Arc<Repository>, source: S, config: &RefreshConfig) -> Self {
        Self {
            repository,
            source,
            backoff: BackoffPolicy::from(config),
            item_cap: config.item_cap,
            error_max_chars: config.error_max_chars,
            lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Refreshes one feed. Unless the feed cannot be looked up, its
    /// scheduling metadata is always rewritten, success or failure.
    pub async fn refresh(&self, feed_id: i64) -> Result<RefreshReport> {
        let _guard = self.lock.lock().await;

        let url = self.repository.get_feed_url(feed_id).await?;
        let cache = self.repository.get_cache_meta(feed_id).await?;
        let checked_at = Utc::now();

        let outcome = match self.source.fetch(&url, &cache.validators).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.record_failure(feed_id, checked_at, e).await),
        };

        match outcome {
            FetchOutcome::NotModified { validators } => {
                let validators = Validators {
                    etag: validators.etag.or(cache.validators.etag),
                    last_modified: validators.last_modified.or(cache.validators.last_modified),
                };
                let unchanged_count = cache.unchanged_count.saturating_add(1);
                let report = self
                    .record_success(feed_id, checked_at, unchanged_count, validators)
                    .await?;
                tracing::debug!(
                    "Feed {} not modified (unchanged {} times)",
                    feed_id,
                    unchanged_count
                );
                Ok(RefreshReport {
                    not_modified: true,
                    ..report
                })
            }
            FetchOutcome::Fetched {
                document: None, ..
            } => Err(self
                .record_failure(feed_id, checked_at, AppError::FeedReturnedNoContent)
                .await),
            FetchOutcome::Fetched {
                document: Some(document),
                validators,
            } => {
                let details = self
                    .repository
                    .update_feed_details(feed_id, &feed_title(&document, &url), document.site_url.clone())
                    .await;
                if let Err(e) = details {
                    return Err(self.record_failure(feed_id, checked_at, e).await);
                }
                self.apply_document(feed_id, document, validators, cache.unchanged_count, checked_at)
                    .await
            }
        }
    }

    /// Subscribes to a feed, or refreshes it if the URL is already known.
    ///
    /// The feed row is only created once the URL has produced a parseable
    /// feed, so a bad address leaves nothing behind.
    pub async fn subscribe(
        &self,
        raw_url: &str,
        custom_title: Option<String>,
    ) -> Result<RefreshReport> {
        let url = normalize_url(raw_url)?;
        let _guard = self.lock.lock().await;

        let checked_at = Utc::now();
        let outcome = self.source.fetch(&url, &Validators::default()).await?;
        let (document, validators) = match outcome {
            FetchOutcome::Fetched {
                document: Some(document),
                validators,
            } => (document, validators),
            FetchOutcome::Fetched { document: None, .. } => {
                return Err(AppError::FeedReturnedNoContent)
            }
            FetchOutcome::NotModified { .. } => {
                return Err(AppError::UnexpectedStatus { code: 304 })
            }
        };

        let feed_id = self
            .repository
            .upsert_feed(&url, &feed_title(&document, &url), document.site_url.clone())
            .await?;
        if custom_title.is_some() {
            self.repository.set_custom_title(feed_id, custom_title).await?;
        }
        let cache = self.repository.get_cache_meta(feed_id).await?;

        tracing::info!("Subscribed to {} as feed {}", url, feed_id);
        self.apply_document(feed_id, document, validators, cache.unchanged_count, checked_at)
            .await
    }

    async fn apply_document(
        &self,
        feed_id: i64,
        document: FeedDocument,
        validators: Validators,
        previous_unchanged: i64,
        checked_at: DateTime<Utc>,
    ) -> Result<RefreshReport> {
        let (inserted, pruned) = match self.reconcile(feed_id, document).await {
            Ok(counts) => counts,
            Err(e) => return Err(self.record_failure(feed_id, checked_at, e).await),
        };

        let unchanged_count = if inserted == 0 {
            previous_unchanged.saturating_add(1)
        } else {
            0
        };
        let report = self
            .record_success(feed_id, checked_at, unchanged_count, validators)
            .await?;

        if inserted > 0 {
            tracing::info!("Feed {}: {} new item(s)", feed_id, inserted);
        } else {
            tracing::debug!("Feed {}: no new items", feed_id);
        }
        Ok(RefreshReport {
            inserted,
            pruned,
            ..report
        })
    }

    /// Stores the document's new entries and trims the feed to its cap.
    async fn reconcile(&self, feed_id: i64, document: FeedDocument) -> Result<(usize, usize)> {
        let items: Vec<NewItem> = document
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| NewItem::from_entry(feed_id, index, entry))
            .collect();

        let inserted = self.repository.upsert_items(feed_id, items).await?;
        let pruned = self
            .repository
            .enforce_item_limit(feed_id, self.item_cap)
            .await?;
        if pruned > 0 {
            tracing::debug!("Feed {}: pruned {} item(s) over the cap", feed_id, pruned);
        }
        Ok((inserted, pruned))
    }

    async fn record_success(
        &self,
        feed_id: i64,
        checked_at: DateTime<Utc>,
        unchanged_count: i64,
        validators: Validators,
    ) -> Result<RefreshReport> {
        let next_refresh_at = self.backoff.next_refresh_at(checked_at, unchanged_count);
        self.repository
            .save_refresh_meta(
                feed_id,
                RefreshMeta {
                    last_checked_at: checked_at,
                    last_error: None,
                    unchanged_count,
                    next_refresh_at,
                    validators: Some(validators),
                },
            )
            .await?;

        Ok(RefreshReport {
            feed_id,
            inserted: 0,
            pruned: 0,
            not_modified: false,
            unchanged_count,
            next_refresh_at,
        })
    }

    /// Stores a failed attempt and hands the original error back. The
    /// streak restarts so a broken feed is retried at the base interval.
    async fn record_failure(
        &self,
        feed_id: i64,
        checked_at: DateTime<Utc>,
        error: AppError,
    ) -> AppError {
        tracing::warn!("Refresh of feed {} failed: {}", feed_id, error);

        let meta = RefreshMeta {
            last_checked_at: checked_at,
            last_error: Some(truncate_error(&error.to_string(), self.error_max_chars)),
            unchanged_count: 0,
            next_refresh_at: self.backoff.next_refresh_at(checked_at, 0),
            validators: None,
        };
        if let Err(e) = self.repository.save_refresh_meta(feed_id, meta).await {
            tracing::error!("Failed to record error for feed {}: {}", feed_id, e);
        }
        error
    }
}

fn feed_title(document: &FeedDocument, url: &str) -> String {
    document.title.clone().unwrap_or_else(|| url.to_string())
}

fn truncate_error(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        message.to_string()
    } else {
        message.chars().take(max_chars).collect()
    }
}
