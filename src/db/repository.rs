use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{CacheMeta, Feed, Item, ItemFilter, NewItem, RefreshMeta, Validators};

use super::schema::SCHEMA;

const FEED_COLUMNS: &str = "id, url, feed_title, custom_title, site_url, position, etag, \
     last_modified, last_checked_at, last_error, error_count, unchanged_count, \
     next_refresh_at, created_at";

const ITEM_COLUMNS: &str =
    "id, feed_id, guid, title, link, summary, content, published_at, read_at, created_at";

/// (item id, feed id, guid) of a row about to be deleted.
type Doomed = (i64, i64, String);

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    /// Inserts the feed or, when the URL is already subscribed, refreshes
    /// its upstream title. A user title override is never touched.
    pub async fn upsert_feed(
        &self,
        url: &str,
        title: &str,
        site_url: Option<String>,
    ) -> Result<i64> {
        let url = url.to_string();
        let title = title.to_string();
        let created_at = format_datetime(Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                let id: i64 = conn.query_row(
                    r#"INSERT INTO feeds (url, feed_title, site_url, position, created_at)
                       VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(position), 0) + 1 FROM feeds), ?4)
                       ON CONFLICT(url) DO UPDATE SET
                           feed_title = excluded.feed_title,
                           site_url = COALESCE(excluded.site_url, feeds.site_url)
                       RETURNING id"#,
                    params![url, title, site_url, created_at],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    /// Stores the title and site link a feed currently publishes.
    pub async fn update_feed_details(
        &self,
        id: i64,
        title: &str,
        site_url: Option<String>,
    ) -> Result<()> {
        let title = title.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE feeds SET feed_title = ?2, site_url = COALESCE(?3, site_url) WHERE id = ?1",
                    params![id, title, site_url],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::FeedNotFound(id));
        }
        Ok(())
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {} FROM feeds WHERE id = ?1", FEED_COLUMNS),
                        params![id],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM feeds ORDER BY position, id",
                    FEED_COLUMNS
                ))?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed_url(&self, id: i64) -> Result<String> {
        let url = self
            .conn
            .call(move |conn| {
                let url = conn
                    .query_row("SELECT url FROM feeds WHERE id = ?1", params![id], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(url)
            })
            .await?;
        url.ok_or(AppError::FeedNotFound(id))
    }

    pub async fn get_cache_meta(&self, id: i64) -> Result<CacheMeta> {
        let meta = self
            .conn
            .call(move |conn| {
                let meta = conn
                    .query_row(
                        "SELECT etag, last_modified, unchanged_count FROM feeds WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(CacheMeta {
                                validators: Validators {
                                    etag: row.get(0)?,
                                    last_modified: row.get(1)?,
                                },
                                unchanged_count: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(meta)
            })
            .await?;
        meta.ok_or(AppError::FeedNotFound(id))
    }

    /// Writes the outcome of a refresh attempt in a single statement.
    ///
    /// `error_count` follows `last_error`: cleared on success, bumped on
    /// failure.
    pub async fn save_refresh_meta(&self, id: i64, meta: RefreshMeta) -> Result<()> {
        let last_checked_at = format_datetime(meta.last_checked_at);
        let next_refresh_at = format_datetime(meta.next_refresh_at);
        let changed = self
            .conn
            .call(move |conn| {
                let changed = match meta.validators {
                    Some(validators) => conn.execute(
                        r#"UPDATE feeds SET
                               last_checked_at = ?2,
                               last_error = ?3,
                               unchanged_count = ?4,
                               next_refresh_at = ?5,
                               error_count = CASE WHEN ?3 IS NULL THEN 0 ELSE error_count + 1 END,
                               etag = ?6,
                               last_modified = ?7
                           WHERE id = ?1"#,
                        params![
                            id,
                            last_checked_at,
                            meta.last_error,
                            meta.unchanged_count,
                            next_refresh_at,
                            validators.etag,
                            validators.last_modified,
                        ],
                    )?,
                    None => conn.execute(
                        r#"UPDATE feeds SET
                               last_checked_at = ?2,
                               last_error = ?3,
                               unchanged_count = ?4,
                               next_refresh_at = ?5,
                               error_count = CASE WHEN ?3 IS NULL THEN 0 ELSE error_count + 1 END
                           WHERE id = ?1"#,
                        params![
                            id,
                            last_checked_at,
                            meta.last_error,
                            meta.unchanged_count,
                            next_refresh_at,
                        ],
                    )?,
                };
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(AppError::FeedNotFound(id));
        }
        Ok(())
    }

    /// Feeds whose next refresh is due, never-checked feeds first.
    pub async fn list_due_feeds(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<i64>> {
        let now = format_datetime(now);
        let limit = limit as i64;
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id FROM feeds
                       WHERE next_refresh_at IS NULL OR next_refresh_at <= ?1
                       ORDER BY next_refresh_at ASC, id ASC
                       LIMIT ?2"#,
                )?;
                let ids = stmt
                    .query_map(params![now, limit], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    pub async fn set_custom_title(&self, id: i64, title: Option<String>) -> Result<()> {
        let title = title.filter(|t| !t.trim().is_empty());
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE feeds SET custom_title = ?2 WHERE id = ?1",
                    params![id, title],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::FeedNotFound(id));
        }
        Ok(())
    }

    pub async fn set_feed_position(&self, id: i64, position: i64) -> Result<()> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE feeds SET position = ?2 WHERE id = ?1",
                    params![id, position],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::FeedNotFound(id));
        }
        Ok(())
    }

    /// Removes the feed together with its items and tombstones.
    pub async fn delete_feed(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                Ok(deleted > 0)
            })
            .await?;
        Ok(deleted)
    }

    // Item operations

    /// Inserts the items that are neither stored nor tombstoned and returns
    /// how many were new.
    ///
    /// Feeds list newest entries first, so items are inserted in reverse
    /// order and the oldest entry receives the lowest id.
    pub async fn upsert_items(&self, feed_id: i64, items: Vec<NewItem>) -> Result<usize> {
        let created_at = format_datetime(Utc::now());
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                {
                    let mut tombstoned = tx.prepare(
                        "SELECT EXISTS(SELECT 1 FROM tombstones WHERE feed_id = ?1 AND guid = ?2)",
                    )?;
                    let mut insert = tx.prepare(
                        r#"INSERT INTO items (feed_id, guid, title, link, summary, content, published_at, created_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                           ON CONFLICT(feed_id, guid) DO NOTHING"#,
                    )?;

                    for item in items.iter().rev() {
                        let is_tombstoned: bool = tombstoned
                            .query_row(params![feed_id, item.guid], |row| row.get(0))?;
                        if is_tombstoned {
                            continue;
                        }
                        inserted += insert.execute(params![
                            feed_id,
                            item.guid,
                            item.title,
                            item.link,
                            item.summary,
                            item.content,
                            item.published_at.map(format_datetime),
                            created_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await?;
        Ok(inserted)
    }

    /// Keeps the `cap` most recent items of a feed (by published time, else
    /// creation time) and tombstones the rest.
    pub async fn enforce_item_limit(&self, feed_id: i64, cap: usize) -> Result<usize> {
        let cap = cap as i64;
        let deleted_at = format_datetime(Utc::now());
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let doomed = select_doomed(
                    &tx,
                    r#"SELECT id, feed_id, guid FROM items
                       WHERE feed_id = ?1
                       ORDER BY COALESCE(published_at, created_at) DESC, id DESC
                       LIMIT -1 OFFSET ?2"#,
                    params![feed_id, cap],
                )?;
                let removed = bury(&tx, &doomed, &deleted_at)?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    pub async fn delete_item(&self, item_id: i64) -> Result<bool> {
        let deleted_at = format_datetime(Utc::now());
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let doomed = select_doomed(
                    &tx,
                    "SELECT id, feed_id, guid FROM items WHERE id = ?1",
                    params![item_id],
                )?;
                let removed = bury(&tx, &doomed, &deleted_at)?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Deletes every read item of a feed.
    pub async fn sweep_read(&self, feed_id: i64) -> Result<usize> {
        let deleted_at = format_datetime(Utc::now());
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let doomed = select_doomed(
                    &tx,
                    "SELECT id, feed_id, guid FROM items WHERE feed_id = ?1 AND read_at IS NOT NULL",
                    params![feed_id],
                )?;
                let removed = bury(&tx, &doomed, &deleted_at)?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    /// Deletes items, across all feeds, that were read before `read_before`.
    pub async fn cleanup_read(&self, read_before: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_datetime(read_before);
        let deleted_at = format_datetime(Utc::now());
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let doomed = select_doomed(
                    &tx,
                    "SELECT id, feed_id, guid FROM items WHERE read_at IS NOT NULL AND read_at < ?1",
                    params![cutoff],
                )?;
                let removed = bury(&tx, &doomed, &deleted_at)?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    pub async fn prune_tombstones(&self, deleted_before: DateTime<Utc>) -> Result<usize> {
        let cutoff = format_datetime(deleted_before);
        let pruned = self
            .conn
            .call(move |conn| {
                let pruned =
                    conn.execute("DELETE FROM tombstones WHERE deleted_at < ?1", params![cutoff])?;
                Ok(pruned)
            })
            .await?;
        Ok(pruned)
    }

    pub async fn is_tombstoned(&self, feed_id: i64, guid: &str) -> Result<bool> {
        let guid = guid.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM tombstones WHERE feed_id = ?1 AND guid = ?2)",
                    params![feed_id, guid],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await?;
        Ok(exists)
    }

    pub async fn get_items(&self, feed_id: Option<i64>, filter: ItemFilter) -> Result<Vec<Item>> {
        let read_clause = match filter {
            ItemFilter::All => "",
            ItemFilter::Unread => " AND read_at IS NULL",
            ItemFilter::Read => " AND read_at IS NOT NULL",
        };
        let sql = format!(
            r#"SELECT {} FROM items
               WHERE (?1 IS NULL OR feed_id = ?1){}
               ORDER BY COALESCE(published_at, created_at) DESC, id DESC"#,
            ITEM_COLUMNS, read_clause
        );
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let items = stmt
                    .query_map(params![feed_id], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn count_items(&self, feed_id: i64) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM items WHERE feed_id = ?1",
                    params![feed_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    pub async fn mark_item_read(&self, id: i64, is_read: bool) -> Result<()> {
        let read_at = is_read.then(|| format_datetime(Utc::now()));
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE items SET read_at = ?2 WHERE id = ?1",
                    params![id, read_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn select_doomed(
    tx: &Transaction,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Doomed>> {
    let mut stmt = tx.prepare(sql)?;
    let rows: rusqlite::Result<Vec<Doomed>> = stmt
        .query_map(params, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect();
    rows
}

/// Tombstones then deletes each row, inside the caller's transaction.
fn bury(tx: &Transaction, doomed: &[Doomed], deleted_at: &str) -> rusqlite::Result<usize> {
    let mut tombstone = tx.prepare(
        r#"INSERT INTO tombstones (feed_id, guid, deleted_at) VALUES (?1, ?2, ?3)
           ON CONFLICT(feed_id, guid) DO UPDATE SET deleted_at = excluded.deleted_at"#,
    )?;
    let mut delete = tx.prepare("DELETE FROM items WHERE id = ?1")?;

    let mut removed = 0;
    for (item_id, feed_id, guid) in doomed {
        tombstone.execute(params![feed_id, guid, deleted_at])?;
        removed += delete.execute(params![item_id])?;
    }
    Ok(removed)
}

/// Fixed-width UTC so that text comparison in SQL is chronological.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.000Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn optional_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        feed_title: row.get(2)?,
        custom_title: row.get(3)?,
        site_url: row.get(4)?,
        position: row.get(5)?,
        etag: row.get(6)?,
        last_modified: row.get(7)?,
        last_checked_at: optional_datetime(row, 8)?,
        last_error: row.get(9)?,
        error_count: row.get(10)?,
        unchanged_count: row.get(11)?,
        next_refresh_at: optional_datetime(row, 12)?,
        created_at: optional_datetime(row, 13)?.unwrap_or_else(Utc::now),
    })
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        guid: row.get(2)?,
        title: row.get(3)?,
        link: row.get(4)?,
        summary: row.get(5)?,
        content: row.get(6)?,
        published_at: optional_datetime(row, 7)?,
        read_at: optional_datetime(row, 8)?,
        created_at: optional_datetime(row, 9)?.unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    async fn repo_with_feed() -> (Repository, i64) {
        let repo = Repository::open_in_memory().await.unwrap();
        let feed_id = repo
            .upsert_feed("https://example.com/feed.xml", "Example", None)
            .await
            .unwrap();
        (repo, feed_id)
    }

    fn item(guid: &str, published_at: Option<DateTime<Utc>>) -> NewItem {
        NewItem {
            guid: guid.to_string(),
            title: format!("Item {}", guid),
            link: format!("https://example.com/{}", guid),
            summary: Some("<p>summary</p>".to_string()),
            content: None,
            published_at,
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_feed_is_unique_per_url() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.set_custom_title(feed_id, Some("Mine".into()))
            .await
            .unwrap();

        let again = repo
            .upsert_feed("https://example.com/feed.xml", "Renamed", None)
            .await
            .unwrap();
        assert_eq!(again, feed_id);

        let feeds = repo.get_all_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].feed_title, "Renamed");
        assert_eq!(feeds[0].display_title(), "Mine");
    }

    #[tokio::test]
    async fn test_update_feed_details_by_id() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.update_feed_details(feed_id, "Retitled", Some("https://example.com/".into()))
            .await
            .unwrap();
        repo.update_feed_details(feed_id, "Retitled again", None)
            .await
            .unwrap();

        let feed = repo.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.feed_title, "Retitled again");
        assert_eq!(feed.site_url.as_deref(), Some("https://example.com/"));
        assert!(matches!(
            repo.update_feed_details(99, "Gone", None).await,
            Err(AppError::FeedNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_new_feeds_append_to_position() {
        let (repo, first) = repo_with_feed().await;
        let second = repo
            .upsert_feed("https://example.org/rss", "Other", None)
            .await
            .unwrap();
        repo.set_feed_position(first, 10).await.unwrap();

        let feeds = repo.get_all_feeds().await.unwrap();
        let ids: Vec<i64> = feeds.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn test_missing_feed_lookups() {
        let repo = Repository::open_in_memory().await.unwrap();
        assert!(matches!(
            repo.get_feed_url(42).await,
            Err(AppError::FeedNotFound(42))
        ));
        assert!(matches!(
            repo.get_cache_meta(42).await,
            Err(AppError::FeedNotFound(42))
        ));
        assert!(repo.get_feed(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_items_is_idempotent() {
        let (repo, feed_id) = repo_with_feed().await;
        let items = vec![item("a", None), item("b", None)];

        assert_eq!(repo.upsert_items(feed_id, items.clone()).await.unwrap(), 2);
        assert_eq!(repo.upsert_items(feed_id, items).await.unwrap(), 0);
        assert_eq!(repo.count_items(feed_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_oldest_entry_gets_lowest_id() {
        let (repo, feed_id) = repo_with_feed().await;
        // Newest first, as feeds publish them.
        let items = vec![item("newest", None), item("oldest", None)];
        repo.upsert_items(feed_id, items).await.unwrap();

        let stored = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();
        let oldest = stored.iter().find(|i| i.guid == "oldest").unwrap();
        let newest = stored.iter().find(|i| i.guid == "newest").unwrap();
        assert!(oldest.id < newest.id);
    }

    #[tokio::test]
    async fn test_deleted_item_is_never_resurrected() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.upsert_items(feed_id, vec![item("gone", None)])
            .await
            .unwrap();
        let stored = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();

        assert!(repo.delete_item(stored[0].id).await.unwrap());
        assert!(repo.is_tombstoned(feed_id, "gone").await.unwrap());

        for _ in 0..3 {
            let inserted = repo
                .upsert_items(feed_id, vec![item("gone", None)])
                .await
                .unwrap();
            assert_eq!(inserted, 0);
        }
        assert_eq!(repo.count_items(feed_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enforce_item_limit_keeps_most_recent() {
        let (repo, feed_id) = repo_with_feed().await;
        let items: Vec<NewItem> = (0..210)
            .map(|i| item(&format!("item-{}", i), Some(base_time() + Duration::minutes(i))))
            .collect();
        assert_eq!(repo.upsert_items(feed_id, items).await.unwrap(), 210);

        let removed = repo.enforce_item_limit(feed_id, 200).await.unwrap();
        assert_eq!(removed, 10);
        assert_eq!(repo.count_items(feed_id).await.unwrap(), 200);

        let remaining = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();
        for i in 0..10 {
            let guid = format!("item-{}", i);
            assert!(repo.is_tombstoned(feed_id, &guid).await.unwrap());
            assert!(remaining.iter().all(|item| item.guid != guid));
        }
        assert!(!repo.is_tombstoned(feed_id, "item-10").await.unwrap());

        assert_eq!(repo.enforce_item_limit(feed_id, 200).await.unwrap(), 0);
        assert_eq!(repo.count_items(feed_id).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_item_limit_falls_back_to_created_at() {
        let (repo, feed_id) = repo_with_feed().await;
        // An old published date loses against an undated item created now.
        repo.upsert_items(feed_id, vec![item("dated", Some(base_time()))])
            .await
            .unwrap();
        repo.upsert_items(feed_id, vec![item("undated", None)])
            .await
            .unwrap();

        assert_eq!(repo.enforce_item_limit(feed_id, 1).await.unwrap(), 1);
        assert!(repo.is_tombstoned(feed_id, "dated").await.unwrap());
        assert!(!repo.is_tombstoned(feed_id, "undated").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_read_only_removes_read_items() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.upsert_items(feed_id, vec![item("read", None), item("unread", None)])
            .await
            .unwrap();
        let stored = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();
        let read = stored.iter().find(|i| i.guid == "read").unwrap();
        repo.mark_item_read(read.id, true).await.unwrap();

        assert_eq!(repo.sweep_read(feed_id).await.unwrap(), 1);

        let left = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].guid, "unread");
        assert!(!left[0].is_read());
        assert!(repo.is_tombstoned(feed_id, "read").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_read_respects_retention() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.upsert_items(feed_id, vec![item("a", None)])
            .await
            .unwrap();
        let stored = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();
        repo.mark_item_read(stored[0].id, true).await.unwrap();

        let an_hour_ago = Utc::now() - Duration::hours(1);
        assert_eq!(repo.cleanup_read(an_hour_ago).await.unwrap(), 0);

        let later = Utc::now() + Duration::seconds(1);
        assert_eq!(repo.cleanup_read(later).await.unwrap(), 1);
        assert!(repo.is_tombstoned(feed_id, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_tombstones() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.upsert_items(feed_id, vec![item("a", None)])
            .await
            .unwrap();
        let stored = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();
        repo.delete_item(stored[0].id).await.unwrap();

        let month_ago = Utc::now() - Duration::days(30);
        assert_eq!(repo.prune_tombstones(month_ago).await.unwrap(), 0);

        let later = Utc::now() + Duration::seconds(1);
        assert_eq!(repo.prune_tombstones(later).await.unwrap(), 1);
        assert!(!repo.is_tombstoned(feed_id, "a").await.unwrap());

        // With the tombstone gone the item can come back.
        assert_eq!(
            repo.upsert_items(feed_id, vec![item("a", None)])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_item_filters() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.upsert_items(feed_id, vec![item("a", None), item("b", None)])
            .await
            .unwrap();
        let stored = repo.get_items(None, ItemFilter::All).await.unwrap();
        repo.mark_item_read(stored[0].id, true).await.unwrap();

        assert_eq!(repo.get_items(None, ItemFilter::Read).await.unwrap().len(), 1);
        assert_eq!(repo.get_items(None, ItemFilter::Unread).await.unwrap().len(), 1);

        repo.mark_item_read(stored[0].id, false).await.unwrap();
        assert_eq!(repo.get_items(None, ItemFilter::Unread).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_refresh_meta_round_trip() {
        let (repo, feed_id) = repo_with_feed().await;
        let checked = base_time();
        let next = checked + Duration::minutes(40);

        repo.save_refresh_meta(
            feed_id,
            RefreshMeta {
                last_checked_at: checked,
                last_error: Some("boom".into()),
                unchanged_count: 0,
                next_refresh_at: next,
                validators: None,
            },
        )
        .await
        .unwrap();

        let feed = repo.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.last_checked_at, Some(checked));
        assert_eq!(feed.next_refresh_at, Some(next));
        assert_eq!(feed.last_error.as_deref(), Some("boom"));
        assert_eq!(feed.error_count, 1);

        repo.save_refresh_meta(
            feed_id,
            RefreshMeta {
                last_checked_at: checked,
                last_error: None,
                unchanged_count: 3,
                next_refresh_at: next,
                validators: Some(Validators {
                    etag: Some("\"e\"".into()),
                    last_modified: None,
                }),
            },
        )
        .await
        .unwrap();

        let meta = repo.get_cache_meta(feed_id).await.unwrap();
        assert_eq!(meta.unchanged_count, 3);
        assert_eq!(meta.validators.etag.as_deref(), Some("\"e\""));
        let feed = repo.get_feed(feed_id).await.unwrap().unwrap();
        assert_eq!(feed.error_count, 0);
        assert!(feed.last_error.is_none());
    }

    async fn schedule(repo: &Repository, id: i64, checked: DateTime<Utc>, next: DateTime<Utc>) {
        repo.save_refresh_meta(
            id,
            RefreshMeta {
                last_checked_at: checked,
                last_error: None,
                unchanged_count: 0,
                next_refresh_at: next,
                validators: None,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_list_due_feeds_orders_never_checked_first() {
        let repo = Repository::open_in_memory().await.unwrap();
        let now = base_time();
        let mut ids = Vec::new();
        for n in 0..4 {
            ids.push(
                repo.upsert_feed(&format!("https://example.com/{}", n), "f", None)
                    .await
                    .unwrap(),
            );
        }
        schedule(&repo, ids[0], now, now - Duration::minutes(5)).await;
        schedule(&repo, ids[1], now, now - Duration::minutes(10)).await;
        schedule(&repo, ids[2], now, now + Duration::minutes(10)).await;
        // ids[3] was never checked.

        let due = repo.list_due_feeds(now, 10).await.unwrap();
        assert_eq!(due, vec![ids[3], ids[1], ids[0]]);

        let limited = repo.list_due_feeds(now, 2).await.unwrap();
        assert_eq!(limited, vec![ids[3], ids[1]]);
    }

    #[tokio::test]
    async fn test_delete_feed_cascades() {
        let (repo, feed_id) = repo_with_feed().await;
        repo.upsert_items(feed_id, vec![item("a", None), item("b", None)])
            .await
            .unwrap();
        let stored = repo.get_items(Some(feed_id), ItemFilter::All).await.unwrap();
        repo.delete_item(stored[0].id).await.unwrap();

        assert!(repo.delete_feed(feed_id).await.unwrap());
        assert_eq!(repo.count_items(feed_id).await.unwrap(), 0);
        assert!(!repo.is_tombstoned(feed_id, &stored[0].guid).await.unwrap());
        assert!(!repo.delete_feed(feed_id).await.unwrap());
    }
}
