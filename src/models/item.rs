use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::{derive_guid, ParsedEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewItem {
    /// Builds a storable item from the `index`-th entry of a fetched feed.
    pub fn from_entry(feed_id: i64, index: usize, entry: &ParsedEntry) -> Self {
        Self {
            guid: derive_guid(feed_id, index, entry),
            title: entry
                .title
                .clone()
                .unwrap_or_else(|| "Untitled".to_string()),
            link: entry.link.clone().unwrap_or_default(),
            summary: entry.summary.clone(),
            content: entry.content.clone(),
            published_at: entry.published.or(entry.updated),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemFilter {
    All,
    #[default]
    Unread,
    Read,
}
