use chrono::{DateTime, Utc};

/// A fetched feed reduced to what the refresh engine stores.
#[derive(Debug, Clone, Default)]
pub struct FeedDocument {
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

fn non_blank(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

impl From<feed_rs::model::Feed> for FeedDocument {
    fn from(feed: feed_rs::model::Feed) -> Self {
        let title = feed.title.map(|t| t.content).and_then(non_blank);
        let site_url = feed.links.first().map(|l| l.href.clone());
        let entries = feed.entries.into_iter().map(ParsedEntry::from).collect();

        Self {
            title,
            site_url,
            entries,
        }
    }
}

impl From<feed_rs::model::Entry> for ParsedEntry {
    fn from(entry: feed_rs::model::Entry) -> Self {
        Self {
            id: non_blank(entry.id),
            title: entry.title.map(|t| t.content).and_then(non_blank),
            link: entry.links.first().map(|l| l.href.clone()).and_then(non_blank),
            summary: entry.summary.map(|s| s.content),
            content: entry.content.and_then(|c| c.body),
            published: entry.published,
            updated: entry.updated,
        }
    }
}
