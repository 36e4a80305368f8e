use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub feed_title: String,
    pub custom_title: Option<String>,
    pub site_url: Option<String>,
    pub position: i64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: i64,
    pub unchanged_count: i64,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// The user's override if set, else the title the feed publishes,
    /// else the URL.
    pub fn display_title(&self) -> &str {
        self.custom_title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(Some(self.feed_title.as_str()).filter(|t| !t.trim().is_empty()))
            .unwrap_or(self.url.as_str())
    }
}

/// HTTP cache validators from a previous response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// What a refresh needs to know about the feed before fetching.
#[derive(Debug, Clone, Default)]
pub struct CacheMeta {
    pub validators: Validators,
    pub unchanged_count: i64,
}

/// Scheduling metadata written at the end of every refresh attempt.
#[derive(Debug, Clone)]
pub struct RefreshMeta {
    pub last_checked_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub unchanged_count: i64,
    pub next_refresh_at: DateTime<Utc>,
    /// `None` leaves the stored validators untouched.
    pub validators: Option<Validators>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed() -> Feed {
        Feed {
            id: 1,
            url: "https://example.com/feed.xml".into(),
            feed_title: String::new(),
            custom_title: None,
            site_url: None,
            position: 1,
            etag: None,
            last_modified: None,
            last_checked_at: None,
            last_error: None,
            error_count: 0,
            unchanged_count: 0,
            next_refresh_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_display_title_prefers_override() {
        let mut f = feed();
        f.feed_title = "Upstream".into();
        f.custom_title = Some("Mine".into());
        assert_eq!(f.display_title(), "Mine");
    }

    #[test]
    fn test_display_title_falls_back_to_url() {
        let mut f = feed();
        assert_eq!(f.display_title(), "https://example.com/feed.xml");
        f.feed_title = "Upstream".into();
        assert_eq!(f.display_title(), "Upstream");
    }
}
