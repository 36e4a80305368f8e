use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("feed URL is empty")]
    EmptyUrl,

    #[error("invalid feed URL: {0}")]
    InvalidUrl(String),

    #[error("failed to fetch feed: {0}")]
    FetchTransport(#[source] reqwest::Error),

    #[error("unexpected HTTP status {code}")]
    UnexpectedStatus { code: u16 },

    #[error("failed to parse feed: {0}")]
    FetchParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("feed returned no content")]
    FeedReturnedNoContent,

    #[error("feed {0} not found")]
    FeedNotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Errors that come from talking to the feed's server. These are
    /// recorded on the feed and retried on the next scheduled refresh.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::FetchTransport(_)
                | AppError::UnexpectedStatus { .. }
                | AppError::FetchParse(_)
                | AppError::FeedReturnedNoContent
        )
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_status_display() {
        let err = AppError::UnexpectedStatus { code: 503 };
        assert_eq!(err.to_string(), "unexpected HTTP status 503");
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::UnexpectedStatus { code: 500 }.is_transient());
        assert!(AppError::FeedReturnedNoContent.is_transient());
        assert!(!AppError::EmptyUrl.is_transient());
        assert!(!AppError::FeedNotFound(3).is_transient());
    }
}
