mod document;
mod fetcher;
mod guid;
mod url;

pub use document::{FeedDocument, ParsedEntry};
pub use fetcher::{FeedFetcher, FeedSource, FetchOutcome};
pub use guid::derive_guid;
pub use self::url::normalize_url;
