use std::future::Future;
use std::time::Duration;

use feed_rs::parser;
use reqwest::header::{
    HeaderMap, HeaderName, ACCEPT, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
};
use reqwest::{Client, StatusCode};

use crate::config::RefreshConfig;
use crate::error::{AppError, Result};
use crate::models::Validators;

use super::document::FeedDocument;

const ACCEPT_FEEDS: &str = "application/rss+xml, application/atom+xml, application/rdf+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";

#[derive(Debug)]
pub enum FetchOutcome {
    /// The server answered 304; `validators` holds whatever it echoed back.
    NotModified { validators: Validators },
    /// A 2xx body. `document` is `None` when the body was empty.
    Fetched {
        document: Option<FeedDocument>,
        validators: Validators,
    },
}

/// Anything that can perform a conditional feed fetch.
pub trait FeedSource: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        validators: &Validators,
    ) -> impl Future<Output = Result<FetchOutcome>> + Send;
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(config: &RefreshConfig) -> Result<Self> {
        Self::with_timeout(config.request_timeout(), &config.user_agent)
    }

    pub fn with_timeout(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(user_agent)
            .build()
            .map_err(|e| AppError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str, validators: &Validators) -> Result<FetchOutcome> {
        let mut request = self.client.get(url).header(ACCEPT, ACCEPT_FEEDS);

        if let Some(etag) = non_blank(validators.etag.as_deref()) {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(modified) = non_blank(validators.last_modified.as_deref()) {
            request = request.header(IF_MODIFIED_SINCE, modified);
        }

        let response = request.send().await.map_err(AppError::FetchTransport)?;
        let status = response.status();
        let echoed = response_validators(response.headers());

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("{} not modified", url);
            return Ok(FetchOutcome::NotModified { validators: echoed });
        }

        if !status.is_success() {
            return Err(AppError::UnexpectedStatus {
                code: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(AppError::FetchTransport)?;
        let document = parse_document(&bytes)?;

        Ok(FetchOutcome::Fetched {
            document,
            validators: echoed,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn response_validators(headers: &HeaderMap) -> Validators {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Validators {
        etag: header(ETAG),
        last_modified: header(LAST_MODIFIED),
    }
}

/// Parses an RSS/Atom body. An empty body is not an error here; the
/// caller decides what a feed without content means.
///
/// Entries without an id of their own are left with an empty one so that
/// `derive_guid` picks their identity instead of a content hash.
pub(crate) fn parse_document(bytes: &[u8]) -> Result<Option<FeedDocument>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)?;
    Ok(Some(FeedDocument::from(feed)))
}
