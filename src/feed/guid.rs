use chrono::SecondsFormat;

use super::document::ParsedEntry;

type GuidCandidate = fn(&ParsedEntry) -> Option<String>;

/// Tried in order; the first non-empty value wins.
const GUID_CANDIDATES: [GuidCandidate; 4] = [by_id, by_link, by_title, by_published];

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn by_id(entry: &ParsedEntry) -> Option<String> {
    trimmed(entry.id.as_ref())
}

fn by_link(entry: &ParsedEntry) -> Option<String> {
    trimmed(entry.link.as_ref())
}

fn by_title(entry: &ParsedEntry) -> Option<String> {
    trimmed(entry.title.as_ref())
}

fn by_published(entry: &ParsedEntry) -> Option<String> {
    entry
        .published
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Derives the identity of an entry within its feed.
///
/// Must yield the same value every time the same logical entry is
/// fetched; the synthetic `feed/index` fallback is only stable as long as
/// the entry keeps its position.
pub fn derive_guid(feed_id: i64, index: usize, entry: &ParsedEntry) -> String {
    GUID_CANDIDATES
        .iter()
        .find_map(|candidate| candidate(entry))
        .unwrap_or_else(|| format!("{}/{}", feed_id, index))
}
