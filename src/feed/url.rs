use url::Url;

use crate::error::{AppError, Result};

/// Canonicalizes a user-supplied feed address.
///
/// Input without a `scheme://` prefix is assumed to be HTTPS.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::EmptyUrl);
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| AppError::InvalidUrl(format!("{}: {}", trimmed, e)))?;

    if parsed.scheme().is_empty() {
        return Err(AppError::InvalidUrl(format!("{}: missing scheme", trimmed)));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(AppError::InvalidUrl(format!("{}: missing host", trimmed))),
    }

    Ok(parsed.to_string())
}
