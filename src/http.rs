//! Shared HTTP plumbing for the record sources.
//!
//! Both backends are plain JSON-over-GET. Status handling mirrors what the
//! Google API client does: 401 means the token is gone, any other non-2xx is
//! an `Api` error carrying the response body.

use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use crate::error::WatchError;

/// Longest response body kept in an `Api` error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Build a reqwest client with a request-level timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, WatchError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("crmwatch/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Join `path` onto `base`, treating `base` as a directory even when it
/// lacks a trailing slash.
///
/// `http://host/api` + `opportunities/` → `http://host/api/opportunities/`
pub fn join_url(base: &str, path: &str) -> Result<Url, WatchError> {
    let mut base = base.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base)?;
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Send a prepared GET and decode the JSON body.
pub async fn get_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, WatchError> {
    let resp = request.send().await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(WatchError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(WatchError::Api {
            status: status.as_u16(),
            message: truncate(&body, MAX_ERROR_BODY_CHARS),
        });
    }

    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Decode each element on its own. Elements that do not match `T` are
/// logged and skipped so one bad record cannot sink the whole listing.
pub fn decode_records<T: DeserializeOwned>(values: Vec<serde_json::Value>, kind: &str) -> Vec<T> {
    let total = values.len();
    let records: Vec<T> = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                log::debug!("Skipping malformed {} at index {}: {}", kind, index, e);
                None
            }
        })
        .collect();

    if records.len() < total {
        log::warn!("{}: {} of {} records malformed, skipped", kind, total - records.len(), total);
    }
    records
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
