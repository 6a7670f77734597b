use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};
use tracing::warn;
use url::Url;

use crate::error::Error;

const MAX_LOG_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Joins a base URL (stored trimmed of trailing slashes) and a request path
/// into one absolute URL.
///
/// Both empty is an error before any I/O; a non-empty path gains a leading
/// slash if it lacks one, so `resolve_url("https://h", "users")` targets
/// `https://h/users`.
pub(crate) fn resolve_url(base_url: &str, path: &str) -> Result<Url, Error> {
    if base_url.is_empty() && path.is_empty() {
        return Err(Error::EmptyTarget);
    }
    let mut target = String::with_capacity(base_url.len() + path.len() + 1);
    target.push_str(base_url);
    if !path.is_empty() && !path.starts_with('/') {
        target.push('/');
    }
    target.push_str(path);
    Url::parse(&target).map_err(|source| Error::MalformedUrl {
        target,
        source: Box::new(source),
    })
}

/// Merges override pairs on top of defaults; overrides win on key collision.
pub(crate) fn merge_params(
    defaults: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Percent-encodes a parameter mapping as `key=value&key=value`.
///
/// Iteration order is the map's key order, which for `BTreeMap` is
/// alphabetical; encoding the same mapping twice yields identical bytes.
pub(crate) fn encode_params(params: &BTreeMap<String, String>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Appends an encoded query string to the URL, keeping any query already
/// present and separating with `&`.
pub(crate) fn append_query(url: &mut Url, encoded: &str) {
    if encoded.is_empty() {
        return;
    }
    let merged = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
        _ => encoded.to_owned(),
    };
    url.set_query(Some(&merged));
}

/// Parses an already-encoded query string into decoded pairs. A pair with
/// no name is malformed; it logs and is skipped, never failing the call.
pub(crate) fn parse_query_string(query: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for piece in query.trim_start_matches('?').split('&') {
        if piece.is_empty() {
            continue;
        }
        match url::form_urlencoded::parse(piece.as_bytes()).next() {
            Some((key, value)) if !key.is_empty() => {
                pairs.push((key.into_owned(), value.into_owned()));
            }
            _ => warn!(pair = piece, "skipping query pair with no name"),
        }
    }
    pairs
}

/// Request headers displace same-named defaults wholesale; repeated request
/// values for one name all survive.
pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for name in request_headers.keys() {
        merged.remove(name);
    }
    for (name, value) in request_headers {
        merged.append(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Lossy text rendering of a body for debug records, bounded so one large
/// payload cannot flood the sink.
pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_LOG_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_LOG_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
