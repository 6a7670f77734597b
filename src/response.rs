//! Wrapped exchange result with a lazily read, cached body.

use std::io::Read;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use cookie::Cookie;
use http::header::{CONTENT_TYPE, SET_COOKIE};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::client::TransformFn;
use crate::error::Error;
use crate::observe::DebugObserver;
use crate::transport::WireBody;
use crate::util::{lock_unpoisoned, truncate_body};

enum BodyState {
    Pending(WireBody),
    Cached(Bytes),
    Failed(String),
}

/// The result of an exchange: status, headers, and a body that is read from
/// the underlying stream at most once.
///
/// The first byte/text accessor drains and releases the stream and caches
/// the result (after the client's result transform, when one is installed);
/// every later accessor, typed views included, serves the cached bytes with
/// no further I/O.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    state: Mutex<BodyState>,
    transform: Option<TransformFn>,
    observer: Arc<dyn DebugObserver>,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: WireBody,
        transform: Option<TransformFn>,
        observer: Arc<dyn DebugObserver>,
    ) -> Self {
        Self {
            status,
            headers,
            state: Mutex::new(BodyState::Pending(body)),
            transform,
            observer,
        }
    }

    /// Late failures (stream reads, typed decodes) go through the same
    /// observer channel as assembly and dispatch errors.
    fn report<T>(&self, operation: &'static str, result: crate::Result<T>) -> crate::Result<T> {
        if let Err(error) = &result {
            self.observer.on_error(operation, error);
        }
        result
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the status code is exactly 200. Callers wanting the full 2xx
    /// range must inspect [`status`](Self::status) directly.
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// Cookies set by the server, parsed from `Set-Cookie` headers.
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| Cookie::parse(value.to_owned()).ok())
            .collect()
    }

    /// The body bytes, read from the stream on first call and cached.
    pub fn bytes(&self) -> crate::Result<Bytes> {
        let mut state = lock_unpoisoned(&self.state);
        let result = match &mut *state {
            BodyState::Cached(bytes) => Ok(bytes.clone()),
            BodyState::Failed(message) => Err(Error::ReadBody {
                source: message.clone().into(),
            }),
            BodyState::Pending(_) => {
                let BodyState::Pending(body) =
                    std::mem::replace(&mut *state, BodyState::Failed(String::new()))
                else {
                    unreachable!("state was just matched as pending");
                };
                match drain(body) {
                    Ok(raw) => {
                        let cached = self.apply_transform(Bytes::from(raw));
                        *state = BodyState::Cached(cached.clone());
                        Ok(cached)
                    }
                    Err(source) => {
                        *state = BodyState::Failed(source.to_string());
                        Err(Error::ReadBody {
                            source: Box::new(source),
                        })
                    }
                }
            }
        };
        self.report("read_body", result)
    }

    /// The body as text, lossily decoded from the cached bytes.
    pub fn text(&self) -> crate::Result<String> {
        Ok(String::from_utf8_lossy(&self.bytes()?).into_owned())
    }

    /// Decodes the cached body into a typed value.
    pub fn json<T>(&self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let bytes = self.bytes()?;
        let result = serde_json::from_slice(&bytes).map_err(|source| Error::Decode {
            source: source.into(),
            body: truncate_body(&bytes),
        });
        self.report("decode", result)
    }

    /// Parsed-document view of the cached body.
    pub fn json_value(&self) -> crate::Result<Value> {
        self.json()
    }

    fn apply_transform(&self, raw: Bytes) -> Bytes {
        let Some(transform) = &self.transform else {
            return raw;
        };
        let Ok(text) = std::str::from_utf8(&raw) else {
            warn!("result transform skipped: response body is not utf-8");
            return raw;
        };
        match transform(text) {
            Ok(transformed) if !transformed.is_empty() => Bytes::from(transformed),
            Ok(_) => {
                warn!("result transform returned an empty body; keeping the raw body");
                raw
            }
            Err(error) => {
                warn!(error = %error, "result transform failed; keeping the raw body");
                raw
            }
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &*lock_unpoisoned(&self.state) {
            BodyState::Pending(_) => "<unread>",
            BodyState::Cached(_) => "<cached>",
            BodyState::Failed(_) => "<failed>",
        };
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}

fn drain(body: WireBody) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    match body {
        WireBody::Ureq(mut body) => {
            body.as_reader().read_to_end(&mut buffer)?;
        }
        WireBody::Reader(mut reader) => {
            reader.read_to_end(&mut buffer)?;
        }
        WireBody::Empty => {}
    }
    Ok(buffer)
}
