//! The execution engine: resolve, merge, negotiate, dispatch with bounded
//! retry, wrap.
//!
//! A dispatch moves through *Built → Dispatching → (Succeeded | Retrying →
//! Dispatching | Exhausted)*. Any received HTTP response, 4xx and 5xx
//! included, is *Succeeded*; only failures below the HTTP layer consume
//! retry attempts, and *Exhausted* surfaces the last of them as
//! [`Error::RequestExecution`].

use std::thread::sleep;

use cookie::Cookie;
use http::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use http::{Method, Uri};
use tracing::debug;

use crate::body::negotiate;
use crate::client::Client;
use crate::error::Error;
use crate::jar::render_cookie_header;
use crate::observe::{RequestRecord, ResponseRecord};
use crate::request::{RequestBuilder, RequestParts};
use crate::response::Response;
use crate::transport::WireRequest;
use crate::util::{
    append_query, encode_params, merge_headers, merge_params, parse_header_value, resolve_url,
    truncate_body,
};

impl Client {
    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path.into())
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn head(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::HEAD, path)
    }

    pub fn options(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::OPTIONS, path)
    }

    /// Reports the error to the observer alongside the failing operation,
    /// then hands it back untouched.
    fn report<T>(&self, operation: &'static str, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(error) = &result {
            self.observer.on_error(operation, error);
        }
        result
    }

    pub(crate) fn dispatch(&self, parts: RequestParts) -> crate::Result<Response> {
        let _permit = self.gate.as_ref().map(|gate| gate.acquire());
        let defaults = self.defaults_snapshot();

        // Assembly: any failure here returns before network I/O and is
        // never retried.
        let mut url = self.report(
            "url_resolution",
            resolve_url(self.base_url(), &parts.path),
        )?;
        let merged_query = merge_params(&defaults.query, &parts.query);
        append_query(&mut url, &encode_params(&merged_query));

        let mut headers = merge_headers(&defaults.headers, &parts.headers);
        let merged_form = merge_params(&defaults.form, &parts.form);
        let explicit = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let encoded = self.report(
            "content_negotiation",
            negotiate(
                parts.body.as_ref(),
                &merged_form,
                explicit.as_deref(),
                self.codec.as_ref(),
            ),
        )?;
        // Negotiation owns the content type: the form path forces it to
        // form-urlencoded even when the request declared something else.
        if let Some(encoded) = &encoded {
            let value = self.report(
                "content_negotiation",
                parse_header_value(CONTENT_TYPE.as_str(), encoded.content_type()),
            )?;
            headers.insert(CONTENT_TYPE, value);
        }

        // Cookies are bound to the resolved URL: scoping is host-dependent.
        let mut cookies: Vec<Cookie<'static>> = defaults.cookies;
        cookies.extend(parts.cookies);
        let attached = match &self.cookie_store {
            Some(store) => {
                if !cookies.is_empty() {
                    store.store(&url, &cookies);
                }
                store.cookies_for(&url)
            }
            None => cookies,
        };
        let cookie_line = render_cookie_header(&attached);
        if !cookie_line.is_empty() {
            let value = self.report(
                "request_assembly",
                parse_header_value(COOKIE.as_str(), &cookie_line),
            )?;
            headers.insert(COOKIE, value);
        }

        let uri = self.report(
            "request_assembly",
            url.as_str().parse::<Uri>().map_err(|source| Error::MalformedUrl {
                target: url.to_string(),
                source: Box::new(source),
            }),
        )?;

        // Stage the encoded body once; the same buffer backs every attempt
        // and returns to the pool when the dispatch ends, whichever way.
        let mut staged = self.pool.checkout();
        if let Some(encoded) = &encoded {
            staged.extend_from_slice(encoded.bytes());
        }
        let body_slice: Option<&[u8]> = encoded.as_ref().map(|_| staged.as_slice());

        let body_text = encoded
            .as_ref()
            .map(|encoded| truncate_body(encoded.bytes()))
            .unwrap_or_default();
        self.observer.on_request_dispatched(&RequestRecord {
            method: &parts.method,
            host: url.host_str().unwrap_or(""),
            path: url.path(),
            headers: &headers,
            cookies: &cookie_line,
            body: &body_text,
        });

        let retry_policy = parts
            .options
            .retry_policy
            .as_ref()
            .unwrap_or(self.base_retry_policy());
        let timeout = parts.options.timeout.unwrap_or(self.timeout());
        let max_attempts = retry_policy.max_attempts();

        let mut attempt = 1_u32;
        let wire = loop {
            let exchange = self.transport.roundtrip(WireRequest {
                method: &parts.method,
                uri: &uri,
                headers: &headers,
                body: body_slice,
                timeout,
            });
            match exchange {
                Ok(wire) => break wire,
                Err(failure) if attempt < max_attempts => {
                    let backoff = retry_policy.backoff_for_retry(attempt);
                    debug!(
                        attempt,
                        max_attempts,
                        kind = %failure.kind,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %failure.source,
                        "transport failure, retrying"
                    );
                    if !backoff.is_zero() {
                        sleep(backoff);
                    }
                    attempt += 1;
                }
                Err(failure) => {
                    return self.report(
                        "dispatch",
                        Err(Error::RequestExecution {
                            kind: failure.kind,
                            method: parts.method.clone(),
                            uri: url.to_string(),
                            attempts: attempt,
                            source: failure.source,
                        }),
                    );
                }
            }
        };

        if let Some(store) = &self.cookie_store {
            let set_cookies: Vec<Cookie<'static>> = wire
                .headers
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .filter_map(|value| Cookie::parse(value.to_owned()).ok())
                .collect();
            if !set_cookies.is_empty() {
                store.store(&url, &set_cookies);
            }
        }

        let response = Response::new(
            wire.status,
            wire.headers,
            wire.body,
            self.transform.clone(),
            self.observer.clone(),
        );
        let body_view = if self.observer.wants_response_body() {
            response.bytes().ok().map(|bytes| truncate_body(&bytes))
        } else {
            None
        };
        self.observer.on_exchange_completed(&ResponseRecord {
            status_code: response.status().as_u16(),
            status: response.status_text(),
            headers: response.headers(),
            body: body_view.as_deref(),
        });

        Ok(response)
    }
}
