use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use cookie::Cookie;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::body::{self, Body};
use crate::client::{Client, encode_basic_credentials};
use crate::error::Error;
use crate::response::Response;
use crate::retry::RetryPolicy;
use crate::util::{parse_header_name, parse_header_value, parse_query_string};

/// Per-request overrides of the client's execution settings.
pub(crate) struct ExecutionOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry_policy: Option<RetryPolicy>,
}

/// Everything the engine needs for one dispatch, detached from the builder.
pub(crate) struct RequestParts {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) query: BTreeMap<String, String>,
    pub(crate) form: BTreeMap<String, String>,
    pub(crate) cookies: Vec<Cookie<'static>>,
    pub(crate) body: Option<Body>,
    pub(crate) options: ExecutionOptions,
}

/// Fluent per-call request state, seeded from a [`Client`].
///
/// Built fresh for each logical call and consumed by [`send`](Self::send);
/// nothing here is shared, so mutation needs no synchronization. Query
/// parameters always end up in the resolved URL, for every method; form
/// fields always end up in the body.
pub struct RequestBuilder<'a> {
    client: &'a Client,
    method: Method,
    path: String,
    headers: HeaderMap,
    query: BTreeMap<String, String>,
    form: BTreeMap<String, String>,
    cookies: Vec<Cookie<'static>>,
    body: Option<Body>,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            headers: HeaderMap::new(),
            query: BTreeMap::new(),
            form: BTreeMap::new(),
            cookies: Vec::new(),
            body: None,
            timeout: None,
            retry_policy: None,
        }
    }

    /// Sets a header; last write wins, including over the client default of
    /// the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    /// Adds a header without displacing earlier values of the same name.
    pub fn append_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn content_type(self, content_type: &str) -> crate::Result<Self> {
        let value = parse_header_value(CONTENT_TYPE.as_str(), content_type)?;
        Ok(self.header(CONTENT_TYPE, value))
    }

    pub fn authorization(self, value: &str) -> crate::Result<Self> {
        let value = parse_header_value(AUTHORIZATION.as_str(), value)?;
        Ok(self.header(AUTHORIZATION, value))
    }

    /// Sets `Authorization: Bearer <token>`. For a different scheme use
    /// [`token_auth`](Self::token_auth).
    pub fn bearer_auth(self, token: &str) -> crate::Result<Self> {
        self.token_auth("Bearer", token)
    }

    pub fn token_auth(self, scheme: &str, token: &str) -> crate::Result<Self> {
        self.authorization(&format!("{scheme} {token}"))
    }

    pub fn basic_auth(self, user: &str, password: &str) -> crate::Result<Self> {
        self.authorization(&encode_basic_credentials(user, password))
    }

    /// Adds a query parameter, overriding a client default of the same name.
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn query_params<K, V, I>(mut self, params: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query.extend(
            params
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    /// Serializes any urlencodable value into query parameters.
    pub fn query<T>(mut self, params: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        for (name, value) in encode_pairs(params)? {
            self.query.insert(name, value);
        }
        Ok(self)
    }

    /// Parses an encoded query string (`a=1&b=2`) into parameters.
    pub fn query_string(mut self, query: &str) -> Self {
        for (name, value) in parse_query_string(query) {
            self.query.insert(name, value);
        }
        self
    }

    /// Adds a form field. Any form field forces form semantics on the body.
    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    pub fn form_fields<K, V, I>(mut self, fields: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.form.extend(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    /// Serializes any urlencodable value into form fields.
    pub fn form<T>(mut self, fields: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        for (name, value) in encode_pairs(fields)? {
            self.form.insert(name, value);
        }
        Ok(self)
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push(Cookie::new(name.into(), value.into()));
        self
    }

    /// Sets the payload by shape; see [`Body`] for how each variant is
    /// negotiated.
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Captures any serializable value as a structured payload, negotiated
    /// to JSON unless the request declares another content type.
    pub fn json<T>(mut self, payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        self.body = Some(Body::record(payload)?);
        Ok(self)
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.body(Body::Text(text.into()))
    }

    pub fn bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(Body::Raw(bytes.into()))
    }

    /// Overrides the client timeout for this call only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Overrides the attempt count for this call only. Zero is rejected with
    /// a warning and the client's count is kept.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_policy = Some(self.client.base_retry_policy().clone().attempts(retry_count));
        self
    }

    /// Dispatches the request and returns the wrapped exchange result.
    ///
    /// Any received HTTP response is a success here, whatever its status;
    /// only transport-level failures (after retries) and assembly errors
    /// surface as `Err`.
    pub fn send(self) -> crate::Result<Response> {
        let options = ExecutionOptions {
            timeout: self.timeout,
            retry_policy: self.retry_policy,
        };
        self.client.dispatch(RequestParts {
            method: self.method,
            path: self.path,
            headers: self.headers,
            query: self.query,
            form: self.form,
            cookies: self.cookies,
            body: self.body,
            options,
        })
    }

    /// Dispatches and decodes the response body as JSON in one step.
    pub fn send_json<T>(self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        self.send()?.json()
    }
}

fn encode_pairs<T>(params: &T) -> crate::Result<Vec<(String, String)>>
where
    T: Serialize + ?Sized,
{
    let encoded =
        serde_urlencoded::to_string(params).map_err(|source| Error::BodyEncoding {
            content_type: body::FORM_URLENCODED.to_owned(),
            source: source.into(),
        })?;
    Ok(parse_query_string(&encoded))
}
