//! Shared client configuration and its consuming builder.
//!
//! A [`Client`] holds the defaults every request derived from it inherits:
//! base URL, default headers/query/form/cookies, timeout, retry policy,
//! codec, observer, cookie store, and the optional result transform. The
//! default maps live behind an `RwLock` so requests can be built off one
//! client from many threads while another thread adjusts the defaults.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cookie::Cookie;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

use crate::body::{BodyCodec, StandardCodec};
use crate::error::BoxError;
use crate::jar::CookieStore;
use crate::limit::InFlightGate;
use crate::observe::{DebugObserver, NoopObserver, TracingObserver};
use crate::pool::BufferPool;
use crate::retry::RetryPolicy;
use crate::transport::{Transport, TransportOptions, UreqTransport};
use crate::util::{
    parse_header_name, parse_header_value, parse_query_string, read_unpoisoned, write_unpoisoned,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_CONNECTIONS: usize = 100;

/// Hook applied to every response body before exposure. Errors and empty
/// results fall back to the raw body; they never fail the call.
pub(crate) type TransformFn = Arc<dyn Fn(&str) -> Result<String, BoxError> + Send + Sync>;

fn default_pool_max_idle_per_host() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        + 1
}

fn default_user_agent() -> String {
    format!("reqbuild/{}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn encode_basic_credentials(user: &str, password: &str) -> String {
    use base64::Engine as _;
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {encoded}")
}

/// The lock-guarded defaults shared by every request built off one client.
#[derive(Default)]
pub(crate) struct SharedDefaults {
    pub(crate) headers: HeaderMap,
    pub(crate) query: BTreeMap<String, String>,
    pub(crate) form: BTreeMap<String, String>,
    pub(crate) cookies: Vec<Cookie<'static>>,
}

impl SharedDefaults {
    fn snapshot(&self) -> Self {
        Self {
            headers: self.headers.clone(),
            query: self.query.clone(),
            form: self.form.clone(),
            cookies: self.cookies.clone(),
        }
    }
}

pub struct ClientBuilder {
    base_url: String,
    defaults: SharedDefaults,
    timeout: Duration,
    connect_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_max_idle_connections: usize,
    proxy: Option<String>,
    user_agent: String,
    retry_policy: RetryPolicy,
    max_in_flight: Option<usize>,
    debug: bool,
    codec: Arc<dyn BodyCodec>,
    observer: Option<Arc<dyn DebugObserver>>,
    cookie_store: Option<Arc<dyn CookieStore>>,
    transform: Option<TransformFn>,
    transport_override: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            defaults: SharedDefaults::default(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_max_idle_connections: DEFAULT_POOL_MAX_IDLE_CONNECTIONS,
            proxy: None,
            user_agent: default_user_agent(),
            retry_policy: RetryPolicy::standard(),
            max_in_flight: None,
            debug: false,
            codec: Arc::new(StandardCodec),
            observer: None,
            cookie_store: None,
            transform: None,
            transport_override: None,
        }
    }

    /// Overall exchange timeout per request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host.max(1);
        self
    }

    pub fn pool_max_idle_connections(mut self, pool_max_idle_connections: usize) -> Self {
        self.pool_max_idle_connections = pool_max_idle_connections.max(1);
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Total attempts per request. Zero is rejected with a warning and the
    /// prior value is kept.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_policy = self.retry_policy.attempts(retry_count);
        self
    }

    /// Base wait slept before the first retry.
    pub fn retry_wait(mut self, retry_wait: Duration) -> Self {
        self.retry_policy = self.retry_policy.wait(retry_wait);
        self
    }

    pub fn retry_max_wait(mut self, retry_max_wait: Duration) -> Self {
        self.retry_policy = self.retry_policy.max_wait(retry_max_wait);
        self
    }

    /// Bounds concurrent exchanges on this client; callers beyond the limit
    /// block until a slot frees up. Off by default.
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight.max(1));
        self
    }

    /// Installs a [`TracingObserver`] unless a custom observer was injected.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.defaults.headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.query.insert(name.into(), value.into());
        self
    }

    /// Parses an encoded query string (`a=1&b=2`) into default parameters.
    pub fn query_string(mut self, query: &str) -> Self {
        for (name, value) in parse_query_string(query) {
            self.defaults.query.insert(name, value);
        }
        self
    }

    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.form.insert(name.into(), value.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults
            .cookies
            .push(Cookie::new(name.into(), value.into()));
        self
    }

    pub fn bearer_auth(self, token: &str) -> crate::Result<Self> {
        self.token_auth("Bearer", token)
    }

    /// Like [`bearer_auth`](Self::bearer_auth) with a caller-chosen scheme.
    pub fn token_auth(self, scheme: &str, token: &str) -> crate::Result<Self> {
        let value = parse_header_value(AUTHORIZATION.as_str(), &format!("{scheme} {token}"))?;
        Ok(self.default_header(AUTHORIZATION, value))
    }

    pub fn basic_auth(self, user: &str, password: &str) -> crate::Result<Self> {
        let value =
            parse_header_value(AUTHORIZATION.as_str(), &encode_basic_credentials(user, password))?;
        Ok(self.default_header(AUTHORIZATION, value))
    }

    /// Replaces the serialization hooks used for structured bodies and typed
    /// response views.
    pub fn codec(mut self, codec: Arc<dyn BodyCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn DebugObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn cookie_store(mut self, cookie_store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(cookie_store);
        self
    }

    /// Post-processing hook applied to every response body before exposure.
    ///
    /// Errors and empty results are logged and discarded in favor of the raw
    /// body; the hook can reshape responses but never fail a call.
    pub fn result_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&str) -> Result<String, BoxError> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    #[cfg(test)]
    pub(crate) fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport_override = Some(transport);
        self
    }

    pub fn try_build(self) -> crate::Result<Client> {
        let transport = match self.transport_override {
            Some(transport) => transport,
            None => {
                let options = TransportOptions {
                    user_agent: self.user_agent,
                    connect_timeout: self.connect_timeout,
                    pool_idle_timeout: self.pool_idle_timeout,
                    pool_max_idle_per_host: self.pool_max_idle_per_host,
                    pool_max_idle_connections: self.pool_max_idle_connections,
                    proxy: self.proxy,
                };
                Arc::new(UreqTransport::new(&options)?) as Arc<dyn Transport>
            }
        };
        let observer = match (self.observer, self.debug) {
            (Some(observer), _) => observer,
            (None, true) => Arc::new(TracingObserver) as Arc<dyn DebugObserver>,
            (None, false) => Arc::new(NoopObserver) as Arc<dyn DebugObserver>,
        };
        Ok(Client {
            base_url: self.base_url.trim_end_matches('/').to_owned(),
            shared: RwLock::new(self.defaults),
            timeout: self.timeout,
            retry_policy: self.retry_policy,
            codec: self.codec,
            observer,
            cookie_store: self.cookie_store,
            transform: self.transform,
            transport,
            pool: BufferPool::new(),
            gate: self.max_in_flight.map(InFlightGate::new),
        })
    }
}

/// Shared configuration every request inherits.
///
/// Construction goes through [`Client::builder`]; after that the scalar
/// settings are fixed and only the default header/query/form/cookie maps can
/// still be adjusted, through the synchronized `&self` setters below.
pub struct Client {
    base_url: String,
    shared: RwLock<SharedDefaults>,
    timeout: Duration,
    retry_policy: RetryPolicy,
    pub(crate) codec: Arc<dyn BodyCodec>,
    pub(crate) observer: Arc<dyn DebugObserver>,
    pub(crate) cookie_store: Option<Arc<dyn CookieStore>>,
    pub(crate) transform: Option<TransformFn>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) pool: BufferPool,
    pub(crate) gate: Option<InFlightGate>,
}

impl Client {
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn base_retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub(crate) fn defaults_snapshot(&self) -> SharedDefaults {
        read_unpoisoned(&self.shared).snapshot()
    }

    /// Inserts a default header; last write wins.
    pub fn set_default_header(&self, name: HeaderName, value: HeaderValue) {
        write_unpoisoned(&self.shared).headers.insert(name, value);
    }

    pub fn try_set_default_header(&self, name: &str, value: &str) -> crate::Result<()> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        self.set_default_header(name, value);
        Ok(())
    }

    pub fn set_query_param(&self, name: impl Into<String>, value: impl Into<String>) {
        write_unpoisoned(&self.shared)
            .query
            .insert(name.into(), value.into());
    }

    pub fn set_form_field(&self, name: impl Into<String>, value: impl Into<String>) {
        write_unpoisoned(&self.shared)
            .form
            .insert(name.into(), value.into());
    }

    /// Appends a default cookie sent with every request. A cookie with the
    /// same name replaces the earlier one.
    pub fn add_cookie(&self, name: impl Into<String>, value: impl Into<String>) {
        let cookie = Cookie::new(name.into(), value.into());
        let mut shared = write_unpoisoned(&self.shared);
        shared
            .cookies
            .retain(|existing| existing.name() != cookie.name());
        shared.cookies.push(cookie);
    }
}
