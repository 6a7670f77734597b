//! Wire-level exchange behind the execution engine.
//!
//! The engine never talks to `ureq` directly; it hands a [`WireRequest`] to a
//! [`Transport`] and gets back either a [`WireResponse`] or a
//! [`TransportFailure`]. Only the latter is eligible for retry.

use std::io::Read;
use std::time::Duration;

use http::{HeaderMap, Method, StatusCode, Uri};

use crate::error::{BoxError, Error, TransportErrorKind};

/// A failure below the HTTP layer: connect, TLS, timeout, or I/O mid-stream.
/// A received status code of any value is never one of these.
#[derive(Debug)]
pub(crate) struct TransportFailure {
    pub(crate) kind: TransportErrorKind,
    pub(crate) source: BoxError,
}

impl TransportFailure {
    pub(crate) fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    fn from_ureq(error: ureq::Error) -> Self {
        Self {
            kind: classify_ureq_error(&error),
            source: Box::new(error),
        }
    }
}

/// One fully assembled attempt: resolved target, merged headers, encoded
/// body, and the deadline the exchange must finish within.
pub(crate) struct WireRequest<'a> {
    pub(crate) method: &'a Method,
    pub(crate) uri: &'a Uri,
    pub(crate) headers: &'a HeaderMap,
    pub(crate) body: Option<&'a [u8]>,
    pub(crate) timeout: Duration,
}

/// The raw exchange result with the body left unread.
pub(crate) struct WireResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: WireBody,
}

/// An unread response body stream.
///
/// `Reader` exists so the response wrapper can be built from any source in
/// tests; the engine itself always produces `Ureq`.
pub(crate) enum WireBody {
    Ureq(ureq::Body),
    Reader(Box<dyn Read + Send>),
    Empty,
}

pub(crate) trait Transport: Send + Sync {
    fn roundtrip(&self, request: WireRequest<'_>) -> Result<WireResponse, TransportFailure>;
}

/// Connection-level knobs the engine configures but does not implement.
pub(crate) struct TransportOptions {
    pub(crate) user_agent: String,
    pub(crate) connect_timeout: Duration,
    pub(crate) pool_idle_timeout: Duration,
    pub(crate) pool_max_idle_per_host: usize,
    pub(crate) pool_max_idle_connections: usize,
    pub(crate) proxy: Option<String>,
}

pub(crate) struct UreqTransport {
    agent: ureq::Agent,
    connect_timeout: Duration,
}

impl UreqTransport {
    pub(crate) fn new(options: &TransportOptions) -> Result<Self, Error> {
        let proxy = match &options.proxy {
            Some(address) => {
                let parsed = ureq::Proxy::new(address).map_err(|source| Error::MalformedUrl {
                    target: address.clone(),
                    source: Box::new(source),
                })?;
                Some(parsed)
            }
            None => None,
        };
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .user_agent(options.user_agent.as_str())
            .max_idle_age(options.pool_idle_timeout)
            .max_idle_connections_per_host(options.pool_max_idle_per_host)
            .max_idle_connections(options.pool_max_idle_connections)
            .proxy(proxy)
            .build();
        Ok(Self {
            agent: config.new_agent(),
            connect_timeout: options.connect_timeout,
        })
    }
}

impl Transport for UreqTransport {
    fn roundtrip(&self, request: WireRequest<'_>) -> Result<WireResponse, TransportFailure> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.clone())
            .uri(request.uri.clone());
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        let wire_request = builder
            .body(request.body.map(<[u8]>::to_vec).unwrap_or_default())
            .map_err(|source| TransportFailure::new(TransportErrorKind::Other, source))?;

        let configured_request = self
            .agent
            .configure_request(wire_request)
            .timeout_global(Some(request.timeout))
            .timeout_per_call(Some(request.timeout))
            .timeout_connect(Some(self.connect_timeout))
            .timeout_recv_response(Some(request.timeout))
            .timeout_recv_body(Some(request.timeout))
            .build();

        let response = self
            .agent
            .run(configured_request)
            .map_err(TransportFailure::from_ureq)?;
        let (parts, body) = response.into_parts();
        Ok(WireResponse {
            status: parts.status,
            headers: parts.headers,
            body: WireBody::Ureq(body),
        })
    }
}

fn classify_ureq_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) | ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::Io(source) => match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Timeout
            }
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    }
}
