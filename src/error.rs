use http::Method;
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of a failure below the HTTP semantic layer.
///
/// Only these failures are eligible for retry; a received HTTP response of
/// any status is never classified as a transport error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Stable machine-readable identifiers for [`Error`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    EmptyTarget,
    MalformedUrl,
    UnsupportedBodyType,
    BodyEncoding,
    RequestBuild,
    RequestExecution,
    ReadBody,
    Decode,
    InvalidHeaderName,
    InvalidHeaderValue,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmptyTarget => "empty_target",
            Self::MalformedUrl => "malformed_url",
            Self::UnsupportedBodyType => "unsupported_body_type",
            Self::BodyEncoding => "body_encoding",
            Self::RequestBuild => "request_build",
            Self::RequestExecution => "request_execution",
            Self::ReadBody => "read_body",
            Self::Decode => "decode",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
        }
    }
}

/// Errors produced while assembling, dispatching, or consuming a request.
///
/// Assembly-time variants (`EmptyTarget`, `MalformedUrl`,
/// `UnsupportedBodyType`, `BodyEncoding`) are returned before any network
/// I/O happens and are never retried. `RequestExecution` is the only variant
/// the retry loop produces; it wraps the last transport failure once all
/// attempts are spent. `Decode` and `ReadBody` surface when the caller asks
/// the response for a typed or raw view.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no target: base url and request path are both empty")]
    EmptyTarget,
    #[error("malformed target url {target}: {source}")]
    MalformedUrl {
        target: String,
        #[source]
        source: BoxError,
    },
    #[error("unsupported body for {content_type}: {reason}")]
    UnsupportedBodyType {
        content_type: String,
        reason: &'static str,
    },
    #[error("failed to encode request body as {content_type}: {source}")]
    BodyEncoding {
        content_type: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error(
        "request execution failed ({kind}) for {method} {uri} after {attempts} attempt(s): {source}"
    )]
    RequestExecution {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        attempts: u32,
        #[source]
        source: BoxError,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to decode response body: {source}; body={body}")]
    Decode {
        #[source]
        source: BoxError,
        body: String,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyTarget => ErrorCode::EmptyTarget,
            Self::MalformedUrl { .. } => ErrorCode::MalformedUrl,
            Self::UnsupportedBodyType { .. } => ErrorCode::UnsupportedBodyType,
            Self::BodyEncoding { .. } => ErrorCode::BodyEncoding,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::RequestExecution { .. } => ErrorCode::RequestExecution,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::Decode { .. } => ErrorCode::Decode,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
        }
    }

    /// Transport classification for execution failures, `None` for
    /// assembly-time and decode errors.
    pub const fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::RequestExecution { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
