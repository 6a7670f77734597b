use http::{HeaderMap, Method};
use tracing::{debug, error};

use crate::error::Error;

/// Structured view of a request handed to the debug sink at dispatch time.
#[derive(Debug)]
pub struct RequestRecord<'a> {
    pub method: &'a Method,
    pub host: &'a str,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    /// Rendered `name=value; name=value` cookie line, empty when none.
    pub cookies: &'a str,
    /// Truncated lossy text of the encoded body, empty when none.
    pub body: &'a str,
}

/// Structured view of a completed exchange.
#[derive(Debug)]
pub struct ResponseRecord<'a> {
    pub status_code: u16,
    pub status: &'a str,
    pub headers: &'a HeaderMap,
    /// Truncated body text; `None` when the body was left unread.
    pub body: Option<&'a str>,
}

/// Debug sink wired into the execution engine and the content negotiator.
///
/// All methods default to no-ops so the engine stays silent unless a sink is
/// installed. Formatting and persistence are the sink's concern; the engine
/// only hands over the records.
pub trait DebugObserver: Send + Sync {
    /// Opt in to receive response bodies inside [`ResponseRecord`]. Returning
    /// `true` makes the engine materialize the body before emitting the
    /// record; the response still serves it from cache afterwards.
    fn wants_response_body(&self) -> bool {
        false
    }

    fn on_request_dispatched(&self, _record: &RequestRecord<'_>) {}

    fn on_exchange_completed(&self, _record: &ResponseRecord<'_>) {}

    /// Called for every error the pipeline returns, with the originating
    /// operation name. Reporting never replaces the returned error.
    fn on_error(&self, _operation: &'static str, _error: &Error) {}
}

/// Default sink that drops every record.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl DebugObserver for NoopObserver {}

/// Sink that forwards records to `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl DebugObserver for TracingObserver {
    fn wants_response_body(&self) -> bool {
        true
    }

    fn on_request_dispatched(&self, record: &RequestRecord<'_>) {
        debug!(
            method = %record.method,
            host = record.host,
            path = record.path,
            headers = ?record.headers,
            cookies = record.cookies,
            body = record.body,
            "request dispatched"
        );
    }

    fn on_exchange_completed(&self, record: &ResponseRecord<'_>) {
        debug!(
            status_code = record.status_code,
            status = record.status,
            headers = ?record.headers,
            body = record.body.unwrap_or(""),
            "exchange completed"
        );
    }

    fn on_error(&self, operation: &'static str, err: &Error) {
        error!(operation, code = err.code().as_str(), error = %err, "request pipeline error");
    }
}
