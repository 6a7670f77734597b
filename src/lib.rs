//! `reqbuild` is a fluent HTTP request builder with content negotiation and
//! bounded transport retries over a blocking core.
//!
//! A [`Client`] carries shared defaults (headers, query parameters, form
//! fields, cookies, timeout, retry policy); each call builds a
//! [`RequestBuilder`] off it. At dispatch the body's declared shape and the
//! request's `Content-Type` pick exactly one serialization path, query
//! parameters merge into the resolved URL, and the exchange runs with
//! bounded retry: transport failures are retried, any received HTTP
//! response (4xx and 5xx included) is handed back for the caller to
//! interpret.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use reqbuild::{Client, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("https://api.example.com")
//!         .timeout(Duration::from_secs(10))
//!         .retry_policy(
//!             RetryPolicy::standard()
//!                 .attempts(3)
//!                 .wait(Duration::from_millis(100)),
//!         )
//!         .try_default_header("x-client", "demo")?
//!         .try_build()?;
//!
//!     let created: User = client
//!         .post("/v1/users")
//!         .query_param("notify", "true")
//!         .json(&serde_json::json!({ "name": "John", "age": 30 }))?
//!         .send_json()?;
//!
//!     println!("created id={}", created.id);
//!     Ok(())
//! }
//! ```
//!
//! # Policy notes
//!
//! - Query parameters always go to the URL, for every method; form fields
//!   always go to the body.
//! - Form and query encoding render keys alphabetically, so the same inputs
//!   always produce the same bytes.
//! - `Response::is_ok()` means status 200 exactly, not the 2xx range.

mod body;
mod client;
mod error;
mod execute;
mod jar;
mod limit;
mod observe;
mod pool;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::body::{
    Body, BodyCodec, EncodedBody, FORM_URLENCODED, JSON, OCTET_STREAM, PLAIN_TEXT, StandardCodec,
    XML, is_form_like, is_json_like, is_xml_like,
};
pub use crate::client::{Client, ClientBuilder};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::jar::{CookieStore, MemoryCookieStore};
pub use crate::observe::{
    DebugObserver, NoopObserver, RequestRecord, ResponseRecord, TracingObserver,
};
pub use crate::request::RequestBuilder;
pub use crate::response::Response;
pub use crate::retry::RetryPolicy;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Body, BodyCodec, Client, ClientBuilder, CookieStore, DebugObserver, EncodedBody, Error,
        ErrorCode, MemoryCookieStore, RequestBuilder, Response, Result, RetryPolicy,
        StandardCodec, TracingObserver, TransportErrorKind,
    };
}
