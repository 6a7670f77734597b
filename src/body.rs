//! Request payload variants and the content negotiation that turns a payload
//! plus an optional explicit `Content-Type` into wire bytes.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::error::{BoxError, Error};
use crate::util;

pub const PLAIN_TEXT: &str = "text/plain; charset=utf-8";
pub const JSON: &str = "application/json";
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
pub const OCTET_STREAM: &str = "application/octet-stream";
pub const XML: &str = "application/xml";

static JSON_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(application|text)/.*json.*").expect("compiles"));
static XML_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(application|text)/.*xml.*").expect("compiles"));

/// Whether a content type selects the JSON serialization path.
///
/// Matches loosely (`application/vnd.api+json` counts); this classifies, it
/// does not validate.
pub fn is_json_like(content_type: &str) -> bool {
    JSON_LIKE.is_match(content_type)
}

/// Whether a content type selects the XML serialization path.
pub fn is_xml_like(content_type: &str) -> bool {
    XML_LIKE.is_match(content_type)
}

/// Whether a content type declares form semantics.
pub fn is_form_like(content_type: &str) -> bool {
    content_type
        .to_ascii_lowercase()
        .contains("application/x-www-form-urlencoded")
}

/// Picks a content type for verbatim bytes the caller did not label.
///
/// Leading `{` or `[` reads as JSON, leading `<` as markup; anything else
/// that is valid UTF-8 is plain text, the rest is an opaque octet stream.
pub(crate) fn sniff_content_type(bytes: &[u8]) -> &'static str {
    let first = bytes
        .iter()
        .copied()
        .find(|byte| !byte.is_ascii_whitespace());
    match first {
        Some(b'{') | Some(b'[') => JSON,
        Some(b'<') => XML,
        _ if std::str::from_utf8(bytes).is_ok() => PLAIN_TEXT,
        _ => OCTET_STREAM,
    }
}

/// A request payload, stated by shape at the call site.
///
/// The shape plus the request's explicit `Content-Type` (if any) drive
/// [negotiation](negotiate): verbatim variants are sent as-is, structured
/// variants are serialized through the configured [`BodyCodec`].
#[derive(Clone, Debug)]
pub enum Body {
    /// Verbatim bytes; the content type is sniffed from the leading bytes
    /// unless the request names one.
    Raw(Bytes),
    /// Verbatim UTF-8 text; defaults to `text/plain` unless the request
    /// names a content type.
    Text(String),
    /// A string-keyed mapping, serialized per the negotiated content type.
    Map(serde_json::Map<String, Value>),
    /// Any structured value, serialized per the negotiated content type.
    Record(Value),
}

impl Body {
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self::Raw(bytes.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Builds a [`Body::Map`] from key/value pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Map(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    /// Captures any serializable value as a [`Body::Record`].
    ///
    /// Serialization to the intermediate value happens here, so unsupported
    /// shapes are rejected before dispatch.
    pub fn record<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        let value = serde_json::to_value(value).map_err(|source| Error::BodyEncoding {
            content_type: JSON.to_owned(),
            source: source.into(),
        })?;
        Ok(Self::Record(value))
    }

    pub fn json(value: Value) -> Self {
        Self::Record(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes.into())
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Self::Raw(Bytes::copy_from_slice(bytes))
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Raw(bytes)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Record(value)
    }
}

impl From<serde_json::Map<String, Value>> for Body {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

/// The outcome of content negotiation: wire bytes plus the content type that
/// produced them.
///
/// Form-encoded output renders keys in alphabetical order, so encoding the
/// same inputs twice yields identical bytes.
#[derive(Clone, Debug)]
pub struct EncodedBody {
    bytes: Bytes,
    content_type: String,
}

impl EncodedBody {
    pub(crate) fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Serialization hooks for structured payloads and typed response views.
///
/// The default [`StandardCodec`] uses `serde_json` and `quick-xml`; inject a
/// custom codec to change number handling, root element naming, or the JSON
/// flavor without touching the pipeline.
pub trait BodyCodec: Send + Sync {
    fn encode_json(&self, value: &Value) -> Result<Vec<u8>, BoxError>;

    fn decode_json(&self, bytes: &[u8]) -> Result<Value, BoxError>;

    fn encode_xml(&self, value: &Value) -> Result<Vec<u8>, BoxError>;
}

#[derive(Debug, Default)]
pub struct StandardCodec;

impl BodyCodec for StandardCodec {
    fn encode_json(&self, value: &Value) -> Result<Vec<u8>, BoxError> {
        serde_json::to_vec(value).map_err(Into::into)
    }

    fn decode_json(&self, bytes: &[u8]) -> Result<Value, BoxError> {
        serde_json::from_slice(bytes).map_err(Into::into)
    }

    fn encode_xml(&self, value: &Value) -> Result<Vec<u8>, BoxError> {
        let text = quick_xml::se::to_string_with_root("request", value)?;
        Ok(text.into_bytes())
    }
}

/// Resolves a payload and form fields into wire bytes, first match wins:
///
/// 1. form fields or a form content type present: everything funnels through
///    the form encoder (see [`negotiate_form`]) and the content type is
///    forced to form-urlencoded, whatever was declared;
/// 2. verbatim bytes or text: sent as-is, content type from the request or
///    sniffed/defaulted;
/// 3. mappings and records: serialized through the codec, XML when the
///    declared content type reads XML-like, JSON otherwise (and JSON when
///    nothing is declared).
///
/// `Ok(None)` means the request carries no body at all.
pub(crate) fn negotiate(
    body: Option<&Body>,
    form: &BTreeMap<String, String>,
    explicit: Option<&str>,
    codec: &dyn BodyCodec,
) -> Result<Option<EncodedBody>, Error> {
    let form_declared = explicit.is_some_and(is_form_like);

    let Some(body) = body else {
        if form.is_empty() {
            return Ok(None);
        }
        return Ok(Some(EncodedBody::new(
            util::encode_params(form).into_bytes(),
            form_content_type(explicit),
        )));
    };

    if form_declared || !form.is_empty() {
        return negotiate_form(body, form, explicit, codec).map(Some);
    }

    match body {
        Body::Raw(bytes) => {
            let content_type = explicit.unwrap_or_else(|| sniff_content_type(bytes));
            Ok(Some(EncodedBody::new(bytes.clone(), content_type)))
        }
        Body::Text(text) => {
            let content_type = explicit.unwrap_or(PLAIN_TEXT);
            Ok(Some(EncodedBody::new(
                Bytes::copy_from_slice(text.as_bytes()),
                content_type,
            )))
        }
        Body::Map(map) => encode_structured(&Value::Object(map.clone()), explicit, codec),
        Body::Record(value) => encode_structured(value, explicit, codec),
    }
}

/// Form semantics force the form content type; a declared type survives only
/// when it already reads form-like (a charset-qualified variant, say).
fn form_content_type(explicit: Option<&str>) -> &str {
    explicit.filter(|value| is_form_like(value)).unwrap_or(FORM_URLENCODED)
}

/// Form-semantics arm of [`negotiate`].
///
/// String-keyed payloads flatten into the field mapping, with payload keys
/// winning over builder fields on collision and non-string values rendered
/// as their compact JSON text. Verbatim text (or UTF-8 bytes) that parses as
/// a JSON object flattens the same way; any other text is taken as a
/// prebuilt urlencoded payload and the builder fields are appended after an
/// `&`. Binary payloads and non-object records have no form rendering and
/// are rejected.
fn negotiate_form(
    body: &Body,
    form: &BTreeMap<String, String>,
    explicit: Option<&str>,
    codec: &dyn BodyCodec,
) -> Result<EncodedBody, Error> {
    let content_type = form_content_type(explicit);
    match body {
        Body::Text(text) => match parse_json_object(codec, text.as_bytes()) {
            Some(parsed) => Ok(encode_flattened(&parsed, form, content_type)),
            None => Ok(append_fields_to_payload(text, form, content_type)),
        },
        Body::Raw(bytes) => {
            let Ok(text) = std::str::from_utf8(bytes) else {
                return Err(Error::UnsupportedBodyType {
                    content_type: content_type.to_owned(),
                    reason: "binary payload cannot carry form fields",
                });
            };
            match parse_json_object(codec, bytes) {
                Some(parsed) => Ok(encode_flattened(&parsed, form, content_type)),
                None => Ok(append_fields_to_payload(text, form, content_type)),
            }
        }
        Body::Map(map) => Ok(encode_flattened(map, form, content_type)),
        Body::Record(Value::Object(map)) => Ok(encode_flattened(map, form, content_type)),
        Body::Record(_) => Err(Error::UnsupportedBodyType {
            content_type: content_type.to_owned(),
            reason: "form encoding requires a string-keyed object",
        }),
    }
}

fn parse_json_object(
    codec: &dyn BodyCodec,
    bytes: &[u8],
) -> Option<serde_json::Map<String, Value>> {
    match codec.decode_json(bytes) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn encode_flattened(
    payload: &serde_json::Map<String, Value>,
    form: &BTreeMap<String, String>,
    content_type: &str,
) -> EncodedBody {
    let mut merged = form.clone();
    for (key, value) in payload {
        merged.insert(key.clone(), form_value_text(value));
    }
    EncodedBody::new(util::encode_params(&merged).into_bytes(), content_type)
}

fn append_fields_to_payload(
    payload: &str,
    form: &BTreeMap<String, String>,
    content_type: &str,
) -> EncodedBody {
    let mut rendered = payload.to_owned();
    if !form.is_empty() {
        let encoded = util::encode_params(form);
        if rendered.is_empty() {
            rendered = encoded;
        } else {
            rendered.push('&');
            rendered.push_str(&encoded);
        }
    }
    EncodedBody::new(rendered.into_bytes(), content_type)
}

fn form_value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn encode_structured(
    value: &Value,
    explicit: Option<&str>,
    codec: &dyn BodyCodec,
) -> Result<Option<EncodedBody>, Error> {
    let content_type = explicit.unwrap_or(JSON);
    let encoded = if is_xml_like(content_type) {
        codec.encode_xml(value)
    } else {
        codec.encode_json(value)
    };
    let bytes = encoded.map_err(|source| Error::BodyEncoding {
        content_type: content_type.to_owned(),
        source,
    })?;
    Ok(Some(EncodedBody::new(bytes, content_type)))
}
