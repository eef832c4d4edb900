//! The HTTP boundary consumed by the rest of the crate.
//!
//! Everything above this module speaks in terms of the [`Transport`] trait:
//! one async round trip per call, a fixed error taxonomy at the boundary
//! (see [`crate::error::check_status`]), and JSON-encoded query parameters
//! so that structured view keys survive as correctly-typed values on the
//! server side.
//!
//! Implementations live in their own crates (an in-memory node for
//! development and tests, a reqwest-based client for real servers). The
//! trait is object safe; `Box<dyn Transport>` works where runtime selection
//! is needed.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt::Debug;

use crate::error::CouchResult;

/// HTTP methods used against a document database, including the
/// non-standard `COPY` verb for server-side document copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
    Copy,
}

impl Method {
    /// Returns the method as an uppercase wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Copy => "COPY",
        }
    }
}

/// Request body payload.
#[derive(Debug, Clone)]
pub enum Body {
    /// A JSON document, sent with `application/json`.
    Json(Value),
    /// Raw bytes with an explicit content type (attachments).
    Raw {
        content_type: String,
        bytes: Vec<u8>,
    },
}

/// A single request against the database server.
///
/// `path` is relative to the server base address and must already be
/// escaped (see [`escape_docid`]); query parameter values must already be
/// encoded (see [`encode_params`]), which the builder methods take care of.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
}

impl Request {
    /// Creates a request for the given method and pre-escaped path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Appends one query parameter, encoding the value per [`encode_params`].
    pub fn param(mut self, name: impl Into<String>, value: &Value) -> Self {
        let name = name.into();
        let encoded = encode_param(&name, value);
        self.params.push((name, encoded));
        self
    }

    /// Appends every parameter from a parameter map.
    pub fn query(mut self, params: &Map<String, Value>) -> Self {
        self.params.extend(encode_params(params));
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attaches a JSON body.
    pub fn json(mut self, value: Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    /// Attaches a raw body with a content type.
    pub fn raw(mut self, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.body = Some(Body::Raw { content_type: content_type.into(), bytes });
        self
    }
}

/// A successful response from the server.
///
/// Transports return `Ok` only for success statuses; failures arrive as
/// [`CouchError`](crate::error::CouchError) values instead.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    /// Decodes the body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> CouchResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decodes the body into a generic JSON value.
    pub fn json_value(&self) -> CouchResult<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Returns a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the `ETag` header with surrounding quotes stripped.
    ///
    /// The server reports a document's current revision here on `HEAD`,
    /// which lets revision discovery skip the body fetch entirely.
    pub fn etag(&self) -> Option<String> {
        self.header("etag")
            .map(|v| v.trim_matches('"').to_string())
    }
}

/// Abstract interface to a document database server.
///
/// Implementations own connection pooling, credentials and timeouts; they
/// attach credentials to every request and must translate statuses through
/// [`check_status`](crate::error::check_status) so the taxonomy is uniform.
/// Connection-level failures are wrapped as
/// [`CouchError::Transport`](crate::error::CouchError) and propagated
/// unchanged, never swallowed.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Performs one round trip and returns the successful response.
    async fn request(&self, req: Request) -> CouchResult<Response>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for &T {
    async fn request(&self, req: Request) -> CouchResult<Response> {
        (**self).request(req).await
    }
}

// Parameter names whose values the server always parses as JSON, even when
// the caller passed a bare string.
const JSON_PARAMS: [&str; 3] = ["key", "startkey", "endkey"];

fn encode_param(name: &str, value: &Value) -> String {
    match value {
        Value::String(s) if !JSON_PARAMS.contains(&name) => s.clone(),
        other => other.to_string(),
    }
}

/// Encodes query parameters for transmission.
///
/// Values that are not already strings are JSON-encoded, as are the
/// `key`/`startkey`/`endkey` values regardless of type; without this a
/// string key would reach the view index unquoted and match nothing.
pub fn encode_params(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(name, value)| (name.clone(), encode_param(name, value)))
        .collect()
}

const UNRESERVED: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.~";

/// Percent-escapes one path segment.
pub fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if UNRESERVED.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Decodes a percent-escaped path segment.
pub fn unescape_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Escapes a document id for use in a request path.
///
/// Design-document ids keep their `_design/` prefix intact so the server
/// routes them correctly; everything after the prefix (and any other id in
/// full) is percent-escaped, which keeps ids containing `/` addressable.
pub fn escape_docid(docid: &str) -> String {
    let docid = docid.strip_prefix('/').unwrap_or(docid);
    match docid.strip_prefix("_design/") {
        Some(rest) => format!("_design/{}", escape_segment(rest)),
        None => escape_segment(docid),
    }
}
