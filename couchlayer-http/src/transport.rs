//! `reqwest`-based implementation of the transport boundary.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use couchlayer_core::error::{CouchError, CouchResult, check_status};
use couchlayer_core::transport::{Body, Method, Request, Response, Transport};

/// HTTP transport against a real database server.
///
/// Cloning shares the underlying connection pool. Build one per server
/// base address and pass it to
/// [`Server::new`](couchlayer_core::database::Server::new); nothing in the
/// crate constructs a pool implicitly.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    credentials: Option<(String, String)>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base", &self.base)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

impl HttpTransport {
    /// Creates a transport with default settings.
    pub fn new(base: impl Into<String>) -> CouchResult<Self> {
        Self::builder(base).build()
    }

    /// Creates a builder for a transport with custom options.
    pub fn builder(base: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder {
            base: base.into(),
            credentials: None,
            timeout: None,
        }
    }
}

fn to_reqwest_method(method: Method) -> CouchResult<reqwest::Method> {
    Ok(match method {
        Method::Get => reqwest::Method::GET,
        Method::Put => reqwest::Method::PUT,
        Method::Post => reqwest::Method::POST,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Copy => reqwest::Method::from_bytes(b"COPY")
            .map_err(|e| CouchError::Transport(e.to_string()))?,
    })
}

// CouchDB error bodies look like {"error": "...", "reason": "..."}; pull
// out the most useful part for the error taxonomy.
fn extract_reason(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(reason) = value.get("reason").and_then(Value::as_str) {
            return reason.to_string();
        }
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return error.to_string();
        }
    }
    String::from_utf8_lossy(body).into_owned()
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self, req), fields(method = req.method.as_str(), path = %req.path))]
    async fn request(&self, req: Request) -> CouchResult<Response> {
        let url = format!("{}/{}", self.base, req.path);
        let mut builder = self
            .client
            .request(to_reqwest_method(req.method)?, &url)
            .query(&req.params)
            .header("Accept", "application/json");

        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match req.body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Raw { content_type, bytes }) => {
                builder.header("Content-Type", content_type).body(bytes)
            }
            None => builder,
        };

        let response = builder
            .send()
            .await
            .map_err(|e| CouchError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CouchError::Transport(e.to_string()))?
            .to_vec();

        if status >= 400 {
            tracing::debug!(status, "server returned an error status");
            check_status(status, extract_reason(&body))?;
        }
        Ok(Response { status, headers, body })
    }
}

/// Builder for [`HttpTransport`] instances.
pub struct HttpTransportBuilder {
    base: String,
    credentials: Option<(String, String)>,
    timeout: Option<Duration>,
}

impl HttpTransportBuilder {
    /// Attaches basic credentials to every request.
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Sets a per-request timeout. Timeouts surface as
    /// [`CouchError::Transport`] like any other connection failure.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the transport.
    pub fn build(self) -> CouchResult<HttpTransport> {
        let mut client = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }
        Ok(HttpTransport {
            client: client
                .build()
                .map_err(|e| CouchError::Transport(e.to_string()))?,
            base: self.base.trim_end_matches('/').to_string(),
            credentials: self.credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reasons_prefer_the_reason_field() {
        assert_eq!(
            extract_reason(br#"{"error":"conflict","reason":"Document update conflict."}"#),
            "Document update conflict."
        );
        assert_eq!(extract_reason(br#"{"error":"not_found"}"#), "not_found");
        assert_eq!(extract_reason(b"plain text"), "plain text");
    }

    #[test]
    fn base_addresses_are_normalized() {
        let transport = HttpTransport::new("http://127.0.0.1:5984/").unwrap();
        assert_eq!(transport.base, "http://127.0.0.1:5984");
    }

    #[test]
    fn copy_is_a_valid_method() {
        assert_eq!(to_reqwest_method(Method::Copy).unwrap().as_str(), "COPY");
    }
}
