//! The in-memory [`Transport`] implementation.
//!
//! Requests are routed on their decoded path segments to the node state in
//! [`crate::node`]. All state lives behind an async-aware read-write lock;
//! cloning a [`MemoryTransport`] shares the same node.

use async_trait::async_trait;
use mea::rwlock::RwLock;
use serde_json::{Value, json};
use std::sync::Arc;

use couchlayer_core::document::JsonObject;
use couchlayer_core::error::{CouchError, CouchResult};
use couchlayer_core::transport::{Body, Method, Request, Response, Transport, unescape_segment};

use crate::node::{AllDocsOptions, NodeState};

/// Thread-safe in-process database node.
///
/// `MemoryTransport` is cloneable and uses an `Arc`-wrapped internal
/// state; multiple clones of the same instance share the same databases.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<RwLock<NodeState>>,
}

impl MemoryTransport {
    /// Creates an empty node with no databases.
    pub fn new() -> Self {
        Self::default()
    }
}

fn json_response(status: u16, value: Value) -> CouchResult<Response> {
    Ok(Response {
        status,
        headers: vec![("Content-Type".to_string(), "application/json".to_string())],
        body: serde_json::to_vec(&value)?,
    })
}

fn doc_response(doc: &JsonObject) -> CouchResult<Response> {
    let rev = doc.get("_rev").and_then(Value::as_str).unwrap_or_default();
    Ok(Response {
        status: 200,
        headers: vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("ETag".to_string(), format!("\"{rev}\"")),
        ],
        body: serde_json::to_vec(&Value::Object(doc.clone()))?,
    })
}

fn head_response(etag: Option<&str>) -> Response {
    let mut headers = Vec::new();
    if let Some(etag) = etag {
        headers.push(("ETag".to_string(), format!("\"{etag}\"")));
    }
    Response { status: 200, headers, body: Vec::new() }
}

fn raw_param<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

// Query parameters arrive JSON-encoded (see `encode_params`); decode them
// back, falling back to the raw string for bare values.
fn json_param(req: &Request, name: &str) -> Option<Value> {
    raw_param(req, name).map(|raw| {
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
    })
}

fn string_param(req: &Request, name: &str) -> Option<String> {
    json_param(req, name).map(|value| match value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn bool_param(req: &Request, name: &str) -> bool {
    matches!(json_param(req, name), Some(Value::Bool(true)))
}

fn usize_param(req: &Request, name: &str) -> Option<usize> {
    json_param(req, name)
        .and_then(|value| value.as_u64())
        .map(|n| n as usize)
}

fn json_body(req: &Request) -> CouchResult<Value> {
    match &req.body {
        Some(Body::Json(value)) => Ok(value.clone()),
        Some(Body::Raw { bytes, .. }) => Ok(serde_json::from_slice(bytes)?),
        None => Err(CouchError::BadValue("request carries no body".into())),
    }
}

fn object_body(req: &Request) -> CouchResult<JsonObject> {
    match json_body(req)? {
        Value::Object(map) => Ok(map),
        other => Err(CouchError::BadValue(format!(
            "expected a JSON object body, got {other}"
        ))),
    }
}

fn all_docs_options(req: &Request) -> CouchResult<AllDocsOptions> {
    let keys = match &req.body {
        Some(_) => json_body(req)?
            .get("keys")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            }),
        None => json_param(req, "keys").and_then(|value| match value {
            Value::Array(keys) => Some(
                keys.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }),
    };
    // an exact-match `key` behaves like a single-element key set
    let keys = keys.or_else(|| string_param(req, "key").map(|key| vec![key]));
    Ok(AllDocsOptions {
        start_key: string_param(req, "startkey"),
        end_key: string_param(req, "endkey"),
        keys,
        include_docs: bool_param(req, "include_docs"),
        descending: bool_param(req, "descending"),
        limit: usize_param(req, "limit"),
        skip: usize_param(req, "skip").unwrap_or(0),
    })
}

fn parse_destination(req: &Request) -> CouchResult<(String, Option<String>)> {
    let destination = req
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("destination"))
        .map(|(_, value)| value.as_str())
        .ok_or_else(|| CouchError::BadValue("COPY requires a Destination header".into()))?;
    match destination.split_once("?rev=") {
        Some((id, rev)) => Ok((unescape_segment(id), Some(rev.to_string()))),
        None => Ok((unescape_segment(destination), None)),
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn request(&self, req: Request) -> CouchResult<Response> {
        let segments: Vec<String> = req
            .path
            .trim_matches('/')
            .split('/')
            .map(unescape_segment)
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (req.method, segments.as_slice()) {
            (Method::Get, [""]) => json_response(
                200,
                json!({
                    "couchdb": "Welcome",
                    "version": env!("CARGO_PKG_VERSION"),
                    "vendor": { "name": "couchlayer-memory" },
                }),
            ),
            (Method::Get, ["_all_dbs"]) => {
                let state = self.state.read().await;
                let names: Vec<&String> = state.dbs.keys().collect();
                json_response(200, json!(names))
            }
            (Method::Get, ["_uuids"]) => {
                let count = usize_param(&req, "count").unwrap_or(1);
                let uuids: Vec<String> = (0..count)
                    .map(|_| uuid::Uuid::new_v4().simple().to_string())
                    .collect();
                json_response(200, json!({ "uuids": uuids }))
            }
            (Method::Post, ["_replicate"]) => json_response(200, json!({ "ok": true })),

            (Method::Put, [db]) => {
                self.state.write().await.create_db(db)?;
                json_response(201, json!({ "ok": true }))
            }
            (Method::Delete, [db]) => {
                self.state.write().await.delete_db(db)?;
                json_response(200, json!({ "ok": true }))
            }
            (Method::Head, [db]) => {
                self.state.read().await.db(db)?;
                Ok(head_response(None))
            }
            (Method::Get, [db]) => {
                let state = self.state.read().await;
                let database = state.db(db)?;
                json_response(
                    200,
                    json!({
                        "db_name": db,
                        "doc_count": database.docs.len(),
                        "update_seq": 0,
                    }),
                )
            }

            (Method::Get | Method::Post, [db, "_all_docs"]) => {
                let options = all_docs_options(&req)?;
                let result = self.state.read().await.all_docs(db, options)?;
                json_response(200, result)
            }
            (Method::Post, [db, "_bulk_docs"]) => {
                let body = object_body(&req)?;
                let docs = body
                    .get("docs")
                    .and_then(Value::as_array)
                    .ok_or_else(|| CouchError::BadValue("_bulk_docs requires a docs array".into()))?
                    .iter()
                    .map(|doc| match doc {
                        Value::Object(map) => Ok(map.clone()),
                        other => Err(CouchError::BadValue(format!(
                            "bulk documents must be objects, got {other}"
                        ))),
                    })
                    .collect::<CouchResult<Vec<JsonObject>>>()?;
                let all_or_nothing = body
                    .get("all-or-nothing")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let entries = self
                    .state
                    .write()
                    .await
                    .bulk_docs(db, docs, all_or_nothing)?;
                json_response(201, Value::Array(entries))
            }
            (Method::Post, [_, "_compact"])
            | (Method::Post, [_, "_compact", _])
            | (Method::Post, [_, "_ensure_full_commit"])
            | (Method::Post, [_, "_view_cleanup"]) => json_response(202, json!({ "ok": true })),

            (Method::Get | Method::Post, [_, "_design", _, "_view", _]) => {
                Err(CouchError::NotFound("missing_named_view".into()))
            }

            (method, [db, "_design", name]) => {
                let docid = format!("_design/{name}");
                self.doc_request(method, &req, db, &docid).await
            }
            (method, [db, "_design", name, attachment]) => {
                let docid = format!("_design/{name}");
                self.attachment_request(method, &req, db, &docid, attachment)
                    .await
            }
            (method, [db, docid]) => self.doc_request(method, &req, db, docid).await,
            (method, [db, docid, attachment]) => {
                self.attachment_request(method, &req, db, docid, attachment)
                    .await
            }

            _ => Err(CouchError::NotFound("missing".into())),
        }
    }
}

impl MemoryTransport {
    async fn doc_request(
        &self,
        method: Method,
        req: &Request,
        db: &str,
        docid: &str,
    ) -> CouchResult<Response> {
        match method {
            Method::Get => {
                let state = self.state.read().await;
                let doc = state.doc(db, docid)?;
                if let Some(rev) = string_param(req, "rev") {
                    if doc.get("_rev").and_then(Value::as_str) != Some(rev.as_str()) {
                        return Err(CouchError::NotFound("missing".into()));
                    }
                }
                doc_response(doc)
            }
            Method::Head => {
                let state = self.state.read().await;
                let doc = state.doc(db, docid)?;
                Ok(head_response(doc.get("_rev").and_then(Value::as_str)))
            }
            Method::Put => {
                let body = object_body(req)?;
                let rev = self.state.write().await.put_doc(db, docid, body)?;
                json_response(201, json!({ "ok": true, "id": docid, "rev": rev }))
            }
            Method::Delete => {
                let rev_param = string_param(req, "rev");
                let rev = self
                    .state
                    .write()
                    .await
                    .delete_doc(db, docid, rev_param.as_deref())?;
                json_response(200, json!({ "ok": true, "id": docid, "rev": rev }))
            }
            Method::Copy => {
                let (dest, dest_rev) = parse_destination(req)?;
                let rev = self
                    .state
                    .write()
                    .await
                    .copy_doc(db, docid, &dest, dest_rev.as_deref())?;
                json_response(201, json!({ "ok": true, "id": dest, "rev": rev }))
            }
            Method::Post => Err(CouchError::RequestFailed {
                status: 405,
                reason: "method not allowed".into(),
            }),
        }
    }

    async fn attachment_request(
        &self,
        method: Method,
        req: &Request,
        db: &str,
        docid: &str,
        name: &str,
    ) -> CouchResult<Response> {
        match method {
            Method::Get => {
                let state = self.state.read().await;
                let (content_type, bytes) = state.attachment(db, docid, name)?;
                Ok(Response {
                    status: 200,
                    headers: vec![("Content-Type".to_string(), content_type)],
                    body: bytes,
                })
            }
            Method::Put => {
                let rev_param = string_param(req, "rev");
                let (content_type, bytes) = match &req.body {
                    Some(Body::Raw { content_type, bytes }) => {
                        (content_type.clone(), bytes.clone())
                    }
                    Some(Body::Json(value)) => {
                        ("application/json".to_string(), serde_json::to_vec(value)?)
                    }
                    None => ("application/octet-stream".to_string(), Vec::new()),
                };
                let rev = self.state.write().await.put_attachment(
                    db,
                    docid,
                    name,
                    &content_type,
                    &bytes,
                    rev_param.as_deref(),
                )?;
                json_response(201, json!({ "ok": true, "id": docid, "rev": rev }))
            }
            Method::Delete => {
                let rev_param = string_param(req, "rev");
                let rev = self.state.write().await.delete_attachment(
                    db,
                    docid,
                    name,
                    rev_param.as_deref(),
                )?;
                json_response(200, json!({ "ok": true, "id": docid, "rev": rev }))
            }
            _ => Err(CouchError::RequestFailed {
                status: 405,
                reason: "method not allowed".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use couchlayer_core::transport::escape_docid;

    async fn node_with_db() -> MemoryTransport {
        let transport = MemoryTransport::new();
        transport
            .request(Request::new(Method::Put, "db"))
            .await
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn documents_round_trip_through_the_http_surface() {
        let transport = node_with_db().await;

        let put = transport
            .request(Request::new(Method::Put, "db/greeting").json(json!({ "content": "hi" })))
            .await
            .unwrap();
        let saved: Value = put.json().unwrap();
        let rev = saved.get("rev").unwrap().as_str().unwrap().to_string();

        let fetched = transport
            .request(Request::new(Method::Get, "db/greeting"))
            .await
            .unwrap();
        assert_eq!(fetched.etag(), Some(rev.clone()));
        let doc: Value = fetched.json().unwrap();
        assert_eq!(doc.get("content"), Some(&json!("hi")));
        assert_eq!(doc.get("_rev"), Some(&json!(rev)));
    }

    #[tokio::test]
    async fn head_reports_the_revision_without_a_body() {
        let transport = node_with_db().await;
        transport
            .request(Request::new(Method::Put, "db/a").json(json!({})))
            .await
            .unwrap();

        let head = transport
            .request(Request::new(Method::Head, "db/a"))
            .await
            .unwrap();
        assert!(head.body.is_empty());
        assert!(head.etag().unwrap().starts_with("1-"));
    }

    #[tokio::test]
    async fn stale_writes_surface_conflicts() {
        let transport = node_with_db().await;
        transport
            .request(Request::new(Method::Put, "db/a").json(json!({})))
            .await
            .unwrap();

        let err = transport
            .request(
                Request::new(Method::Put, "db/a").json(json!({ "_rev": "1-bogus" })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CouchError::Conflict(_)));
    }

    #[tokio::test]
    async fn escaped_document_ids_are_decoded() {
        let transport = node_with_db().await;
        let path = format!("db/{}", escape_docid("weird/id with spaces"));
        transport
            .request(Request::new(Method::Put, path.clone()).json(json!({ "x": 1 })))
            .await
            .unwrap();

        let doc: Value = transport
            .request(Request::new(Method::Get, path))
            .await
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(doc.get("_id"), Some(&json!("weird/id with spaces")));
    }

    #[tokio::test]
    async fn design_documents_keep_their_prefixed_ids() {
        let transport = node_with_db().await;
        let path = format!("db/{}", escape_docid("_design/views"));
        transport
            .request(Request::new(Method::Put, path.clone()).json(json!({ "language": "js" })))
            .await
            .unwrap();

        let doc: Value = transport
            .request(Request::new(Method::Get, path))
            .await
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(doc.get("_id"), Some(&json!("_design/views")));

        let err = transport
            .request(Request::new(Method::Get, "db/_design/views/_view/by_x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CouchError::NotFound(_)));
    }

    #[tokio::test]
    async fn creating_an_existing_database_is_a_412() {
        let transport = node_with_db().await;
        let err = transport
            .request(Request::new(Method::Put, "db"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CouchError::RequestFailed { status: 412, .. }
        ));
    }

    #[tokio::test]
    async fn uuids_are_unique_and_batched() {
        let transport = MemoryTransport::new();
        let response = transport
            .request(Request::new(Method::Get, "_uuids").param("count", &json!(5)))
            .await
            .unwrap();
        let body: Value = response.json().unwrap();
        let uuids = body.get("uuids").unwrap().as_array().unwrap();
        assert_eq!(uuids.len(), 5);
        let unique: std::collections::HashSet<_> = uuids.iter().collect();
        assert_eq!(unique.len(), 5);
    }
}
