//! Server handle and per-database persistence lifecycle.
//!
//! [`Server`] covers the one-shot administrative RPCs (create/open/delete
//! databases, replication, identifier allocation). [`Database`] owns the
//! document lifecycle: save with bounded conflict retry, bulk save with a
//! partial-failure contract, delete, server-side copy, attachment
//! mutation, views, and the destructive [`Database::flush`] reset.
//!
//! A transport is always supplied by the caller; nothing here constructs
//! a process-wide connection pool behind the scenes.
//!
//! # Example
//!
//! ```ignore
//! use couchlayer::prelude::*;
//!
//! let server = Server::new(transport);
//! let db = server.open_or_create_db("greetings").await?;
//!
//! let mut doc = Document::new(&schema)?;
//! doc.set("content", "hello")?;
//! db.save(&mut doc, false).await?;
//! assert!(doc.rev().is_some());
//! ```

use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::document::{Document, JsonObject};
use crate::error::{BulkDocError, BulkSaveError, BulkSaved, CouchError, CouchResult};
use crate::schema::Schema;
use crate::transport::{Method, Request, Transport, escape_docid, escape_segment};
use crate::uuids::UuidPool;
use crate::view::{Params, Row, View};

// Bounded readiness poll between database delete and recreate in `flush`.
const FLUSH_POLL_ATTEMPTS: usize = 20;
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct WriteResponse {
    id: String,
    rev: String,
}

/// Handle on a database server node.
///
/// Administrative operations are single round trips with no internal
/// state; the interesting lifecycle lives on [`Database`].
#[derive(Debug, Clone)]
pub struct Server<T> {
    transport: T,
}

impl<T: Transport + Clone> Server<T> {
    /// Creates a server handle over a caller-supplied transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the server welcome/info object.
    pub async fn info(&self) -> CouchResult<JsonObject> {
        self.transport.request(Request::new(Method::Get, "")).await?.json()
    }

    /// Returns the server version string.
    pub async fn version(&self) -> CouchResult<String> {
        let info = self.info().await?;
        info.get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CouchError::Serialization("server info carried no version".into()))
    }

    /// Lists all database names on the server.
    pub async fn all_dbs(&self) -> CouchResult<Vec<String>> {
        self.transport
            .request(Request::new(Method::Get, "_all_dbs"))
            .await?
            .json()
    }

    /// Fetches `count` fresh identifiers from the server.
    pub async fn uuids(&self, count: usize) -> CouchResult<Vec<String>> {
        #[derive(Deserialize)]
        struct Uuids {
            uuids: Vec<String>,
        }
        let response: Uuids = self
            .transport
            .request(Request::new(Method::Get, "_uuids").param("count", &json!(count)))
            .await?
            .json()?;
        Ok(response.uuids)
    }

    /// Creates a database and returns a handle on it.
    pub async fn create_db(&self, name: &str) -> CouchResult<Database<T>> {
        self.transport
            .request(Request::new(Method::Put, escape_segment(name)))
            .await?;
        Ok(Database::new(self.transport.clone(), name))
    }

    /// Opens an existing database, failing with `NotFound` when absent.
    pub async fn open_db(&self, name: &str) -> CouchResult<Database<T>> {
        self.transport
            .request(Request::new(Method::Head, escape_segment(name)))
            .await?;
        Ok(Database::new(self.transport.clone(), name))
    }

    /// Opens a database, creating it first when absent.
    pub async fn open_or_create_db(&self, name: &str) -> CouchResult<Database<T>> {
        match self.open_db(name).await {
            Ok(db) => Ok(db),
            Err(CouchError::NotFound(_)) => self.create_db(name).await,
            Err(other) => Err(other),
        }
    }

    /// Deletes a database.
    pub async fn delete_db(&self, name: &str) -> CouchResult<()> {
        self.transport
            .request(Request::new(Method::Delete, escape_segment(name)))
            .await?;
        Ok(())
    }

    /// Returns whether a database exists.
    pub async fn contains(&self, name: &str) -> CouchResult<bool> {
        match self
            .transport
            .request(Request::new(Method::Head, escape_segment(name)))
            .await
        {
            Ok(_) => Ok(true),
            Err(CouchError::NotFound(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Triggers a replication between two databases or URIs.
    pub async fn replicate(
        &self,
        source: &str,
        target: &str,
        continuous: bool,
    ) -> CouchResult<JsonObject> {
        self.transport
            .request(Request::new(Method::Post, "_replicate").json(json!({
                "source": source,
                "target": target,
                "continuous": continuous,
            })))
            .await?
            .json()
    }
}

/// Where a server-side document copy should land.
#[derive(Debug, Clone)]
pub enum CopyTarget {
    /// Copy under a freshly allocated identity.
    Fresh,
    /// Copy to this id; the current revision is discovered when the target
    /// exists, otherwise the copy is unguarded.
    Id(String),
    /// Revision-guarded copy over a known existing document.
    Checked { id: String, rev: String },
}

/// Handle on one database, owning the persistence lifecycle.
///
/// Cloning shares the identity pool. Methods take documents by mutable
/// reference because every successful write updates the document's
/// identity/revision in place; the in-memory document reflects server
/// state only after that update has happened.
#[derive(Debug, Clone)]
pub struct Database<T: Transport + Clone> {
    transport: T,
    name: String,
    uuids: UuidPool<T>,
}

impl<T: Transport + Clone> Database<T> {
    /// Creates a handle on the named database without touching the server.
    pub fn new(transport: T, name: impl Into<String>) -> Self {
        let name = name.into();
        let uuids = UuidPool::new(transport.clone());
        Self { transport, name, uuids }
    }

    /// Returns the database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shared identity pool.
    pub fn uuid_pool(&self) -> &UuidPool<T> {
        &self.uuids
    }

    fn root_path(&self) -> String {
        escape_segment(&self.name)
    }

    fn sub_path(&self, suffix: &str) -> String {
        format!("{}/{}", escape_segment(&self.name), suffix)
    }

    fn doc_path(&self, docid: &str) -> String {
        self.sub_path(&escape_docid(docid))
    }

    /// Returns the database information object.
    pub async fn info(&self) -> CouchResult<JsonObject> {
        self.transport
            .request(Request::new(Method::Get, self.root_path()))
            .await?
            .json()
    }

    /// Number of documents in the database.
    pub async fn len(&self) -> CouchResult<u64> {
        let info = self.info().await?;
        info.get("doc_count")
            .and_then(Value::as_u64)
            .ok_or_else(|| CouchError::Serialization("database info carried no doc_count".into()))
    }

    /// Returns whether the database exists on the server.
    pub async fn exists(&self) -> CouchResult<bool> {
        match self
            .transport
            .request(Request::new(Method::Head, self.root_path()))
            .await
        {
            Ok(_) => Ok(true),
            Err(CouchError::NotFound(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Returns whether a document exists.
    pub async fn contains(&self, docid: &str) -> CouchResult<bool> {
        match self
            .transport
            .request(Request::new(Method::Head, self.doc_path(docid)))
            .await
        {
            Ok(_) => Ok(true),
            Err(CouchError::NotFound(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// Opens a document as its raw wire form.
    pub async fn open(&self, docid: &str) -> CouchResult<JsonObject> {
        self.open_with(docid, &Params::new()).await
    }

    /// Opens a document with extra request parameters (e.g. `rev`,
    /// `attachments`).
    pub async fn open_with(&self, docid: &str, params: &Params) -> CouchResult<JsonObject> {
        self.transport
            .request(Request::new(Method::Get, self.doc_path(docid)).query(params))
            .await?
            .json()
    }

    /// Opens a document and wraps it with the given schema.
    pub async fn open_as(&self, schema: &Arc<Schema>, docid: &str) -> CouchResult<Document> {
        let wire = self.open(docid).await?;
        Document::wrap(schema, wire)
    }

    /// Opens a document, creating and saving a fresh instance when absent.
    pub async fn open_or_create_as(
        &self,
        schema: &Arc<Schema>,
        docid: &str,
    ) -> CouchResult<Document> {
        match self.open_as(schema, docid).await {
            Ok(doc) => Ok(doc),
            Err(CouchError::NotFound(_)) => {
                let mut doc = Document::new(schema)?;
                doc.set_id(docid)?;
                self.save(&mut doc, false).await?;
                Ok(doc)
            }
            Err(other) => Err(other),
        }
    }

    /// Discovers a document's current revision without fetching its body.
    pub async fn last_rev(&self, docid: &str) -> CouchResult<String> {
        let response = self
            .transport
            .request(Request::new(Method::Head, self.doc_path(docid)))
            .await?;
        let status = response.status;
        response.etag().ok_or(CouchError::RequestFailed {
            status,
            reason: "response carried no ETag header".into(),
        })
    }

    async fn write_doc(&self, docid: &str, wire: JsonObject) -> CouchResult<WriteResponse> {
        self.transport
            .request(Request::new(Method::Put, self.doc_path(docid)).json(Value::Object(wire)))
            .await?
            .json()
    }

    /// Saves a document, creating it when it has no identity.
    ///
    /// A document without identity is assigned one from the pool first and
    /// written create-if-absent; one with identity is written as a
    /// revision-guarded update. On a revision conflict with `force_update`
    /// set, the current server revision is fetched and the write retried
    /// exactly once - a second conflict is a live race the caller must
    /// resolve. Without `force_update` the conflict is surfaced and the
    /// document left untouched. On success the document's identity and
    /// revision are updated in place.
    #[tracing::instrument(skip(self, doc), fields(db = %self.name))]
    pub async fn save(&self, doc: &mut Document, force_update: bool) -> CouchResult<()> {
        doc.validate()?;
        let docid = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let id = self.uuids.next().await?;
                doc.set_id(id.clone())?;
                id
            }
        };

        let wire = doc.to_wire();
        let response = match self.write_doc(&docid, wire.clone()).await {
            Err(CouchError::Conflict(reason)) if force_update => {
                tracing::warn!(%docid, %reason, "conflict on save, retrying with current revision");
                let rev = self.last_rev(&docid).await?;
                let mut wire = wire;
                wire.insert("_rev".to_string(), Value::String(rev));
                self.write_doc(&docid, wire).await?
            }
            other => other?,
        };

        // Server-returned tokens are authoritative; write them straight
        // into the wire form (a wrapped design document's id would fail
        // the client-side id validation).
        doc.insert_raw("_id", Value::String(response.id));
        doc.insert_raw("_rev", Value::String(response.rev));
        Ok(())
    }

    async fn bulk_write(
        &self,
        wires: Vec<JsonObject>,
        all_or_nothing: bool,
    ) -> CouchResult<Vec<JsonObject>> {
        let mut payload = json!({ "docs": wires });
        if all_or_nothing {
            payload["all-or-nothing"] = json!(true);
        }
        self.transport
            .request(Request::new(Method::Post, self.sub_path("_bulk_docs")).json(payload))
            .await?
            .json()
    }

    fn collect_bulk_results(
        docs: Option<&mut [Document]>,
        entries: &[JsonObject],
    ) -> CouchResult<()> {
        let mut docs = docs;
        let mut saved = Vec::new();
        let mut errors = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let id = entry.get("id").and_then(Value::as_str);
            if let Some(error) = entry.get("error").and_then(Value::as_str) {
                errors.push(BulkDocError {
                    index,
                    id: id.map(str::to_string),
                    error: error.to_string(),
                    reason: entry
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
                continue;
            }
            if let (Some(id), Some(rev)) = (id, entry.get("rev").and_then(Value::as_str)) {
                if let Some(docs) = docs.as_deref_mut() {
                    if let Some(doc) = docs.get_mut(index) {
                        doc.insert_raw("_id", Value::String(id.to_string()));
                        doc.insert_raw("_rev", Value::String(rev.to_string()));
                    }
                }
                saved.push(BulkSaved { id: id.to_string(), rev: rev.to_string() });
            }
        }
        if !errors.is_empty() {
            return Err(CouchError::BulkSave(BulkSaveError { saved, errors }));
        }
        Ok(())
    }

    /// Saves several documents in one request.
    ///
    /// Every document lacking an identity - wherever it sits in the input -
    /// is assigned one first, from a single batched pool take. The server
    /// responds per document in input order; entries carrying an error
    /// marker are collected and the call fails with `BulkSave` while the
    /// accepted documents are still updated in place with their new
    /// identity and revision (partial-failure contract).
    ///
    /// With `all_or_nothing` the server commits all writes together and
    /// skips conflict checking.
    #[tracing::instrument(skip(self, docs), fields(db = %self.name, count = docs.len()))]
    pub async fn bulk_save(
        &self,
        docs: &mut [Document],
        all_or_nothing: bool,
    ) -> CouchResult<()> {
        let missing: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, doc)| doc.id().is_none())
            .map(|(index, _)| index)
            .collect();
        if !missing.is_empty() {
            let ids = self.uuids.take(missing.len()).await?;
            for (index, id) in missing.into_iter().zip(ids) {
                docs[index].set_id(id)?;
            }
        }

        let wires = docs.iter().map(Document::to_wire).collect();
        let entries = self.bulk_write(wires, all_or_nothing).await?;
        Self::collect_bulk_results(Some(docs), &entries)
    }

    /// Deletes several documents in one request by marking them
    /// `_deleted` and bulk-saving.
    pub async fn bulk_delete(
        &self,
        docs: &mut [Document],
        all_or_nothing: bool,
    ) -> CouchResult<()> {
        for doc in docs.iter_mut() {
            doc.insert_raw("_deleted", Value::Bool(true));
        }
        self.bulk_save(docs, all_or_nothing).await
    }

    /// Deletes a document, clearing its identity and revision on success
    /// so it returns to new status.
    ///
    /// The revision is taken from the document when known; otherwise one
    /// extra round trip discovers it.
    #[tracing::instrument(skip(self, doc), fields(db = %self.name))]
    pub async fn delete(&self, doc: &mut Document) -> CouchResult<()> {
        let docid = doc
            .id()
            .ok_or_else(|| CouchError::BadValue("document has no id to delete".into()))?
            .to_string();
        let rev = match doc.rev() {
            Some(rev) => rev.to_string(),
            None => self.last_rev(&docid).await?,
        };
        self.transport
            .request(Request::new(Method::Delete, self.doc_path(&docid)).param("rev", &json!(rev)))
            .await?;
        doc.clear_identity();
        Ok(())
    }

    /// Deletes a document by bare identifier.
    ///
    /// Costs one extra round trip to discover the current revision; prefer
    /// [`Database::delete`] with a full document when the revision is
    /// already known.
    pub async fn delete_by_id(&self, docid: &str) -> CouchResult<()> {
        let rev = self.last_rev(docid).await?;
        self.transport
            .request(Request::new(Method::Delete, self.doc_path(docid)).param("rev", &json!(rev)))
            .await?;
        Ok(())
    }

    /// Copies a document server-side and returns the fresh target
    /// document.
    #[tracing::instrument(skip(self), fields(db = %self.name))]
    pub async fn copy_doc(&self, source: &str, target: CopyTarget) -> CouchResult<JsonObject> {
        let (destination, destid) = match target {
            CopyTarget::Fresh => {
                let id = self.uuids.next().await?;
                (id.clone(), id)
            }
            CopyTarget::Id(id) => match self.last_rev(&id).await {
                Ok(rev) => (format!("{id}?rev={rev}"), id),
                Err(CouchError::NotFound(_)) => (id.clone(), id),
                Err(other) => return Err(other),
            },
            CopyTarget::Checked { id, rev } => (format!("{id}?rev={rev}"), id),
        };
        self.transport
            .request(
                Request::new(Method::Copy, self.doc_path(source)).header("Destination", destination),
            )
            .await?;
        self.open(&destid).await
    }

    /// Stores an attachment under a document.
    ///
    /// Requires the document's current revision; on success the document
    /// is re-fetched into place, since the attachment write advanced the
    /// governing revision.
    #[tracing::instrument(skip(self, doc, content), fields(db = %self.name, name))]
    pub async fn put_attachment(
        &self,
        doc: &mut Document,
        name: &str,
        content: Vec<u8>,
        content_type: Option<&str>,
    ) -> CouchResult<()> {
        if name.is_empty() {
            return Err(CouchError::InvalidAttachment(
                "attachment name must not be empty".into(),
            ));
        }
        let (docid, rev) = Self::identity_for_attachment(doc)?;
        let path = format!("{}/{}", self.doc_path(&docid), escape_segment(name));
        self.transport
            .request(
                Request::new(Method::Put, path)
                    .param("rev", &json!(rev))
                    .raw(content_type.unwrap_or("application/octet-stream"), content),
            )
            .await?;
        self.refresh(doc, &docid).await
    }

    /// Fetches an attachment's raw bytes.
    pub async fn fetch_attachment(&self, docid: &str, name: &str) -> CouchResult<Vec<u8>> {
        let path = format!("{}/{}", self.doc_path(docid), escape_segment(name));
        Ok(self
            .transport
            .request(Request::new(Method::Get, path))
            .await?
            .body)
    }

    /// Deletes an attachment, re-fetching the document afterwards.
    #[tracing::instrument(skip(self, doc), fields(db = %self.name, name))]
    pub async fn delete_attachment(&self, doc: &mut Document, name: &str) -> CouchResult<()> {
        let (docid, rev) = Self::identity_for_attachment(doc)?;
        let path = format!("{}/{}", self.doc_path(&docid), escape_segment(name));
        self.transport
            .request(Request::new(Method::Delete, path).param("rev", &json!(rev)))
            .await?;
        self.refresh(doc, &docid).await
    }

    fn identity_for_attachment(doc: &Document) -> CouchResult<(String, String)> {
        let docid = doc
            .id()
            .ok_or_else(|| CouchError::BadValue("document has no id".into()))?;
        let rev = doc.rev().ok_or_else(|| {
            CouchError::BadValue("attachment mutation requires the current revision".into())
        })?;
        Ok((docid.to_string(), rev.to_string()))
    }

    async fn refresh(&self, doc: &mut Document, docid: &str) -> CouchResult<()> {
        let fresh = self.open(docid).await?;
        doc.merge_wire(fresh);
        Ok(())
    }

    /// Returns a raw view handle for `_all_docs` or a
    /// `designname/viewname` pair.
    pub fn view(&self, name: &str) -> CouchResult<View<T, Row>> {
        let name = name.strip_prefix('/').unwrap_or(name);
        let path = if name == "_all_docs" {
            self.sub_path("_all_docs")
        } else {
            let (dname, vname) = name.split_once('/').ok_or_else(|| {
                CouchError::BadValue(format!("view name '{name}' must be 'design/view'"))
            })?;
            self.sub_path(&format!(
                "_design/{}/_view/{}",
                escape_segment(dname),
                escape_segment(vname)
            ))
        };
        Ok(View::raw(self.transport.clone(), path, Params::new()))
    }

    /// Returns a raw view over every document in the database.
    pub fn all_docs(&self) -> View<T, Row> {
        View::raw(self.transport.clone(), self.sub_path("_all_docs"), Params::new())
    }

    /// Returns a view whose rows are wrapped into schema-typed documents.
    ///
    /// The wrapper prefers the embedded document (`include_docs`), falls
    /// back to an object-shaped row value combined with the row id, and
    /// rejects rows carrying neither.
    pub fn view_as(&self, schema: &Arc<Schema>, name: &str) -> CouchResult<View<T, Document>> {
        Ok(self.view(name)?.with_wrapper(document_wrapper(schema.clone())))
    }

    /// Returns an `_all_docs` view wrapped into schema-typed documents,
    /// with `include_docs` preset.
    pub fn all_docs_as(&self, schema: &Arc<Schema>) -> View<T, Document> {
        self.all_docs()
            .include_docs()
            .with_wrapper(document_wrapper(schema.clone()))
    }

    /// Compacts the database, or one design document's view index.
    pub async fn compact(&self, design: Option<&str>) -> CouchResult<()> {
        let path = match design {
            Some(name) => self.sub_path(&format!("_compact/{}", escape_segment(name))),
            None => self.sub_path("_compact"),
        };
        self.transport.request(Request::new(Method::Post, path)).await?;
        Ok(())
    }

    /// Removes stale view index files.
    pub async fn view_cleanup(&self) -> CouchResult<()> {
        self.transport
            .request(Request::new(Method::Post, self.sub_path("_view_cleanup")))
            .await?;
        Ok(())
    }

    /// Commits all in-memory documents to storage.
    pub async fn ensure_full_commit(&self) -> CouchResult<()> {
        self.transport
            .request(Request::new(Method::Post, self.sub_path("_ensure_full_commit")))
            .await?;
        Ok(())
    }

    /// Destructively resets the database, preserving only design
    /// documents.
    ///
    /// Design documents are collected first, the database is deleted, and
    /// the handle polls until the deletion is visible (bounded attempts)
    /// before recreating and restoring them; a fixed pause would race a
    /// slow deletion.
    #[tracing::instrument(skip(self), fields(db = %self.name))]
    pub async fn flush(&self) -> CouchResult<()> {
        let mut ddocs_view = self
            .all_docs()
            .range(json!("_design"), json!(format!("_design/{}", '\u{9999}')))
            .include_docs()
            .no_cache();
        let mut ddocs: Vec<JsonObject> = Vec::new();
        for row in ddocs_view.fetch().await?.rows {
            if let Some(mut doc) = row.doc {
                doc.remove("_rev");
                ddocs.push(doc);
            }
        }

        self.transport
            .request(Request::new(Method::Delete, self.root_path()))
            .await?;

        let mut attempts = 0;
        while self.exists().await? {
            attempts += 1;
            if attempts >= FLUSH_POLL_ATTEMPTS {
                return Err(CouchError::Transport(
                    "database deletion did not become visible in time".into(),
                ));
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }

        self.transport
            .request(Request::new(Method::Put, self.root_path()))
            .await?;

        if !ddocs.is_empty() {
            let entries = self.bulk_write(ddocs, false).await?;
            Self::collect_bulk_results(None, &entries)?;
        }
        Ok(())
    }
}

fn document_wrapper(
    schema: Arc<Schema>,
) -> impl Fn(Row) -> CouchResult<Document> + Send + Sync + 'static {
    move |row: Row| {
        if let Some(doc) = row.doc {
            return Document::wrap(&schema, doc);
        }
        match row.value {
            Value::Object(mut map) => {
                if let Some(rev) = map.remove("rev") {
                    map.insert("_rev".to_string(), rev);
                }
                match row.id {
                    Some(id) => {
                        map.insert("_id".to_string(), Value::String(id));
                        Document::wrap(&schema, map)
                    }
                    None => Err(CouchError::TypeConversion(
                        "view row carries no document to wrap".into(),
                    )),
                }
            }
            _ => Err(CouchError::TypeConversion(
                "view row carries no document to wrap".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Property;
    use crate::transport::Response;
    use async_trait::async_trait;

    #[derive(Debug, Clone)]
    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn request(&self, _req: Request) -> CouchResult<Response> {
            Err(CouchError::Transport("unreachable".into()))
        }
    }

    fn db() -> Database<NullTransport> {
        Database::new(NullTransport, "greetings")
    }

    #[test]
    fn view_names_resolve_to_design_paths() {
        assert_eq!(db().view("_all_docs").unwrap().path(), "greetings/_all_docs");
        assert_eq!(
            db().view("greetings/by_date").unwrap().path(),
            "greetings/_design/greetings/_view/by_date"
        );
        assert_eq!(
            db().view("/greetings/by_date").unwrap().path(),
            "greetings/_design/greetings/_view/by_date"
        );
        assert!(matches!(
            db().view("plainname"),
            Err(CouchError::BadValue(_))
        ));
    }

    #[test]
    fn row_wrapper_prefers_docs_and_falls_back_to_values() {
        let schema = Arc::new(
            Schema::builder("Greeting")
                .property(Property::string("content"))
                .build()
                .unwrap(),
        );
        let wrapper = document_wrapper(schema);

        let mut embedded = JsonObject::new();
        embedded.insert("_id".into(), json!("g1"));
        embedded.insert("content".into(), json!("hi"));
        let row = Row {
            id: Some("g1".into()),
            key: json!("g1"),
            value: json!({ "rev": "1-a" }),
            doc: Some(embedded),
        };
        let doc = wrapper(row).unwrap();
        assert_eq!(doc.id(), Some("g1"));

        let row = Row {
            id: Some("g2".into()),
            key: json!("g2"),
            value: json!({ "content": "yo", "rev": "1-b" }),
            doc: None,
        };
        let doc = wrapper(row).unwrap();
        assert_eq!(doc.id(), Some("g2"));
        assert_eq!(doc.rev(), Some("1-b"));

        let row = Row { id: None, key: json!(1), value: json!(3), doc: None };
        assert!(matches!(wrapper(row), Err(CouchError::TypeConversion(_))));
    }

    #[test]
    fn bulk_results_update_documents_and_collect_errors() {
        let schema = Arc::new(Schema::builder("Greeting").build().unwrap());
        let mut docs = vec![
            Document::new(&schema).unwrap(),
            Document::new(&schema).unwrap(),
            Document::new(&schema).unwrap(),
        ];
        let entries: Vec<JsonObject> = vec![
            serde_json::from_value(json!({ "id": "a", "rev": "1-a" })).unwrap(),
            serde_json::from_value(
                json!({ "id": "b", "error": "conflict", "reason": "Document update conflict." }),
            )
            .unwrap(),
            serde_json::from_value(json!({ "id": "c", "rev": "1-c" })).unwrap(),
        ];

        let err = Database::<NullTransport>::collect_bulk_results(Some(&mut docs), &entries)
            .unwrap_err();
        match err {
            CouchError::BulkSave(report) => {
                assert_eq!(report.errors.len(), 1);
                assert_eq!(report.errors[0].index, 1);
                assert_eq!(report.errors[0].error, "conflict");
                assert_eq!(report.saved.len(), 2);
            }
            other => panic!("expected BulkSave, got {other:?}"),
        }
        assert_eq!(docs[0].rev(), Some("1-a"));
        assert_eq!(docs[1].rev(), None);
        assert_eq!(docs[2].rev(), Some("1-c"));
    }
}
