//! Document and database semantics of the in-memory node.
//!
//! The node keeps every database as an id-ordered map of wire-form
//! documents. Revision tokens are `generation-suffix` strings; every write
//! checks the supplied revision against the stored one and bumps the
//! generation, which is all the optimistic-concurrency behavior the client
//! layer relies on.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use uuid::Uuid;

use couchlayer_core::document::JsonObject;
use couchlayer_core::error::{CouchError, CouchResult};

fn conflict() -> CouchError {
    CouchError::Conflict("Document update conflict.".into())
}

fn missing() -> CouchError {
    CouchError::NotFound("missing".into())
}

/// One database: wire-form documents keyed (and ordered) by id.
#[derive(Debug, Default)]
pub struct DbState {
    pub docs: BTreeMap<String, JsonObject>,
}

impl DbState {
    fn rev_of(&self, docid: &str) -> Option<&str> {
        self.docs
            .get(docid)
            .and_then(|doc| doc.get("_rev"))
            .and_then(Value::as_str)
    }
}

/// Full node state: databases plus the revision counter.
#[derive(Debug, Default)]
pub struct NodeState {
    pub dbs: BTreeMap<String, DbState>,
    rev_seq: u64,
}

/// Options for an `_all_docs` query, already decoded from the request.
#[derive(Debug, Default)]
pub struct AllDocsOptions {
    pub start_key: Option<String>,
    pub end_key: Option<String>,
    pub keys: Option<Vec<String>>,
    pub include_docs: bool,
    pub descending: bool,
    pub limit: Option<usize>,
    pub skip: usize,
}

impl NodeState {
    fn next_rev(&mut self, current: Option<&str>) -> String {
        let generation = current
            .and_then(|rev| rev.split('-').next())
            .and_then(|generation| generation.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        self.rev_seq += 1;
        format!("{generation}-{:08x}", self.rev_seq)
    }

    pub fn db(&self, name: &str) -> CouchResult<&DbState> {
        self.dbs
            .get(name)
            .ok_or_else(|| CouchError::NotFound("no_db_file".into()))
    }

    fn db_mut(&mut self, name: &str) -> CouchResult<&mut DbState> {
        self.dbs
            .get_mut(name)
            .ok_or_else(|| CouchError::NotFound("no_db_file".into()))
    }

    pub fn create_db(&mut self, name: &str) -> CouchResult<()> {
        if self.dbs.contains_key(name) {
            return Err(CouchError::RequestFailed {
                status: 412,
                reason: "The database could not be created, the file already exists.".into(),
            });
        }
        self.dbs.insert(name.to_string(), DbState::default());
        Ok(())
    }

    pub fn delete_db(&mut self, name: &str) -> CouchResult<()> {
        self.dbs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CouchError::NotFound("no_db_file".into()))
    }

    pub fn doc(&self, dbname: &str, docid: &str) -> CouchResult<&JsonObject> {
        self.db(dbname)?.docs.get(docid).ok_or_else(missing)
    }

    /// Writes a document, enforcing the revision guard.
    ///
    /// The supplied `_rev` must match the stored one exactly: a revision
    /// for a missing document, a missing revision for an existing one, or
    /// a stale revision all conflict. Returns the new revision.
    pub fn put_doc(
        &mut self,
        dbname: &str,
        docid: &str,
        mut body: JsonObject,
    ) -> CouchResult<String> {
        self.db(dbname)?;
        let current = self
            .dbs[dbname]
            .rev_of(docid)
            .map(str::to_string);
        let supplied = body
            .get("_rev")
            .and_then(Value::as_str)
            .map(str::to_string);
        if current != supplied {
            return Err(conflict());
        }

        let deleted = body
            .get("_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let rev = self.next_rev(current.as_deref());
        let db = self.db_mut(dbname)?;
        if deleted {
            db.docs.remove(docid);
        } else {
            body.insert("_id".to_string(), Value::String(docid.to_string()));
            body.insert("_rev".to_string(), Value::String(rev.clone()));
            db.docs.insert(docid.to_string(), body);
        }
        Ok(rev)
    }

    /// Deletes a document, enforcing the revision guard.
    pub fn delete_doc(&mut self, dbname: &str, docid: &str, rev: Option<&str>) -> CouchResult<String> {
        let current = self
            .db(dbname)?
            .rev_of(docid)
            .map(str::to_string)
            .ok_or_else(missing)?;
        if rev != Some(current.as_str()) {
            return Err(conflict());
        }
        let rev = self.next_rev(Some(&current));
        self.db_mut(dbname)?.docs.remove(docid);
        Ok(rev)
    }

    /// Applies a `_bulk_docs` payload, one entry per input document in
    /// input order.
    ///
    /// Under `all_or_nothing` conflict checking is skipped and every write
    /// is committed, matching the endpoint's contract.
    pub fn bulk_docs(
        &mut self,
        dbname: &str,
        docs: Vec<JsonObject>,
        all_or_nothing: bool,
    ) -> CouchResult<Vec<Value>> {
        self.db(dbname)?;
        let mut entries = Vec::with_capacity(docs.len());
        for mut body in docs {
            let docid = match body.get("_id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => {
                    let id = Uuid::new_v4().simple().to_string();
                    body.insert("_id".to_string(), Value::String(id.clone()));
                    id
                }
            };
            if all_or_nothing {
                // no conflict checking: overwrite on top of whatever is there
                let current = self.dbs[dbname].rev_of(&docid).map(str::to_string);
                body.insert(
                    "_rev".to_string(),
                    match current {
                        Some(rev) => Value::String(rev),
                        None => Value::Null,
                    },
                );
            }
            match self.put_doc(dbname, &docid, body) {
                Ok(rev) => entries.push(json!({ "id": docid, "rev": rev })),
                Err(CouchError::Conflict(reason)) => {
                    entries.push(json!({ "id": docid, "error": "conflict", "reason": reason }))
                }
                Err(other) => return Err(other),
            }
        }
        Ok(entries)
    }

    /// Serves an `_all_docs` query.
    pub fn all_docs(&self, dbname: &str, options: AllDocsOptions) -> CouchResult<Value> {
        let db = self.db(dbname)?;

        let row_for = |docid: &str, doc: &JsonObject| {
            let rev = doc.get("_rev").cloned().unwrap_or(Value::Null);
            let mut row = Map::new();
            row.insert("id".to_string(), Value::String(docid.to_string()));
            row.insert("key".to_string(), Value::String(docid.to_string()));
            row.insert("value".to_string(), json!({ "rev": rev }));
            if options.include_docs {
                row.insert("doc".to_string(), Value::Object(doc.clone()));
            }
            Value::Object(row)
        };

        let mut rows: Vec<Value> = match &options.keys {
            Some(keys) => keys
                .iter()
                .map(|key| match db.docs.get(key) {
                    Some(doc) => row_for(key, doc),
                    None => json!({ "key": key, "error": "not_found" }),
                })
                .collect(),
            None => db
                .docs
                .iter()
                .filter(|(docid, _)| {
                    options
                        .start_key
                        .as_deref()
                        .is_none_or(|start| docid.as_str() >= start)
                        && options
                            .end_key
                            .as_deref()
                            .is_none_or(|end| docid.as_str() <= end)
                })
                .map(|(docid, doc)| row_for(docid, doc))
                .collect(),
        };

        if options.descending {
            rows.reverse();
        }
        let rows: Vec<Value> = rows
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(json!({
            "total_rows": db.docs.len(),
            "offset": options.skip,
            "rows": rows,
        }))
    }

    /// Stores an inline attachment and bumps the document revision.
    pub fn put_attachment(
        &mut self,
        dbname: &str,
        docid: &str,
        name: &str,
        content_type: &str,
        bytes: &[u8],
        rev: Option<&str>,
    ) -> CouchResult<String> {
        let current = self
            .db(dbname)?
            .rev_of(docid)
            .map(str::to_string);
        if current.is_none() && rev.is_none() {
            return Err(missing());
        }
        if current.as_deref() != rev {
            return Err(conflict());
        }

        let new_rev = self.next_rev(current.as_deref());
        let db = self.db_mut(dbname)?;
        let doc = db.docs.get_mut(docid).ok_or_else(missing)?;
        let attachments = doc
            .entry("_attachments".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = attachments {
            map.insert(
                name.to_string(),
                json!({
                    "content_type": content_type,
                    "data": BASE64.encode(bytes),
                    "length": bytes.len(),
                }),
            );
        }
        doc.insert("_rev".to_string(), Value::String(new_rev.clone()));
        Ok(new_rev)
    }

    /// Returns an attachment's content type and decoded bytes.
    pub fn attachment(
        &self,
        dbname: &str,
        docid: &str,
        name: &str,
    ) -> CouchResult<(String, Vec<u8>)> {
        let doc = self.doc(dbname, docid)?;
        let entry = doc
            .get("_attachments")
            .and_then(Value::as_object)
            .and_then(|map| map.get(name))
            .and_then(Value::as_object)
            .ok_or_else(missing)?;
        let content_type = entry
            .get("content_type")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = entry
            .get("data")
            .and_then(Value::as_str)
            .map(|data| BASE64.decode(data))
            .transpose()
            .map_err(|e| CouchError::InvalidAttachment(e.to_string()))?
            .unwrap_or_default();
        Ok((content_type, bytes))
    }

    /// Removes an attachment and bumps the document revision.
    pub fn delete_attachment(
        &mut self,
        dbname: &str,
        docid: &str,
        name: &str,
        rev: Option<&str>,
    ) -> CouchResult<String> {
        let current = self
            .db(dbname)?
            .rev_of(docid)
            .map(str::to_string)
            .ok_or_else(missing)?;
        if rev != Some(current.as_str()) {
            return Err(conflict());
        }
        let new_rev = self.next_rev(Some(&current));
        let db = self.db_mut(dbname)?;
        let doc = db.docs.get_mut(docid).ok_or_else(missing)?;
        let removed = doc
            .get_mut("_attachments")
            .and_then(Value::as_object_mut)
            .and_then(|map| map.remove(name));
        if removed.is_none() {
            return Err(missing());
        }
        doc.insert("_rev".to_string(), Value::String(new_rev.clone()));
        Ok(new_rev)
    }

    /// Copies a document server-side, enforcing the revision guard on the
    /// destination.
    pub fn copy_doc(
        &mut self,
        dbname: &str,
        source: &str,
        dest: &str,
        dest_rev: Option<&str>,
    ) -> CouchResult<String> {
        let mut body = self.doc(dbname, source)?.clone();
        body.remove("_id");
        body.remove("_rev");
        if let Some(rev) = dest_rev {
            body.insert("_rev".to_string(), Value::String(rev.to_string()));
        }
        self.put_doc(dbname, dest, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> JsonObject {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn writes_are_revision_guarded() {
        let mut node = NodeState::default();
        node.create_db("db").unwrap();

        let rev1 = node.put_doc("db", "a", doc(&[("x", json!(1))])).unwrap();
        assert!(rev1.starts_with("1-"));

        // stale write: no revision supplied for an existing document
        assert!(matches!(
            node.put_doc("db", "a", doc(&[("x", json!(2))])),
            Err(CouchError::Conflict(_))
        ));

        let rev2 = node
            .put_doc("db", "a", doc(&[("x", json!(2)), ("_rev", json!(rev1))]))
            .unwrap();
        assert!(rev2.starts_with("2-"));
    }

    #[test]
    fn deletes_require_the_current_revision() {
        let mut node = NodeState::default();
        node.create_db("db").unwrap();
        let rev = node.put_doc("db", "a", doc(&[])).unwrap();

        assert!(matches!(
            node.delete_doc("db", "a", Some("1-bogus")),
            Err(CouchError::Conflict(_))
        ));
        node.delete_doc("db", "a", Some(&rev)).unwrap();
        assert!(matches!(node.doc("db", "a"), Err(CouchError::NotFound(_))));
    }

    #[test]
    fn bulk_docs_reports_per_document_outcomes_in_order() {
        let mut node = NodeState::default();
        node.create_db("db").unwrap();
        let rev = node.put_doc("db", "exists", doc(&[])).unwrap();

        let entries = node
            .bulk_docs(
                "db",
                vec![
                    doc(&[("_id", json!("fresh"))]),
                    doc(&[("_id", json!("exists"))]), // stale: no rev
                    doc(&[("_id", json!("exists")), ("_rev", json!(rev))]),
                ],
                false,
            )
            .unwrap();

        assert_eq!(entries.len(), 3);
        assert!(entries[0].get("rev").is_some());
        assert_eq!(entries[1].get("error"), Some(&json!("conflict")));
        assert!(entries[2].get("rev").is_some());
    }

    #[test]
    fn all_or_nothing_skips_conflict_checking() {
        let mut node = NodeState::default();
        node.create_db("db").unwrap();
        node.put_doc("db", "a", doc(&[("x", json!(1))])).unwrap();

        let entries = node
            .bulk_docs("db", vec![doc(&[("_id", json!("a")), ("x", json!(2))])], true)
            .unwrap();
        assert!(entries[0].get("rev").is_some());
        assert_eq!(node.doc("db", "a").unwrap().get("x"), Some(&json!(2)));
    }

    #[test]
    fn all_docs_serves_ranges_and_key_sets() {
        let mut node = NodeState::default();
        node.create_db("db").unwrap();
        for id in ["a", "b", "c", "d"] {
            node.put_doc("db", id, doc(&[])).unwrap();
        }

        let result = node
            .all_docs(
                "db",
                AllDocsOptions {
                    start_key: Some("b".into()),
                    end_key: Some("c".into()),
                    ..AllDocsOptions::default()
                },
            )
            .unwrap();
        let rows = result.get("rows").unwrap().as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&json!("b")));

        let result = node
            .all_docs(
                "db",
                AllDocsOptions {
                    keys: Some(vec!["d".into(), "ghost".into()]),
                    ..AllDocsOptions::default()
                },
            )
            .unwrap();
        let rows = result.get("rows").unwrap().as_array().unwrap();
        assert_eq!(rows[0].get("id"), Some(&json!("d")));
        assert_eq!(rows[1].get("error"), Some(&json!("not_found")));
    }

    #[test]
    fn attachments_round_trip_and_bump_revisions() {
        let mut node = NodeState::default();
        node.create_db("db").unwrap();
        let rev1 = node.put_doc("db", "a", doc(&[])).unwrap();

        let rev2 = node
            .put_attachment("db", "a", "note.txt", "text/plain", b"hello", Some(&rev1))
            .unwrap();
        assert_ne!(rev1, rev2);

        let (content_type, bytes) = node.attachment("db", "a", "note.txt").unwrap();
        assert_eq!(content_type, "text/plain");
        assert_eq!(bytes, b"hello");

        let rev3 = node
            .delete_attachment("db", "a", "note.txt", Some(&rev2))
            .unwrap();
        assert_ne!(rev2, rev3);
        assert!(matches!(
            node.attachment("db", "a", "note.txt"),
            Err(CouchError::NotFound(_))
        ));
    }

    #[test]
    fn copies_enforce_the_destination_guard() {
        let mut node = NodeState::default();
        node.create_db("db").unwrap();
        node.put_doc("db", "src", doc(&[("x", json!(9))])).unwrap();
        let dest_rev = node.put_doc("db", "dest", doc(&[])).unwrap();

        // unguarded copy over an existing destination conflicts
        assert!(matches!(
            node.copy_doc("db", "src", "dest", None),
            Err(CouchError::Conflict(_))
        ));
        node.copy_doc("db", "src", "dest", Some(&dest_rev)).unwrap();
        assert_eq!(node.doc("db", "dest").unwrap().get("x"), Some(&json!(9)));

        node.copy_doc("db", "src", "fresh", None).unwrap();
        assert_eq!(node.doc("db", "fresh").unwrap().get("x"), Some(&json!(9)));
    }
}
