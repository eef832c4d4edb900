//! End-to-end persistence lifecycle tests against the in-memory node.

use chrono::{TimeZone, Utc};
use couchlayer::memory::MemoryTransport;
use couchlayer::prelude::*;
use couchlayer::serde_json::json;
use couchlayer::transport::escape_docid;
use std::sync::Arc;

fn greeting_schema() -> Arc<Schema> {
    Arc::new(
        Schema::builder("Greeting")
            .property(Property::string("author").default_value("anonymous"))
            .property(Property::string("content").required())
            .property(Property::datetime("date"))
            .build()
            .unwrap(),
    )
}

async fn fresh_db(name: &str) -> (MemoryTransport, Database<MemoryTransport>) {
    let transport = MemoryTransport::new();
    let db = Server::new(transport.clone()).create_db(name).await.unwrap();
    (transport, db)
}

fn greeting(schema: &Arc<Schema>, content: &str) -> Document {
    let mut doc = Document::new(schema).unwrap();
    doc.set("content", content).unwrap();
    doc
}

#[tokio::test]
async fn first_save_assigns_identity_and_revision() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "hello");
    assert!(doc.is_new());
    db.save(&mut doc, false).await.unwrap();

    let id = doc.id().unwrap().to_string();
    assert!(!id.is_empty());
    assert!(doc.rev().unwrap().starts_with("1-"));
    assert!(!doc.is_new());

    let stored = db.open(&id).await.unwrap();
    assert_eq!(stored.get("content"), Some(&json!("hello")));
    assert_eq!(stored.get("doc_type"), Some(&json!("Greeting")));
}

#[tokio::test]
async fn save_validates_before_any_round_trip() {
    let (_, db) = fresh_db("greetings").await;
    let mut doc = Document::new(&greeting_schema()).unwrap();

    // required "content" is unset
    let err = db.save(&mut doc, false).await.unwrap_err();
    assert!(matches!(err, CouchError::BadValue(_)));
    assert!(doc.is_new());
}

#[tokio::test]
async fn stale_saves_conflict_unless_forced() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "original");
    db.save(&mut doc, false).await.unwrap();

    // a second handle on the same revision goes stale once doc advances
    let mut stale = Document::wrap(&schema, doc.to_wire()).unwrap();
    doc.set("content", "advanced").unwrap();
    db.save(&mut doc, false).await.unwrap();
    assert!(doc.rev().unwrap().starts_with("2-"));

    let stale_rev = stale.rev().unwrap().to_string();
    stale.set("content", "from the past").unwrap();
    let err = db.save(&mut stale, false).await.unwrap_err();
    assert!(matches!(err, CouchError::Conflict(_)));
    assert_eq!(stale.rev(), Some(stale_rev.as_str()), "document must stay untouched");

    // forced: one internal retry with the current revision
    db.save(&mut stale, true).await.unwrap();
    assert!(stale.rev().unwrap().starts_with("3-"));
    let stored = db.open(stale.id().unwrap()).await.unwrap();
    assert_eq!(stored.get("content"), Some(&json!("from the past")));
}

#[tokio::test]
async fn bulk_save_reports_partial_failures() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    // seed a document and advance it so an old revision is stale
    let mut seeded = greeting(&schema, "seeded");
    db.save(&mut seeded, false).await.unwrap();
    let old_rev = seeded.rev().unwrap().to_string();
    db.save(&mut seeded, false).await.unwrap();

    let mut stale = greeting(&schema, "stale update");
    stale.set_id(seeded.id().unwrap()).unwrap();
    stale.set_rev(old_rev.clone()).unwrap();

    let mut docs = vec![greeting(&schema, "first"), stale, greeting(&schema, "third")];
    let err = db.bulk_save(&mut docs, false).await.unwrap_err();

    match err {
        CouchError::BulkSave(report) => {
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].index, 1);
            assert_eq!(report.errors[0].error, "conflict");
            assert_eq!(report.saved.len(), 2);
        }
        other => panic!("expected BulkSave, got {other:?}"),
    }

    // accepted documents were updated in place even though the call failed
    assert!(docs[0].rev().unwrap().starts_with("1-"));
    assert!(docs[2].rev().unwrap().starts_with("1-"));
    assert_eq!(docs[1].rev(), Some(old_rev.as_str()));
}

#[tokio::test]
async fn bulk_save_assigns_identities_regardless_of_position() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut with_id = greeting(&schema, "middle");
    with_id.set_id("fixed-id").unwrap();

    // id-less documents surround one that has an id; every one must get an
    // identity, not just a contiguous run
    let mut docs = vec![
        greeting(&schema, "first"),
        with_id,
        greeting(&schema, "last"),
    ];
    db.bulk_save(&mut docs, false).await.unwrap();

    for doc in &docs {
        assert!(doc.id().is_some());
        assert!(doc.rev().is_some());
    }
    assert_eq!(docs[1].id(), Some("fixed-id"));
    assert_ne!(docs[0].id(), docs[2].id());
}

#[tokio::test]
async fn bulk_delete_marks_and_removes_documents() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut docs = vec![greeting(&schema, "a"), greeting(&schema, "b")];
    db.bulk_save(&mut docs, false).await.unwrap();
    assert_eq!(db.len().await.unwrap(), 2);

    db.bulk_delete(&mut docs, false).await.unwrap();
    assert_eq!(db.len().await.unwrap(), 0);
}

#[tokio::test]
async fn delete_returns_the_document_to_new_status() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "short-lived");
    db.save(&mut doc, false).await.unwrap();
    let id = doc.id().unwrap().to_string();

    db.delete(&mut doc).await.unwrap();
    assert!(doc.is_new());
    assert_eq!(doc.id(), None);
    assert!(!db.contains(&id).await.unwrap());
}

#[tokio::test]
async fn delete_by_bare_id_discovers_the_revision() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "by id");
    doc.set_id("byid").unwrap();
    db.save(&mut doc, false).await.unwrap();

    db.delete_by_id("byid").await.unwrap();
    assert!(!db.contains("byid").await.unwrap());
    assert!(matches!(
        db.delete_by_id("byid").await,
        Err(CouchError::NotFound(_))
    ));
}

#[tokio::test]
async fn last_rev_matches_the_saved_revision() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "tracked");
    db.save(&mut doc, false).await.unwrap();
    let rev = db.last_rev(doc.id().unwrap()).await.unwrap();
    assert_eq!(doc.rev(), Some(rev.as_str()));
}

#[tokio::test]
async fn copies_land_under_fresh_and_guarded_targets() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut source = greeting(&schema, "copy me");
    source.set_id("source").unwrap();
    db.save(&mut source, false).await.unwrap();

    let copied = db.copy_doc("source", CopyTarget::Fresh).await.unwrap();
    assert_eq!(copied.get("content"), Some(&json!("copy me")));
    let copy_id = copied.get("_id").unwrap().as_str().unwrap();
    assert_ne!(copy_id, "source");

    // guarded copy over an existing document
    let mut target = greeting(&schema, "obsolete");
    target.set_id("target").unwrap();
    db.save(&mut target, false).await.unwrap();
    let replaced = db
        .copy_doc(
            "source",
            CopyTarget::Checked {
                id: "target".into(),
                rev: target.rev().unwrap().into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(replaced.get("content"), Some(&json!("copy me")));

    // Id target discovers the revision for an existing destination
    let rediscovered = db
        .copy_doc("source", CopyTarget::Id("target".into()))
        .await
        .unwrap();
    assert_eq!(rediscovered.get("content"), Some(&json!("copy me")));
}

#[tokio::test]
async fn attachments_advance_the_callers_revision() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "with attachment");
    db.save(&mut doc, false).await.unwrap();
    let rev_before = doc.rev().unwrap().to_string();

    db.put_attachment(&mut doc, "note.txt", b"hello".to_vec(), Some("text/plain"))
        .await
        .unwrap();
    assert_ne!(doc.rev(), Some(rev_before.as_str()), "revision must be refreshed");
    match doc.get("_attachments").unwrap() {
        FieldValue::Map(map) => assert!(map.contains_key("note.txt")),
        other => panic!("expected attachment stubs, got {other:?}"),
    }

    let bytes = db
        .fetch_attachment(doc.id().unwrap(), "note.txt")
        .await
        .unwrap();
    assert_eq!(bytes, b"hello");

    db.delete_attachment(&mut doc, "note.txt").await.unwrap();
    assert!(doc.rev().unwrap().starts_with("3-"));
    assert!(matches!(
        db.fetch_attachment(doc.id().unwrap(), "note.txt").await,
        Err(CouchError::NotFound(_))
    ));
}

#[tokio::test]
async fn flush_preserves_only_design_documents() {
    let (transport, db) = fresh_db("app").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "ephemeral");
    db.save(&mut doc, false).await.unwrap();
    transport
        .request(
            Request::new(
                Method::Put,
                format!("app/{}", escape_docid("_design/views")),
            )
            .json(json!({ "language": "javascript" })),
        )
        .await
        .unwrap();
    assert_eq!(db.len().await.unwrap(), 2);

    db.flush().await.unwrap();

    assert_eq!(db.len().await.unwrap(), 1);
    assert!(db.contains("_design/views").await.unwrap());
    let ddoc = db.open("_design/views").await.unwrap();
    assert_eq!(ddoc.get("language"), Some(&json!("javascript")));
    assert!(!db.contains(doc.id().unwrap()).await.unwrap());
}

#[tokio::test]
async fn open_or_create_saves_missing_documents() {
    let (_, db) = fresh_db("greetings").await;
    // every field needs a default so a fresh instance is valid as-is
    let schema = Arc::new(
        Schema::builder("Counter")
            .property(Property::integer("count").default_value(0))
            .build()
            .unwrap(),
    );

    let created = db.open_or_create_as(&schema, "fixed").await.unwrap();
    assert_eq!(created.id(), Some("fixed"));
    assert!(created.rev().is_some());

    let reopened = db.open_or_create_as(&schema, "fixed").await.unwrap();
    assert_eq!(reopened.rev(), created.rev());
}

#[tokio::test]
async fn wrapped_documents_round_trip_through_the_server() {
    let (_, db) = fresh_db("greetings").await;
    let schema = greeting_schema();

    let mut doc = greeting(&schema, "round trip");
    doc.set("tags", Vec::new()).unwrap();
    doc.array_mut("tags").unwrap().push(json!("persisted"));
    doc.set("date", Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        .unwrap();
    db.save(&mut doc, false).await.unwrap();

    let reopened = db.open_as(&schema, doc.id().unwrap()).await.unwrap();
    assert_eq!(reopened, doc);
    assert_eq!(
        reopened.to_wire().get("tags"),
        Some(&json!(["persisted"]))
    );
}

#[tokio::test]
async fn server_administration_round_trips() {
    let transport = MemoryTransport::new();
    let server = Server::new(transport);

    assert!(!server.version().await.unwrap().is_empty());
    assert!(server.all_dbs().await.unwrap().is_empty());

    server.create_db("one").await.unwrap();
    let opened = server.open_or_create_db("one").await.unwrap();
    assert_eq!(opened.name(), "one");
    assert!(server.contains("one").await.unwrap());

    assert!(matches!(
        server.open_db("missing").await,
        Err(CouchError::NotFound(_))
    ));

    let ids = server.uuids(3).await.unwrap();
    assert_eq!(ids.len(), 3);

    server.delete_db("one").await.unwrap();
    assert!(!server.contains("one").await.unwrap());
}
