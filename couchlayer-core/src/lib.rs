//! A typed document mapping layer for CouchDB-style document databases.
//!
//! This crate is the core of the couchlayer project and provides:
//!
//! - **Transport boundary** ([`transport`]) - The async HTTP seam every
//!   request goes through, with one fixed error taxonomy
//! - **Property model** ([`schema`]) - Typed field declarations, defaults,
//!   validators, and the pure wire conversions
//! - **Document instances** ([`document`]) - Mutable documents backed by
//!   one canonical wire form, with dynamic-field support
//! - **Views** ([`view`]) - Lazy, cacheable, sliceable query handles over
//!   server-side indexes
//! - **Identity pool** ([`uuids`]) - Batched allocation of server-issued
//!   identity tokens
//! - **Persistence lifecycle** ([`database`]) - Save with bounded conflict
//!   retry, bulk save with partial-failure reporting, delete, copy,
//!   attachments, flush
//! - **Error handling** ([`error`]) - Comprehensive error types and result
//!   types
//!
//! # Example
//!
//! ```ignore
//! use couchlayer_core::{database::Server, document::Document, schema::{Property, Schema}};
//! use std::sync::Arc;
//!
//! let schema = Arc::new(
//!     Schema::builder("Greeting")
//!         .property(Property::string("author").default_value("anonymous"))
//!         .property(Property::string("content").required())
//!         .property(Property::datetime("date").default_with(chrono::Utc::now))
//!         .build()?,
//! );
//!
//! let db = Server::new(transport).open_or_create_db("greetings").await?;
//! let mut doc = Document::new(&schema)?;
//! doc.set("content", "welcome to couchlayer")?;
//! db.save(&mut doc, false).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as couchlayer_core;

pub mod database;
pub mod document;
pub mod error;
pub mod schema;
pub mod transport;
pub mod uuids;
pub mod view;
