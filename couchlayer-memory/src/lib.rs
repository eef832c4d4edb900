//! In-memory database node for couchlayer.
//!
//! This crate provides a [`Transport`](couchlayer_core::transport::Transport)
//! implementation backed by an in-process, CouchDB-compatible node: revisioned
//! documents with conflict detection, identifier allocation, bulk writes,
//! `_all_docs` queries with ranges and key sets, inline attachments and
//! server-side copies. It is ideal for development and testing - the whole
//! persistence lifecycle runs against it without a server.
//!
//! # Quick Start
//!
//! ```ignore
//! use couchlayer::{memory::MemoryTransport, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(MemoryTransport::new());
//!     let db = server.create_db("greetings").await?;
//!
//!     let mut doc = Document::new(&schema)?;
//!     doc.set("content", "hello")?;
//!     db.save(&mut doc, false).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! Named design-document views are not served (there is no view engine);
//! `_all_docs` covers the query surface.

#[allow(unused_extern_crates)]
extern crate self as couchlayer_memory;

pub mod node;
pub mod store;

pub use store::MemoryTransport;
