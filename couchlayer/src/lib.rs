//! Main couchlayer crate providing a typed document mapping layer for
//! CouchDB-style document databases.
//!
//! This crate is the primary entry point for users of the couchlayer
//! framework. It re-exports the core types from the sub-crates and
//! provides convenient access to the available transports.
//!
//! # Features
//!
//! - **Typed document schemas** - Declare fields once with defaults,
//!   required flags and validators; undeclared fields round-trip as
//!   dynamic properties
//! - **One canonical wire form** - Every document is backed by a single
//!   JSON object; list/map mutation writes through with no sync step
//! - **Lazy views** - Cacheable, sliceable query handles over server-side
//!   indexes, with typed row wrapping
//! - **Revision-aware lifecycle** - Save with bounded conflict retry,
//!   bulk save with a partial-failure contract, attachments, copies
//!
//! # Quick Start
//!
//! ```ignore
//! use couchlayer::{memory::MemoryTransport, prelude::*};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> CouchResult<()> {
//!     let schema = Arc::new(
//!         Schema::builder("Greeting")
//!             .property(Property::string("author").default_value("anonymous"))
//!             .property(Property::string("content").required())
//!             .property(Property::datetime("date").default_with(chrono::Utc::now))
//!             .build()?,
//!     );
//!
//!     let server = Server::new(MemoryTransport::new());
//!     let db = server.create_db("greetings").await?;
//!
//!     // create and save
//!     let mut doc = Document::new(&schema)?;
//!     doc.set("content", "welcome to couchlayer")?;
//!     db.save(&mut doc, false).await?;
//!     assert!(doc.id().is_some() && doc.rev().is_some());
//!
//!     // dynamic fields persist too
//!     doc.set("tags", Vec::new())?;
//!     doc.array_mut("tags")?.push("greeting".into());
//!     db.save(&mut doc, false).await?;
//!
//!     // query
//!     let mut recent = db.all_docs_as(&schema);
//!     for greeting in recent.rows().await? {
//!         println!("{:?}", greeting.get("content")?);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Transports
//!
//! - [`memory`] - In-process node for development and testing
//! - [`http`] - `reqwest`-backed transport against real servers (requires
//!   the `http` feature)

pub mod prelude;

pub use couchlayer_core::{database, document, error, schema, transport, uuids, view};

// Re-export the JSON types documents are made of
pub use serde_json;

/// In-memory transport implementation.
pub mod memory {
    pub use couchlayer_memory::MemoryTransport;
}

/// HTTP transport implementation.
///
/// This module is only available when the `http` feature is enabled.
#[cfg(feature = "http")]
pub mod http {
    pub use couchlayer_http::{HttpTransport, HttpTransportBuilder};
}
