//! Convenient re-exports of commonly used types from couchlayer.
//!
//! Import this prelude module to quickly access the most frequently used
//! types and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use couchlayer::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schema and property declarations
//! - Document instances and typed field values
//! - Server/database handles and the copy target variants
//! - View handles and row types
//! - The transport boundary and error types

pub use couchlayer_core::{
    database::{CopyTarget, Database, Server},
    document::{Document, JsonObject},
    error::{BulkDocError, BulkSaveError, BulkSaved, CouchError, CouchResult},
    schema::{FieldValue, Property, PropertyKind, Schema, SchemaBuilder},
    transport::{Body, Method, Request, Response, Transport},
    uuids::UuidPool,
    view::{Params, Row, View, ViewResult},
};
