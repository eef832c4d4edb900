//! HTTP transport for couchlayer, backed by `reqwest`.
//!
//! This crate provides the [`Transport`](couchlayer_core::transport::Transport)
//! implementation used against real servers. Connection pooling lives in the
//! shared `reqwest` client; credentials, when configured, are attached to
//! every request.
//!
//! # Quick Start
//!
//! ```ignore
//! use couchlayer::{http::HttpTransport, prelude::*};
//!
//! let transport = HttpTransport::builder("http://127.0.0.1:5984")
//!     .basic_auth("admin", "secret")
//!     .build()?;
//! let server = Server::new(transport);
//! ```

#[allow(unused_extern_crates)]
extern crate self as couchlayer_http;

pub mod transport;

pub use transport::{HttpTransport, HttpTransportBuilder};
