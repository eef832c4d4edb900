//! Client-side pool of server-allocated identity tokens.
//!
//! Saving a document with no identity would otherwise cost one extra round
//! trip per save; the pool fetches identifiers from the server's `_uuids`
//! endpoint in configurable batches and hands them out locally.

use mea::mutex::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{CouchError, CouchResult};
use crate::transport::{Method, Request, Transport};

const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
struct UuidsResponse {
    uuids: Vec<String>,
}

/// A shared, refillable pool of identity tokens.
///
/// Cloning shares the underlying pool. The pool lock is held across the
/// refill round trip, so two concurrent requesters can never be handed the
/// same token, and at most one refill request is in flight at a time.
#[derive(Clone)]
pub struct UuidPool<T> {
    transport: T,
    batch_size: usize,
    pool: Arc<Mutex<Vec<String>>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for UuidPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UuidPool")
            .field("transport", &self.transport)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl<T: Transport> UuidPool<T> {
    /// Creates a pool with the default batch size.
    pub fn new(transport: T) -> Self {
        Self::with_batch_size(transport, DEFAULT_BATCH_SIZE)
    }

    /// Creates a pool refilling `batch_size` identifiers per round trip.
    pub fn with_batch_size(transport: T, batch_size: usize) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
            pool: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Takes the next identity token, refilling the pool when exhausted.
    pub async fn next(&self) -> CouchResult<String> {
        let mut pool = self.pool.lock().await;
        if pool.is_empty() {
            self.refill(&mut pool, 1).await?;
        }
        pool.pop()
            .ok_or_else(|| CouchError::Transport("identifier allocation returned no uuids".into()))
    }

    /// Takes `count` identity tokens in one go, refilling as needed.
    pub async fn take(&self, count: usize) -> CouchResult<Vec<String>> {
        let mut pool = self.pool.lock().await;
        while pool.len() < count {
            let before = pool.len();
            self.refill(&mut pool, count).await?;
            if pool.len() == before {
                return Err(CouchError::Transport(
                    "identifier allocation returned no uuids".into(),
                ));
            }
        }
        let keep = pool.len() - count;
        Ok(pool.split_off(keep))
    }

    async fn refill(&self, pool: &mut Vec<String>, at_least: usize) -> CouchResult<()> {
        let count = self
            .batch_size
            .max(at_least)
            .saturating_sub(pool.len())
            .max(1);
        tracing::debug!(count, "refilling identity pool");
        let response: UuidsResponse = self
            .transport
            .request(Request::new(Method::Get, "_uuids").param("count", &json!(count)))
            .await?
            .json()?;
        pool.extend(response.uuids);
        Ok(())
    }
}
