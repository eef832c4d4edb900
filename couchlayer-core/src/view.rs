//! Lazy, cacheable query handles over server-side view indexes.
//!
//! A [`View`] is a handle on an indexed server-side function. It holds the
//! query address and a parameter map, fetches on demand, and optionally
//! keeps the last raw result in a single-shot cache. Key and range
//! selection never mutate a view: every selector returns a **new** handle
//! with its own parameter set, so handles can be derived and shared
//! freely.
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//!
//! let mut recent = db
//!     .view("greetings/by_date")?
//!     .range(json!("2024-01-01"), json!("2024-12-31"))
//!     .include_docs();
//!
//! for row in recent.rows().await? {
//!     println!("{:?}", row.key);
//! }
//! ```
//!
//! An explicit key set switches the request to a body-bearing `POST`
//! (`{"keys": [...]}`) instead of a query-string `GET`; key sets can
//! exceed URL length limits, so this is a protocol requirement rather
//! than a cosmetic choice.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;

use crate::document::JsonObject;
use crate::error::{CouchError, CouchResult};
use crate::transport::{Method, Request, Transport};

/// View query parameters, keyed by parameter name.
pub type Params = Map<String, Value>;

/// One row of a view result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Identity of the emitting document, absent for reduced rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The emitted key.
    #[serde(default)]
    pub key: Value,
    /// The emitted value.
    #[serde(default)]
    pub value: Value,
    /// The full document, present when `include_docs` was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<JsonObject>,
}

/// Raw result of one view fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewResult {
    /// Total number of rows in the index, when the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    /// Offset of the first returned row within the index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// The matching rows, in index order.
    #[serde(default)]
    pub rows: Vec<Row>,
}

type RowWrapper<R> = Arc<dyn Fn(Row) -> CouchResult<R> + Send + Sync>;

/// A lazy query handle over a server-side view.
///
/// `T` is the transport; `R` the row output type - [`Row`] for raw views,
/// or whatever the row wrapper produces (typically
/// [`Document`](crate::document::Document)).
///
/// The result cache and parameter map are owned per handle; handles are
/// intended for single-writer use and fetching takes `&mut self`.
pub struct View<T, R = Row> {
    transport: T,
    path: String,
    params: Params,
    wrapper: RowWrapper<R>,
    cache_enabled: bool,
    cache: Option<ViewResult>,
}

impl<T: fmt::Debug, R> fmt::Debug for View<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("transport", &self.transport)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("cache_enabled", &self.cache_enabled)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl<T: Clone, R> Clone for View<T, R> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            path: self.path.clone(),
            params: self.params.clone(),
            wrapper: self.wrapper.clone(),
            cache_enabled: self.cache_enabled,
            cache: self.cache.clone(),
        }
    }
}

impl<T: Transport + Clone> View<T, Row> {
    /// Creates a raw (unwrapped) view over the given pre-escaped path.
    pub fn raw(transport: T, path: impl Into<String>, params: Params) -> Self {
        Self {
            transport,
            path: path.into(),
            params,
            wrapper: Arc::new(|row| Ok(row)),
            cache_enabled: true,
            cache: None,
        }
    }
}

impl<T: Transport + Clone, R> View<T, R> {
    /// Replaces the row wrapper, changing the output type. The result
    /// cache is dropped since cached raw rows were fetched for the old
    /// output type.
    pub fn with_wrapper<R2>(
        self,
        wrapper: impl Fn(Row) -> CouchResult<R2> + Send + Sync + 'static,
    ) -> View<T, R2> {
        View {
            transport: self.transport,
            path: self.path,
            params: self.params,
            wrapper: Arc::new(wrapper),
            cache_enabled: self.cache_enabled,
            cache: None,
        }
    }

    /// Disables the single-shot result cache for this handle.
    pub fn no_cache(mut self) -> Self {
        self.cache_enabled = false;
        self.cache = None;
        self
    }

    /// Returns the query address.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the current parameter map.
    pub fn params(&self) -> &Params {
        &self.params
    }

    fn derive(&self, params: Params) -> Self {
        Self {
            transport: self.transport.clone(),
            path: self.path.clone(),
            params,
            wrapper: self.wrapper.clone(),
            cache_enabled: self.cache_enabled,
            cache: None,
        }
    }

    /// Returns a new view with one parameter added or replaced.
    pub fn param(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut params = self.params.clone();
        params.insert(name.into(), value.into());
        self.derive(params)
    }

    /// Returns a new view selecting rows with exactly this key.
    pub fn key(&self, key: impl Into<Value>) -> Self {
        self.param("key", key)
    }

    /// Returns a new view selecting rows matching any of the given keys.
    ///
    /// Executing it issues the body-bearing multi-key query.
    pub fn keys(&self, keys: impl IntoIterator<Item = Value>) -> Self {
        self.param("keys", Value::Array(keys.into_iter().collect()))
    }

    /// Returns a new view with the range start bound set.
    pub fn start_key(&self, key: impl Into<Value>) -> Self {
        self.param("startkey", key)
    }

    /// Returns a new view with the range end bound set.
    pub fn end_key(&self, key: impl Into<Value>) -> Self {
        self.param("endkey", key)
    }

    /// Returns a new view selecting the key range `[start, end]`.
    pub fn range(&self, start: impl Into<Value>, end: impl Into<Value>) -> Self {
        self.start_key(start).end_key(end)
    }

    /// Returns a new view that asks the server to embed full documents.
    pub fn include_docs(&self) -> Self {
        self.param("include_docs", true)
    }

    /// Returns a new view limited to `n` rows.
    pub fn limit(&self, n: usize) -> Self {
        self.param("limit", n)
    }

    /// Returns a new view skipping the first `n` rows.
    pub fn skip(&self, n: usize) -> Self {
        self.param("skip", n)
    }

    /// Returns a new view iterating the index in reverse.
    pub fn descending(&self) -> Self {
        self.param("descending", true)
    }

    /// Executes the query, merging `extra` parameters over the view's own
    /// (extra wins).
    ///
    /// With an explicit `keys` parameter the query is issued as
    /// `POST {"keys": [...]}`; otherwise as a query-string `GET`. The raw
    /// result is cached unless caching is disabled for this handle or
    /// `nocache` is set.
    pub async fn fetch_with(&mut self, extra: &Params, nocache: bool) -> CouchResult<ViewResult> {
        let mut params = self.params.clone();
        for (name, value) in extra {
            params.insert(name.clone(), value.clone());
        }

        let request = match params.remove("keys") {
            Some(keys) => Request::new(Method::Post, &self.path)
                .query(&params)
                .json(json!({ "keys": keys })),
            None => Request::new(Method::Get, &self.path).query(&params),
        };

        let result: ViewResult = self.transport.request(request).await?.json()?;
        if self.cache_enabled && !nocache {
            self.cache = Some(result.clone());
        }
        Ok(result)
    }

    /// Executes the query with the view's own parameters.
    pub async fn fetch(&mut self) -> CouchResult<ViewResult> {
        self.fetch_with(&Params::new(), false).await
    }

    async fn maybe_fetch(&mut self) -> CouchResult<ViewResult> {
        if self.cache_enabled {
            if let Some(cached) = &self.cache {
                return Ok(cached.clone());
            }
        }
        self.fetch().await
    }

    /// Materializes all rows, passing each through the row wrapper.
    pub async fn rows(&mut self) -> CouchResult<Vec<R>> {
        let result = self.maybe_fetch().await?;
        result.rows.into_iter().map(|row| (self.wrapper)(row)).collect()
    }

    /// Number of rows in the (possibly cached) result.
    pub async fn count(&mut self) -> CouchResult<usize> {
        Ok(self.maybe_fetch().await?.rows.len())
    }

    /// First row, or `None` on an empty result.
    pub async fn first(&mut self) -> CouchResult<Option<R>> {
        let result = self.maybe_fetch().await?;
        result
            .rows
            .into_iter()
            .next()
            .map(|row| (self.wrapper)(row))
            .transpose()
    }

    /// Exactly one row.
    ///
    /// # Errors
    ///
    /// - `MultipleResults` when more than one row matches, regardless of
    ///   `require_result`
    /// - `NoResult` when no row matches and `require_result` is set;
    ///   otherwise an empty result returns `None`
    pub async fn one(&mut self, require_result: bool) -> CouchResult<Option<R>> {
        let count = self.count().await?;
        if count > 1 {
            return Err(CouchError::MultipleResults(count));
        }
        let first = self.first().await?;
        if first.is_none() && require_result {
            return Err(CouchError::NoResult);
        }
        Ok(first)
    }
}
