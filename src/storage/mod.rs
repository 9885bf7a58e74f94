//! Store client contract.
//!
//! The partitioned, sorted column store is an external collaborator. This
//! module defines what the range-scan engine needs from it: execute a bound
//! range query and hand back one page of raw rows, plus either a has-more
//! flag with a paging state to resume from, or nothing.
//!
//! Fetching the next page means re-executing the same [`RangeScan`] with
//! the paging state the previous page carried. The paging state is opaque
//! and is replayed byte-for-byte.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::model::{RangeQuery, Stock};

pub mod mock;

pub use mock::MockStockStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors reported by the store client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Store reported more pages but returned no paging state")]
    MissingPagingState,

    #[error("Invalid paging state: {0}")]
    InvalidPagingState(String),
}

/// Opaque continuation token issued by the store.
///
/// Never parsed by the engine. Cloning shares the underlying buffer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PagingState(Bytes);

impl PagingState {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode for transport in a URL query parameter (unpadded base64url).
    pub fn to_url_safe(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Decode a token previously produced by [`PagingState::to_url_safe`].
    pub fn from_url_safe(encoded: &str) -> Result<Self> {
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map(Self::new)
            .map_err(|e| StorageError::InvalidPagingState(e.to_string()))
    }
}

impl fmt::Debug for PagingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PagingState({})", hex::encode(&self.0))
    }
}

impl fmt::Display for PagingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// One row as the store returns it.
///
/// All three columns are mandatory in the schema; `None` means the row is
/// corrupt, not that the column was left unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub symbol: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub value: Option<Decimal>,
}

impl From<&Stock> for RawRow {
    fn from(stock: &Stock) -> Self {
        Self {
            symbol: Some(stock.symbol().to_string()),
            date: Some(stock.date()),
            value: Some(stock.value()),
        }
    }
}

/// A bound range query: the partition, the half-open range, and the page
/// size hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeScan {
    pub query: RangeQuery,
    pub page_size: u32,
}

impl RangeScan {
    pub fn new(query: RangeQuery, page_size: u32) -> Self {
        Self { query, page_size }
    }
}

/// One page returned by one store round-trip, in store order (descending
/// date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    rows: Vec<RawRow>,
    has_more: bool,
    paging_state: Option<PagingState>,
}

impl Page {
    pub fn new(rows: Vec<RawRow>, has_more: bool, paging_state: Option<PagingState>) -> Self {
        Self {
            rows,
            has_more,
            paging_state,
        }
    }

    /// The final page of a scan.
    pub fn last(rows: Vec<RawRow>) -> Self {
        Self::new(rows, false, None)
    }

    /// A page with more to come, resumable from `paging_state`.
    pub fn with_more(rows: Vec<RawRow>, paging_state: PagingState) -> Self {
        Self::new(rows, true, Some(paging_state))
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn paging_state(&self) -> Option<&PagingState> {
        self.paging_state.as_ref()
    }

    pub fn into_parts(self) -> (Vec<RawRow>, bool, Option<PagingState>) {
        (self.rows, self.has_more, self.paging_state)
    }
}

/// Async store client.
///
/// Implementations must be safe to share between independent scans.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Execute a range scan, starting from the beginning of the range or
    /// resuming from `paging_state`.
    async fn execute_range_scan(
        &self,
        scan: &RangeScan,
        paging_state: Option<&PagingState>,
    ) -> Result<Page>;

    /// Insert or replace the row at (symbol, date).
    async fn insert(&self, stock: &Stock) -> Result<()>;

    async fn delete(&self, symbol: &str, date: DateTime<Utc>) -> Result<()>;

    async fn get(&self, symbol: &str, date: DateTime<Utc>) -> Result<Option<RawRow>>;
}

/// Blocking store client. Every call blocks the calling thread until the
/// store answers.
pub trait BlockingStockStore: Send + Sync {
    fn execute_range_scan(
        &self,
        scan: &RangeScan,
        paging_state: Option<&PagingState>,
    ) -> Result<Page>;

    fn insert(&self, stock: &Stock) -> Result<()>;

    fn delete(&self, symbol: &str, date: DateTime<Utc>) -> Result<()>;

    fn get(&self, symbol: &str, date: DateTime<Utc>) -> Result<Option<RawRow>>;
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Fixed page-size schedule for the in-memory store. The nth page of a
    /// scan uses the nth entry, the last entry repeating. Empty means use
    /// the scan's page size hint.
    pub page_sizes: Vec<u32>,
    /// Report `has_more` on a page that ends exactly at the end of the
    /// range, followed by an empty final page.
    pub trailing_empty_page: bool,
}
