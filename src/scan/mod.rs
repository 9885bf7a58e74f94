//! Range-scan engine.
//!
//! [`Cursor`] is the windowing state machine shared by every adapter in
//! [`crate::repository`]. [`PagedResults`] is what a completed scan hands
//! back to its caller.

mod cursor;

pub use cursor::{Cursor, NextAction, Step, Window};

use crate::mapper::MalformedRecord;
use crate::storage::{PagingState, StorageError};

/// Result type for range scans.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors that abort a range scan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// The store returned a row with a null mandatory column.
    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] MalformedRecord),

    /// A page fetch failed. Passed through from the store unchanged.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scan cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedRecord(_))
    }

    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The outcome of one completed scan: records in store order, and the
/// paging state to resume from when the scan was a single page.
///
/// `next_page` is `None` when the store has nothing further, and always
/// `None` for offset/limit scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResults<T> {
    results: Vec<T>,
    next_page: Option<PagingState>,
}

impl<T> PagedResults<T> {
    pub fn new(results: Vec<T>, next_page: Option<PagingState>) -> Self {
        Self { results, next_page }
    }

    pub fn results(&self) -> &[T] {
        &self.results
    }

    pub fn next_page(&self) -> Option<&PagingState> {
        self.next_page.as_ref()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<T> {
        self.results
    }

    pub fn into_parts(self) -> (Vec<T>, Option<PagingState>) {
        (self.results, self.next_page)
    }
}
