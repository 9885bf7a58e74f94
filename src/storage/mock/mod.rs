//! In-memory store for tests and demos.
//!
//! Partitions are keyed by symbol and served in descending date order, a
//! page at a time. Paging states are this store's own encoding of where the
//! previous page ended; callers must treat them as opaque.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    BlockingStockStore, Page, PagingState, RangeScan, RawRow, Result, StockStore, StorageConfig,
    StorageError,
};
use crate::model::Stock;

/// Rows of one partition, keyed by date.
type Partition = BTreeMap<DateTime<Utc>, RawRow>;

/// Paging state layout: page index (u32 BE), then the last served date as
/// seconds (i64 BE) and subsecond nanos (u32 BE).
const PAGING_STATE_LEN: usize = 16;

/// Mock stock store that keeps partitions in memory.
#[derive(Default)]
pub struct MockStockStore {
    partitions: RwLock<HashMap<String, Partition>>,
    page_sizes: Vec<u32>,
    trailing_empty_page: bool,
    fetches: AtomicUsize,
    fail_on_fetch: Mutex<Option<(usize, StorageError)>>,
}

impl MockStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new()
            .with_page_sizes(config.page_sizes.clone())
            .with_trailing_empty_page(config.trailing_empty_page)
    }

    /// Serve the nth page of every scan with `sizes[n]` rows, repeating the
    /// last entry. Overrides the scan's page size hint.
    pub fn with_page_sizes(mut self, sizes: Vec<u32>) -> Self {
        self.page_sizes = sizes;
        self
    }

    /// Claim more pages when a page ends exactly at the end of the range.
    /// The follow-up fetch returns an empty final page.
    pub fn with_trailing_empty_page(mut self, enabled: bool) -> Self {
        self.trailing_empty_page = enabled;
        self
    }

    /// Insert stocks directly, bypassing fetch counting.
    pub fn seed<'a>(&self, stocks: impl IntoIterator<Item = &'a Stock>) -> Result<()> {
        let mut partitions = self.write()?;
        for stock in stocks {
            partitions
                .entry(stock.symbol().to_string())
                .or_default()
                .insert(stock.date(), RawRow::from(stock));
        }
        Ok(())
    }

    /// Store a row as-is, including rows with missing columns.
    pub fn insert_raw(&self, symbol: &str, date: DateTime<Utc>, row: RawRow) -> Result<()> {
        self.write()?
            .entry(symbol.to_string())
            .or_default()
            .insert(date, row);
        Ok(())
    }

    /// Fail the given range-scan fetch (1-based, counted across all scans).
    pub fn fail_on_fetch(&self, fetch: usize, error: StorageError) {
        if let Ok(mut slot) = self.fail_on_fetch.lock() {
            *slot = Some((fetch, error));
        }
    }

    pub fn clear_fail_on_fetch(&self) {
        if let Ok(mut slot) = self.fail_on_fetch.lock() {
            *slot = None;
        }
    }

    /// Number of range-scan round-trips served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reset_fetch_count(&self) {
        self.fetches.store(0, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Partition>>> {
        self.partitions
            .read()
            .map_err(|_| StorageError::Unavailable("partition lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Partition>>> {
        self.partitions
            .write()
            .map_err(|_| StorageError::Unavailable("partition lock poisoned".to_string()))
    }

    fn page_size(&self, page_index: u32, hint: u32) -> usize {
        let size = if self.page_sizes.is_empty() {
            hint
        } else {
            let idx = (page_index as usize).min(self.page_sizes.len() - 1);
            self.page_sizes[idx]
        };
        size.max(1) as usize
    }

    fn injected_failure(&self, fetch: usize) -> Option<StorageError> {
        let slot = self.fail_on_fetch.lock().ok()?;
        match slot.as_ref() {
            Some((n, error)) if *n == fetch => Some(error.clone()),
            _ => None,
        }
    }

    fn fetch_page(&self, scan: &RangeScan, paging_state: Option<&PagingState>) -> Result<Page> {
        let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.injected_failure(fetch) {
            return Err(error);
        }

        let (page_index, resume_before) = match paging_state {
            Some(state) => {
                let (index, date) = decode_paging_state(state)?;
                (index, Some(date))
            }
            None => (0, None),
        };
        let next_index = page_index.checked_add(1).ok_or_else(|| {
            StorageError::InvalidPagingState("page index out of range".to_string())
        })?;
        let size = self.page_size(page_index, scan.page_size);

        let query = &scan.query;
        let upper = match resume_before {
            Some(date) => date.min(query.end),
            None => query.end,
        };
        if query.start >= upper {
            return Ok(Page::last(vec![]));
        }

        let partitions = self.read()?;
        let Some(partition) = partitions.get(&query.symbol) else {
            return Ok(Page::last(vec![]));
        };

        let mut remaining = partition.range(query.start..upper).rev();
        let served: Vec<(DateTime<Utc>, RawRow)> = remaining
            .by_ref()
            .take(size)
            .map(|(date, row)| (*date, row.clone()))
            .collect();
        let more = remaining.next().is_some();
        let full_last_page = self.trailing_empty_page && served.len() == size;

        let last_date = served.last().map(|(date, _)| *date);
        let rows = served.into_iter().map(|(_, row)| row).collect();
        match last_date {
            Some(date) if more || full_last_page => Ok(Page::with_more(
                rows,
                encode_paging_state(next_index, date),
            )),
            _ => Ok(Page::last(rows)),
        }
    }

    fn insert_stock(&self, stock: &Stock) -> Result<()> {
        self.insert_raw(stock.symbol(), stock.date(), RawRow::from(stock))
    }

    fn delete_row(&self, symbol: &str, date: DateTime<Utc>) -> Result<()> {
        if let Some(partition) = self.write()?.get_mut(symbol) {
            partition.remove(&date);
        }
        Ok(())
    }

    fn get_row(&self, symbol: &str, date: DateTime<Utc>) -> Result<Option<RawRow>> {
        Ok(self
            .read()?
            .get(symbol)
            .and_then(|partition| partition.get(&date))
            .cloned())
    }
}

fn encode_paging_state(page_index: u32, last_date: DateTime<Utc>) -> PagingState {
    let mut bytes = Vec::with_capacity(PAGING_STATE_LEN);
    bytes.extend_from_slice(&page_index.to_be_bytes());
    bytes.extend_from_slice(&last_date.timestamp().to_be_bytes());
    bytes.extend_from_slice(&last_date.timestamp_subsec_nanos().to_be_bytes());
    PagingState::new(bytes)
}

fn decode_paging_state(state: &PagingState) -> Result<(u32, DateTime<Utc>)> {
    let bytes = state.as_bytes();
    if bytes.len() != PAGING_STATE_LEN {
        return Err(StorageError::InvalidPagingState(format!(
            "expected {} bytes, got {}",
            PAGING_STATE_LEN,
            bytes.len()
        )));
    }
    let mut index = [0u8; 4];
    index.copy_from_slice(&bytes[..4]);
    let mut seconds = [0u8; 8];
    seconds.copy_from_slice(&bytes[4..12]);
    let mut nanos = [0u8; 4];
    nanos.copy_from_slice(&bytes[12..]);

    let date = DateTime::from_timestamp(i64::from_be_bytes(seconds), u32::from_be_bytes(nanos))
        .ok_or_else(|| StorageError::InvalidPagingState("date out of range".to_string()))?;
    Ok((u32::from_be_bytes(index), date))
}

#[async_trait]
impl StockStore for MockStockStore {
    async fn execute_range_scan(
        &self,
        scan: &RangeScan,
        paging_state: Option<&PagingState>,
    ) -> Result<Page> {
        // Each page completes on a later poll, like a network round-trip.
        tokio::task::yield_now().await;
        self.fetch_page(scan, paging_state)
    }

    async fn insert(&self, stock: &Stock) -> Result<()> {
        self.insert_stock(stock)
    }

    async fn delete(&self, symbol: &str, date: DateTime<Utc>) -> Result<()> {
        self.delete_row(symbol, date)
    }

    async fn get(&self, symbol: &str, date: DateTime<Utc>) -> Result<Option<RawRow>> {
        self.get_row(symbol, date)
    }
}

impl BlockingStockStore for MockStockStore {
    fn execute_range_scan(
        &self,
        scan: &RangeScan,
        paging_state: Option<&PagingState>,
    ) -> Result<Page> {
        self.fetch_page(scan, paging_state)
    }

    fn insert(&self, stock: &Stock) -> Result<()> {
        self.insert_stock(stock)
    }

    fn delete(&self, symbol: &str, date: DateTime<Utc>) -> Result<()> {
        self.delete_row(symbol, date)
    }

    fn get(&self, symbol: &str, date: DateTime<Utc>) -> Result<Option<RawRow>> {
        self.get_row(symbol, date)
    }
}
