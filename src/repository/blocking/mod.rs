//! Blocking stock repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::mapper::map_row;
use crate::model::{RangeQuery, Stock};
use crate::scan::{Cursor, NextAction, PagedResults, Result};
use crate::storage::{BlockingStockStore, PagingState, RangeScan};

/// Repository that runs every store call on the calling thread.
///
/// A scan returns only once the cursor is done; any failed page fetch
/// aborts it and nothing accumulated so far is returned.
pub struct BlockingStockRepository {
    store: Arc<dyn BlockingStockStore>,
    page_size: u32,
}

impl BlockingStockRepository {
    pub fn new(store: Arc<dyn BlockingStockStore>, page_size: u32) -> Self {
        Self { store, page_size }
    }

    pub fn from_config(store: Arc<dyn BlockingStockStore>, config: &ScanConfig) -> Self {
        Self::new(store, config.page_size)
    }

    /// Save a stock value, replacing any value at the same symbol and date.
    pub fn save(&self, stock: Stock) -> Result<Stock> {
        self.store.insert(&stock)?;
        Ok(stock)
    }

    pub fn delete_by_id(&self, symbol: &str, date: DateTime<Utc>) -> Result<()> {
        self.store.delete(symbol, date)?;
        Ok(())
    }

    pub fn find_by_id(&self, symbol: &str, date: DateTime<Utc>) -> Result<Option<Stock>> {
        let row = self.store.get(symbol, date)?;
        Ok(row.map(map_row).transpose()?)
    }

    /// Stocks for `symbol` in `[start, end)`, newest first, windowed by
    /// `offset` and `limit` across pages.
    pub fn find_all_by_symbol(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Stock>> {
        let scan = RangeScan::new(RangeQuery::new(symbol, start, end), self.page_size);
        self.scan(&scan, Cursor::offset_limit(offset, limit), None)
            .map(PagedResults::into_results)
    }

    /// One page of stocks, resuming from `paging_state` when given.
    pub fn find_page(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        paging_state: Option<&PagingState>,
    ) -> Result<PagedResults<Stock>> {
        let scan = RangeScan::new(RangeQuery::new(symbol, start, end), self.page_size);
        self.scan(&scan, Cursor::single_page(), paging_state)
    }

    fn scan(
        &self,
        scan: &RangeScan,
        mut cursor: Cursor,
        paging_state: Option<&PagingState>,
    ) -> Result<PagedResults<Stock>> {
        let symbol = &scan.query.symbol;
        let result = self.drive(scan, &mut cursor, paging_state);
        match &result {
            Ok(results) => debug!(
                symbol = %symbol,
                pages = cursor.pages(),
                records = results.len(),
                "Blocking range scan completed"
            ),
            Err(e) => warn!(
                symbol = %symbol,
                pages = cursor.pages(),
                error = %e,
                "Blocking range scan failed"
            ),
        }
        result
    }

    fn drive(
        &self,
        scan: &RangeScan,
        cursor: &mut Cursor,
        paging_state: Option<&PagingState>,
    ) -> Result<PagedResults<Stock>> {
        let mut page = self.store.execute_range_scan(scan, paging_state)?;
        let mut records = Vec::new();
        loop {
            let step = cursor.step(page)?;
            records.extend(step.records);
            match step.next {
                NextAction::Fetch(state) => {
                    page = self.store.execute_range_scan(scan, Some(&state))?;
                }
                NextAction::Done { next_page } => {
                    return Ok(PagedResults::new(records, next_page));
                }
            }
        }
    }
}
