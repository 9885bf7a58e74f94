//! Async stock repository.
//!
//! Range scans issue the first page fetch, then chain one fetch per
//! further page the cursor asks for. Each page is its own await point;
//! nothing is spawned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::mapper::map_row;
use crate::model::{RangeQuery, Stock};
use crate::scan::{Cursor, NextAction, PagedResults, Result, ScanError};
use crate::storage::{Page, PagingState, RangeScan, StockStore};

/// Caller side of a scan cancellation signal.
pub struct ScanCancelHandle {
    cancel: watch::Sender<bool>,
}

impl ScanCancelHandle {
    /// A cancel handle and the cancellation signal it controls.
    pub fn pair() -> (Self, ScanCancellation) {
        let (cancel, cancelled) = watch::channel(false);
        (Self { cancel }, ScanCancellation { cancelled })
    }

    /// Ask the scan to stop before its next page fetch. A fetch already in
    /// flight completes.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Scan side of a cancellation signal.
#[derive(Clone)]
pub struct ScanCancellation {
    cancelled: watch::Receiver<bool>,
}

impl ScanCancellation {
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

/// Accumulates one scan's records across chained page fetches.
struct PageCollector {
    store: Arc<dyn StockStore>,
    scan: RangeScan,
    cursor: Cursor,
    records: Vec<Stock>,
    cancellation: Option<ScanCancellation>,
}

impl PageCollector {
    fn new(
        store: Arc<dyn StockStore>,
        scan: RangeScan,
        cursor: Cursor,
        cancellation: Option<ScanCancellation>,
    ) -> Self {
        Self {
            store,
            scan,
            cursor,
            records: Vec::new(),
            cancellation,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(ScanCancellation::is_cancelled)
    }

    /// Drive the cursor from the first page until it is done.
    async fn collect(&mut self, first: Page) -> Result<PagedResults<Stock>> {
        let mut page = first;
        loop {
            let step = self.cursor.step(page)?;
            self.records.extend(step.records);

            let paging_state = match step.next {
                NextAction::Fetch(state) => state,
                NextAction::Done { next_page } => {
                    let records = std::mem::take(&mut self.records);
                    return Ok(PagedResults::new(records, next_page));
                }
            };

            if self.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            page = self
                .store
                .execute_range_scan(&self.scan, Some(&paging_state))
                .await?;
        }
    }
}

/// Repository whose range scans complete as futures.
pub struct AsyncStockRepository {
    store: Arc<dyn StockStore>,
    page_size: u32,
}

impl AsyncStockRepository {
    pub fn new(store: Arc<dyn StockStore>, page_size: u32) -> Self {
        Self { store, page_size }
    }

    pub fn from_config(store: Arc<dyn StockStore>, config: &ScanConfig) -> Self {
        Self::new(store, config.page_size)
    }

    /// Save a stock value, replacing any value at the same symbol and date.
    pub async fn save(&self, stock: Stock) -> Result<Stock> {
        self.store.insert(&stock).await?;
        Ok(stock)
    }

    pub async fn delete_by_id(&self, symbol: &str, date: DateTime<Utc>) -> Result<()> {
        self.store.delete(symbol, date).await?;
        Ok(())
    }

    pub async fn find_by_id(&self, symbol: &str, date: DateTime<Utc>) -> Result<Option<Stock>> {
        let row = self.store.get(symbol, date).await?;
        Ok(row.map(map_row).transpose()?)
    }

    /// Stocks for `symbol` in `[start, end)`, newest first, windowed by
    /// `offset` and `limit` across pages.
    pub async fn find_all_by_symbol(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Stock>> {
        let scan = RangeScan::new(RangeQuery::new(symbol, start, end), self.page_size);
        self.scan(scan, Cursor::offset_limit(offset, limit), None, None)
            .await
            .map(PagedResults::into_results)
    }

    /// Like [`find_all_by_symbol`](Self::find_all_by_symbol), but gives up
    /// with [`ScanError::Cancelled`] instead of fetching another page once
    /// `cancellation` fires.
    pub async fn find_all_by_symbol_cancellable(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
        cancellation: ScanCancellation,
    ) -> Result<Vec<Stock>> {
        let scan = RangeScan::new(RangeQuery::new(symbol, start, end), self.page_size);
        self.scan(
            scan,
            Cursor::offset_limit(offset, limit),
            None,
            Some(cancellation),
        )
        .await
        .map(PagedResults::into_results)
    }

    /// One page of stocks, resuming from `paging_state` when given.
    pub async fn find_page(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        paging_state: Option<&PagingState>,
    ) -> Result<PagedResults<Stock>> {
        let scan = RangeScan::new(RangeQuery::new(symbol, start, end), self.page_size);
        self.scan(scan, Cursor::single_page(), paging_state, None)
            .await
    }

    async fn scan(
        &self,
        scan: RangeScan,
        cursor: Cursor,
        paging_state: Option<&PagingState>,
        cancellation: Option<ScanCancellation>,
    ) -> Result<PagedResults<Stock>> {
        let symbol = scan.query.symbol.clone();
        let first = match self.store.execute_range_scan(&scan, paging_state).await {
            Ok(page) => page,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Async range scan failed on first page");
                return Err(e.into());
            }
        };

        let mut collector = PageCollector::new(self.store.clone(), scan, cursor, cancellation);
        let result = collector.collect(first).await;
        match &result {
            Ok(results) => debug!(
                symbol = %symbol,
                pages = collector.cursor.pages(),
                records = results.len(),
                "Async range scan completed"
            ),
            Err(e) => warn!(
                symbol = %symbol,
                pages = collector.cursor.pages(),
                error = %e,
                "Async range scan failed"
            ),
        }
        result
    }
}
