//! Stream-based stock repository.
//!
//! Range scans are returned as a lazy [`StockStream`]. Nothing is fetched
//! until the stream is polled, and the next page is only fetched once the
//! subscriber has drained the records of the previous one. Dropping the
//! stream cancels the scan, including any fetch in flight.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::mapper::map_row;
use crate::model::{RangeQuery, Stock};
use crate::scan::{Cursor, NextAction, Result, ScanError};
use crate::storage::{PagingState, RangeScan, StockStore};

/// Stream of stocks in store order. Ends with an `Err` item if the scan
/// fails; records already yielded stay yielded.
pub type StockStream = BoxStream<'static, Result<Stock>>;

/// The records of one page, followed by the paging state of the next.
pub struct PageStream {
    records: StockStream,
    next_page: watch::Receiver<Option<PagingState>>,
}

impl PageStream {
    /// Paging state of the page after this one.
    ///
    /// Set once the stream has ended without error. `None` before that,
    /// and when this was the last page.
    pub fn next_page(&self) -> Option<PagingState> {
        self.next_page.borrow().clone()
    }
}

impl Stream for PageStream {
    type Item = Result<Stock>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.records.poll_next_unpin(cx)
    }
}

/// What the page source fetches when next polled.
enum Pending {
    Page(Option<PagingState>),
    Exhausted,
}

/// Pulls pages from the store on demand and feeds them to the cursor.
struct PageSource {
    store: Arc<dyn StockStore>,
    scan: RangeScan,
    cursor: Cursor,
    pending: Pending,
    next_page: Option<watch::Sender<Option<PagingState>>>,
}

impl PageSource {
    async fn next_batch(mut self) -> Result<Option<(Vec<Stock>, Self)>> {
        let paging_state = match std::mem::replace(&mut self.pending, Pending::Exhausted) {
            Pending::Page(state) => state,
            Pending::Exhausted => {
                debug!(
                    symbol = %self.scan.query.symbol,
                    pages = self.cursor.pages(),
                    records = self.cursor.emitted(),
                    "Reactive range scan completed"
                );
                return Ok(None);
            }
        };

        let page = self
            .store
            .execute_range_scan(&self.scan, paging_state.as_ref())
            .await
            .map_err(|e| {
                warn!(
                    symbol = %self.scan.query.symbol,
                    error = %e,
                    "Reactive range scan fetch failed"
                );
                e
            })?;
        let step = self.cursor.step(page).map_err(|e| {
            warn!(symbol = %self.scan.query.symbol, error = %e, "Reactive range scan failed");
            e
        })?;

        match step.next {
            NextAction::Fetch(state) => self.pending = Pending::Page(Some(state)),
            NextAction::Done { next_page } => {
                if let Some(sender) = &self.next_page {
                    sender.send_replace(next_page);
                }
            }
        }
        Ok(Some((step.records, self)))
    }
}

/// Repository whose range scans are backpressured streams.
pub struct ReactiveStockRepository {
    store: Arc<dyn StockStore>,
    page_size: u32,
}

impl ReactiveStockRepository {
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

    /// Stream the stocks for `symbol` in `[start, end)`, newest first,
    /// skipping `offset` and ending after `limit`.
    pub fn find_all_by_symbol(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> StockStream {
        let scan = RangeScan::new(RangeQuery::new(symbol, start, end), self.page_size);
        self.stream(scan, Cursor::offset_limit(offset, limit), None, None)
    }

    /// Stream the records of one page, resuming from `paging_state` when
    /// given. The next page's paging state is on the returned stream once
    /// it ends.
    pub fn find_page_stream(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        paging_state: Option<PagingState>,
    ) -> PageStream {
        let scan = RangeScan::new(RangeQuery::new(symbol, start, end), self.page_size);
        let (sender, next_page) = watch::channel(None);
        let records = self.stream(scan, Cursor::single_page(), paging_state, Some(sender));
        PageStream { records, next_page }
    }

    fn stream(
        &self,
        scan: RangeScan,
        cursor: Cursor,
        paging_state: Option<PagingState>,
        next_page: Option<watch::Sender<Option<PagingState>>>,
    ) -> StockStream {
        let source = PageSource {
            store: self.store.clone(),
            scan,
            cursor,
            pending: Pending::Page(paging_state),
            next_page,
        };
        stream::try_unfold(source, PageSource::next_batch)
            .map_ok(|records| stream::iter(records.into_iter().map(Ok::<Stock, ScanError>)))
            .try_flatten()
            .boxed()
    }
}
