//! Shared range scan contract tests.
//!
//! Every repository must produce the same window over the same store,
//! whatever the page partitioning, and fetch no more pages than the window
//! needs. Each adapter implements [`ScanAdapter`] and runs these tests via
//! `run_range_scan_tests!`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::{StreamExt, TryStreamExt};
use rust_decimal::Decimal;

use rangescan::storage::{MockStockStore, RawRow, StorageError};
use rangescan::{
    AsyncStockRepository, BlockingStockRepository, PagedResults, PagingState,
    ReactiveStockRepository, ScanError, Stock,
};

pub const SYMBOL: &str = "ABC";

/// Midnight UTC, `n` days after 2019-01-01.
pub fn day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
}

pub fn make_stock(n: i64) -> Stock {
    Stock::new(SYMBOL, day(n), Decimal::new(n * 10 + 1, 1))
}

/// `ABC` at `day(1)..=day(count)`, served with the given page-size
/// schedule (empty means the scan's page size hint).
pub fn seeded_store(count: i64, page_sizes: Vec<u32>) -> Arc<MockStockStore> {
    let store = MockStockStore::new().with_page_sizes(page_sizes);
    let stocks: Vec<Stock> = (1..=count).map(make_stock).collect();
    store.seed(&stocks).unwrap();
    Arc::new(store)
}

/// Every stock of a `count`-record store, in store order.
pub fn store_order(count: i64) -> Vec<Stock> {
    (1..=count).rev().map(make_stock).collect()
}

/// Fewest fetches that can satisfy `offset`/`limit` over `count` records
/// served with `page_sizes`.
pub fn minimal_fetches(count: u64, page_sizes: &[u32], offset: u64, limit: u64) -> usize {
    if limit == 0 {
        return 1;
    }
    let target = (offset + limit).min(count);
    let mut served = 0u64;
    let mut fetches = 0usize;
    loop {
        let idx = fetches.min(page_sizes.len() - 1);
        served += u64::from(page_sizes[idx]);
        fetches += 1;
        if served >= target {
            return fetches;
        }
    }
}

/// A repository under test, driven through its own concurrency model.
#[async_trait]
pub trait ScanAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn find_all(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Stock>, ScanError>;
}

/// A repository that hands paging states back to the caller.
#[async_trait]
pub trait PagedScanAdapter: ScanAdapter {
    async fn find_page(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        paging_state: Option<PagingState>,
    ) -> Result<PagedResults<Stock>, ScanError>;
}

pub struct Blocking;

#[async_trait]
impl ScanAdapter for Blocking {
    fn name(&self) -> &'static str {
        "blocking"
    }

    async fn find_all(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Stock>, ScanError> {
        tokio::task::spawn_blocking(move || {
            BlockingStockRepository::new(store, page_size)
                .find_all_by_symbol(SYMBOL, start, end, offset, limit)
        })
        .await
        .expect("blocking scan panicked")
    }
}

#[async_trait]
impl PagedScanAdapter for Blocking {
    async fn find_page(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        paging_state: Option<PagingState>,
    ) -> Result<PagedResults<Stock>, ScanError> {
        tokio::task::spawn_blocking(move || {
            BlockingStockRepository::new(store, page_size).find_page(
                SYMBOL,
                day(0),
                day(1000),
                paging_state.as_ref(),
            )
        })
        .await
        .expect("blocking scan panicked")
    }
}

pub struct Chained;

#[async_trait]
impl ScanAdapter for Chained {
    fn name(&self) -> &'static str {
        "chained"
    }

    async fn find_all(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Stock>, ScanError> {
        AsyncStockRepository::new(store, page_size)
            .find_all_by_symbol(SYMBOL, start, end, offset, limit)
            .await
    }
}

#[async_trait]
impl PagedScanAdapter for Chained {
    async fn find_page(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        paging_state: Option<PagingState>,
    ) -> Result<PagedResults<Stock>, ScanError> {
        AsyncStockRepository::new(store, page_size)
            .find_page(SYMBOL, day(0), day(1000), paging_state.as_ref())
            .await
    }
}

pub struct Reactive;

#[async_trait]
impl ScanAdapter for Reactive {
    fn name(&self) -> &'static str {
        "reactive"
    }

    async fn find_all(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Stock>, ScanError> {
        ReactiveStockRepository::new(store, page_size)
            .find_all_by_symbol(SYMBOL, start, end, offset, limit)
            .try_collect()
            .await
    }
}

#[async_trait]
impl PagedScanAdapter for Reactive {
    async fn find_page(
        &self,
        store: Arc<MockStockStore>,
        page_size: u32,
        paging_state: Option<PagingState>,
    ) -> Result<PagedResults<Stock>, ScanError> {
        let mut page = ReactiveStockRepository::new(store, page_size).find_page_stream(
            SYMBOL,
            day(0),
            day(1000),
            paging_state,
        );
        let results: Vec<Stock> = page.by_ref().try_collect().await?;
        Ok(PagedResults::new(results, page.next_page()))
    }
}

// =============================================================================
// Offset/limit window tests
// =============================================================================

/// Same window over every partitioning of the same records, with the
/// fewest possible fetches.
pub async fn test_window_independent_of_partitioning<A: ScanAdapter>(adapter: &A) {
    const COUNT: i64 = 7;
    let schedules: [&[u32]; 5] = [&[1], &[2], &[7], &[1, 3, 2], &[3, 1]];
    let all = store_order(COUNT);

    for sizes in schedules {
        for offset in 0..=(COUNT as u64 + 1) {
            for limit in 0..=(COUNT as u64 + 1) {
                let store = seeded_store(COUNT, sizes.to_vec());
                let stocks = adapter
                    .find_all(store.clone(), 100, day(0), day(100), offset, limit)
                    .await
                    .expect("scan should succeed");

                let from = offset.min(COUNT as u64) as usize;
                let to = (offset + limit).min(COUNT as u64) as usize;
                let expected = &all[from..to];
                assert_eq!(
                    stocks,
                    expected,
                    "{}: pages {:?}, offset {}, limit {}",
                    adapter.name(),
                    sizes,
                    offset,
                    limit
                );
                assert_eq!(
                    store.fetch_count(),
                    minimal_fetches(COUNT as u64, sizes, offset, limit),
                    "{}: fetches for pages {:?}, offset {}, limit {}",
                    adapter.name(),
                    sizes,
                    offset,
                    limit
                );
            }
        }
    }
}

/// Skip T5, emit T4 and T3, stop without fetching [T1].
pub async fn test_offset_window_stops_early<A: ScanAdapter>(adapter: &A) {
    let store = seeded_store(5, vec![]);

    let stocks = adapter
        .find_all(store.clone(), 2, day(0), day(100), 1, 2)
        .await
        .unwrap();

    assert_eq!(stocks, vec![make_stock(4), make_stock(3)]);
    assert_eq!(store.fetch_count(), 2, "should not fetch the [T1] page");
}

/// Start is inclusive, end exclusive.
pub async fn test_range_bounds<A: ScanAdapter>(adapter: &A) {
    let store = seeded_store(5, vec![]);

    let stocks = adapter
        .find_all(store.clone(), 10, day(2), day(5), 0, 10)
        .await
        .unwrap();

    assert_eq!(stocks, vec![make_stock(4), make_stock(3), make_stock(2)]);
    assert_eq!(store.fetch_count(), 1);
}

pub async fn test_limit_zero_fetches_one_page<A: ScanAdapter>(adapter: &A) {
    let store = seeded_store(5, vec![]);

    let stocks = adapter
        .find_all(store.clone(), 2, day(0), day(100), 0, 0)
        .await
        .unwrap();

    assert!(stocks.is_empty());
    assert_eq!(store.fetch_count(), 1);
}

pub async fn test_offset_past_end_is_empty<A: ScanAdapter>(adapter: &A) {
    let store = seeded_store(5, vec![]);

    let stocks = adapter
        .find_all(store.clone(), 2, day(0), day(100), 5, 3)
        .await
        .unwrap();

    assert!(stocks.is_empty());
    assert_eq!(store.fetch_count(), 3);
}

pub async fn test_empty_partition<A: ScanAdapter>(adapter: &A) {
    let store = Arc::new(MockStockStore::new());

    let stocks = adapter
        .find_all(store.clone(), 2, day(0), day(100), 0, 10)
        .await
        .unwrap();

    assert!(stocks.is_empty());
    assert_eq!(store.fetch_count(), 1);
}

/// A store may report more pages and then serve an empty last one.
pub async fn test_trailing_empty_page<A: ScanAdapter>(adapter: &A) {
    let store = MockStockStore::new().with_trailing_empty_page(true);
    let stocks: Vec<Stock> = (1..=4).map(make_stock).collect();
    store.seed(&stocks).unwrap();
    let store = Arc::new(store);

    let found = adapter
        .find_all(store.clone(), 2, day(0), day(100), 0, 10)
        .await
        .unwrap();

    assert_eq!(found, store_order(4));
    assert_eq!(store.fetch_count(), 3);
}

/// A null column fails the scan; its page's records are dropped and no
/// later page is fetched.
pub async fn test_malformed_record_ends_scan<A: ScanAdapter>(adapter: &A) {
    let store = seeded_store(5, vec![]);
    let broken = RawRow {
        value: None,
        ..RawRow::from(&make_stock(3))
    };
    store.insert_raw(SYMBOL, day(3), broken).unwrap();

    let err = adapter
        .find_all(store.clone(), 2, day(0), day(100), 0, 5)
        .await
        .unwrap_err();

    assert!(err.is_malformed(), "{}: {:?}", adapter.name(), err);
    assert_eq!(err.to_string(), "Malformed record: column value cannot be null");
    assert_eq!(store.fetch_count(), 2);
}

pub async fn test_store_failure_is_propagated<A: ScanAdapter>(adapter: &A) {
    let store = seeded_store(5, vec![]);
    store.fail_on_fetch(2, StorageError::Unavailable("connection reset".to_string()));

    let err = adapter
        .find_all(store.clone(), 2, day(0), day(100), 0, 5)
        .await
        .unwrap_err();

    assert!(err.is_store_error(), "{}: {:?}", adapter.name(), err);
    assert!(!err.is_malformed());
    assert_eq!(store.fetch_count(), 2);
}

/// Writes are visible to the next scan.
pub async fn test_scan_sees_fresh_writes<A: ScanAdapter>(adapter: &A) {
    let store = seeded_store(3, vec![]);

    let before = adapter
        .find_all(store.clone(), 2, day(0), day(100), 0, 10)
        .await
        .unwrap();
    assert_eq!(before, store_order(3));

    store.seed(&[make_stock(4)]).unwrap();
    let after = adapter
        .find_all(store.clone(), 2, day(0), day(100), 0, 10)
        .await
        .unwrap();
    assert_eq!(after, store_order(4));
}

// =============================================================================
// Paging state tests
// =============================================================================

/// Following paging states visits every record once, in order.
pub async fn test_paging_state_round_trip<A: PagedScanAdapter>(adapter: &A) {
    for sizes in [vec![1], vec![2], vec![5], vec![2, 1, 3]] {
        let store = seeded_store(5, sizes.clone());
        let mut seen = Vec::new();
        let mut paging_state = None;
        let mut pages = 0;

        loop {
            let page = adapter
                .find_page(store.clone(), 100, paging_state.take())
                .await
                .unwrap();
            pages += 1;
            let (results, next_page) = page.into_parts();
            assert!(!results.is_empty(), "{}: empty page {}", adapter.name(), pages);
            seen.extend(results);
            match next_page {
                Some(state) => paging_state = Some(state),
                None => break,
            }
        }

        assert_eq!(seen, store_order(5), "{}: pages {:?}", adapter.name(), sizes);
        assert_eq!(store.fetch_count(), pages);
    }
}

pub async fn test_last_page_has_no_paging_state<A: PagedScanAdapter>(adapter: &A) {
    let store = seeded_store(3, vec![]);

    let page = adapter.find_page(store.clone(), 10, None).await.unwrap();

    assert_eq!(page.results(), store_order(3).as_slice());
    assert!(page.next_page().is_none());
    assert_eq!(store.fetch_count(), 1);
}

pub async fn test_paging_state_survives_url_encoding<A: PagedScanAdapter>(adapter: &A) {
    let store = seeded_store(4, vec![]);

    let first = adapter.find_page(store.clone(), 3, None).await.unwrap();
    let encoded = first.next_page().map(PagingState::to_url_safe).unwrap();
    let decoded = PagingState::from_url_safe(&encoded).unwrap();

    let second = adapter
        .find_page(store.clone(), 3, Some(decoded))
        .await
        .unwrap();
    assert_eq!(second.results(), &[make_stock(1)]);
    assert!(second.next_page().is_none());
}

pub async fn test_unreadable_paging_state<A: PagedScanAdapter>(adapter: &A) {
    let store = seeded_store(4, vec![]);

    let err = adapter
        .find_page(store, 2, Some(PagingState::new(vec![1, 2, 3])))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ScanError::Storage(StorageError::InvalidPagingState(_))
    ));
}

/// Run all offset/limit window tests against an adapter.
#[macro_export]
macro_rules! run_range_scan_tests {
    ($adapter:expr) => {
        use $crate::scan::*;

        test_window_independent_of_partitioning($adapter).await;
        println!("  test_window_independent_of_partitioning: PASSED");

        test_offset_window_stops_early($adapter).await;
        println!("  test_offset_window_stops_early: PASSED");

        test_range_bounds($adapter).await;
        println!("  test_range_bounds: PASSED");

        test_limit_zero_fetches_one_page($adapter).await;
        println!("  test_limit_zero_fetches_one_page: PASSED");

        test_offset_past_end_is_empty($adapter).await;
        println!("  test_offset_past_end_is_empty: PASSED");

        test_empty_partition($adapter).await;
        println!("  test_empty_partition: PASSED");

        test_trailing_empty_page($adapter).await;
        println!("  test_trailing_empty_page: PASSED");

        test_malformed_record_ends_scan($adapter).await;
        println!("  test_malformed_record_ends_scan: PASSED");

        test_store_failure_is_propagated($adapter).await;
        println!("  test_store_failure_is_propagated: PASSED");

        test_scan_sees_fresh_writes($adapter).await;
        println!("  test_scan_sees_fresh_writes: PASSED");
    };
}

/// Run all paging state tests against an adapter.
#[macro_export]
macro_rules! run_paged_scan_tests {
    ($adapter:expr) => {
        use $crate::scan::*;

        test_paging_state_round_trip($adapter).await;
        println!("  test_paging_state_round_trip: PASSED");

        test_last_page_has_no_paging_state($adapter).await;
        println!("  test_last_page_has_no_paging_state: PASSED");

        test_paging_state_survives_url_encoding($adapter).await;
        println!("  test_paging_state_survives_url_encoding: PASSED");

        test_unreadable_paging_state($adapter).await;
        println!("  test_unreadable_paging_state: PASSED");
    };
}
