//! rangescan-demo
//!
//! Seeds an in-memory store and runs the same range scans through the
//! blocking, chained, and reactive repositories, logging what each returns.
//!
//! ## Configuration
//! - RANGESCAN_CONFIG: path to a YAML config file
//! - RANGESCAN__SCAN__PAGE_SIZE: page size hint sent with each scan
//! - RANGESCAN__STORAGE__PAGE_SIZES: page-size schedule of the in-memory store
//! - RANGESCAN_LOG: log filter (default "info")

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use tracing::{error, info};

use rangescan::config::Config;
use rangescan::storage::MockStockStore;
use rangescan::utils::bootstrap::init_tracing;
use rangescan::{
    AsyncStockRepository, BlockingStockRepository, RangeQuery, ReactiveStockRepository, Stock,
};

const SYMBOL: &str = "ABC";

/// T1..T5, one day apart.
fn timestamp(n: i64) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    let base = Utc
        .with_ymd_and_hms(2019, 1, 1, 0, 0, 0)
        .single()
        .ok_or("invalid base timestamp")?;
    Ok(base + Duration::days(n))
}

fn summarize(stocks: &[Stock]) -> String {
    stocks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load(None)?;
    info!(
        page_size = config.scan.page_size,
        default_limit = config.scan.default_limit,
        "Starting rangescan demo"
    );

    let store = Arc::new(MockStockStore::from_config(&config.storage));
    let blocking = BlockingStockRepository::new(store.clone(), 2);
    let chained = AsyncStockRepository::new(store.clone(), 2);
    let reactive = ReactiveStockRepository::new(store.clone(), 2);

    for n in 1..=5 {
        chained
            .save(Stock::new(SYMBOL, timestamp(n)?, Decimal::new(n * 100 + 25, 2)))
            .await?;
    }

    // Skip T5, take T4 and T3; the [T1] page is never fetched.
    let whole = RangeQuery::with_defaults(SYMBOL, None, None);
    let (start, end) = (whole.start, whole.end);

    let blocking_result = tokio::task::spawn_blocking(move || {
        blocking.find_all_by_symbol(SYMBOL, start, end, 1, 2)
    })
    .await??;
    info!(fetches = store.fetch_count(), "blocking: [{}]", summarize(&blocking_result));
    store.reset_fetch_count();

    let chained_result = chained.find_all_by_symbol(SYMBOL, start, end, 1, 2).await?;
    info!(fetches = store.fetch_count(), "chained: [{}]", summarize(&chained_result));
    store.reset_fetch_count();

    let reactive_result: Vec<Stock> = reactive
        .find_all_by_symbol(SYMBOL, start, end, 1, 2)
        .try_collect()
        .await?;
    info!(fetches = store.fetch_count(), "reactive: [{}]", summarize(&reactive_result));
    store.reset_fetch_count();

    // [T2, T5) with the configured page size and default limit.
    let bounded = AsyncStockRepository::from_config(store.clone(), &config.scan);
    let in_range = bounded
        .find_all_by_symbol(
            SYMBOL,
            timestamp(2)?,
            timestamp(5)?,
            0,
            config.scan.default_limit,
        )
        .await?;
    info!(fetches = store.fetch_count(), "bounded: [{}]", summarize(&in_range));

    // Walk every page by following its paging state.
    let mut paging_state = None;
    let mut page_number = 0;
    loop {
        let page = chained
            .find_page(SYMBOL, start, end, paging_state.as_ref())
            .await?;
        page_number += 1;
        info!(
            page = page_number,
            next_page = ?page.next_page().map(|state| state.to_url_safe()),
            "page: [{}]",
            summarize(page.results())
        );
        match page.next_page() {
            Some(state) => paging_state = Some(state.clone()),
            None => break,
        }
    }

    // A null value column fails the scan.
    let broken = rangescan::storage::RawRow {
        value: None,
        ..rangescan::storage::RawRow::from(&Stock::new(SYMBOL, timestamp(3)?, Decimal::ZERO))
    };
    store.insert_raw(SYMBOL, timestamp(3)?, broken)?;
    match chained.find_all_by_symbol(SYMBOL, start, end, 0, 5).await {
        Ok(stocks) => info!("unexpected success: [{}]", summarize(&stocks)),
        Err(e) => error!(malformed = e.is_malformed(), error = %e, "scan failed"),
    }

    Ok(())
}
