//! Rangescan - paginated range scans over a partitioned time-series store.
//!
//! One cursor decides which records of each fetched page belong to the
//! caller's window and whether another page is needed. Three repositories
//! drive it: blocking, future-chained, and as a backpressured stream.

pub mod config;
pub mod mapper;
pub mod model;
pub mod repository;
pub mod scan;
pub mod storage;
pub mod utils;


pub use model::{RangeQuery, Stock};
pub use repository::{
    AsyncStockRepository, BlockingStockRepository, PageStream, ReactiveStockRepository,
    ScanCancelHandle, ScanCancellation, StockStream,
};
pub use scan::{PagedResults, ScanError};
pub use storage::{PagingState, StorageError};
