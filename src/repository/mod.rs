//! Stock repositories.
//!
//! One repository per concurrency model, all driving the same
//! [`Cursor`](crate::scan::Cursor):
//! - [`BlockingStockRepository`]: every page fetch blocks the caller
//! - [`AsyncStockRepository`]: each page fetch is awaited in turn
//! - [`ReactiveStockRepository`]: pages are fetched as the stream is polled

mod blocking;
mod chained;
mod reactive;

pub use blocking::BlockingStockRepository;
pub use chained::{AsyncStockRepository, ScanCancelHandle, ScanCancellation};
pub use reactive::{PageStream, ReactiveStockRepository, StockStream};
