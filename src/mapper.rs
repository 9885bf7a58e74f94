//! Raw row to [`Stock`] mapping.

use crate::model::Stock;
use crate::storage::RawRow;

pub const SYMBOL: &str = "symbol";
pub const DATE: &str = "date";
pub const VALUE: &str = "value";

/// A mandatory column was null in a row returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("column {column} cannot be null")]
pub struct MalformedRecord {
    pub column: &'static str,
}

/// Map one raw row into a stock value.
pub fn map_row(row: RawRow) -> Result<Stock, MalformedRecord> {
    let symbol = row.symbol.ok_or(MalformedRecord { column: SYMBOL })?;
    let date = row.date.ok_or(MalformedRecord { column: DATE })?;
    let value = row.value.ok_or(MalformedRecord { column: VALUE })?;
    Ok(Stock::new(symbol, date, value))
}
