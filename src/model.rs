//! Domain values: stock records and range queries.

use std::fmt;

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;

/// Years past the epoch used as the exclusive end of an open-ended range.
const OPEN_RANGE_YEARS: u32 = 100;

/// A stock value recorded at a point in time.
///
/// The symbol is the partition key and the date is the clustering column,
/// stored in descending order. Two stocks with the same symbol and date
/// are the same logical entity; only `value` changes on update.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Stock {
    symbol: String,
    date: DateTime<Utc>,
    value: Decimal,
}

impl Stock {
    pub fn new(symbol: impl Into<String>, date: DateTime<Utc>, value: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            value,
        }
    }

    /// The stock symbol (partition key).
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The instant the value was recorded (clustering column).
    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    /// Same (symbol, date) identity with a replaced value.
    pub fn with_value(&self, value: Decimal) -> Self {
        Self {
            symbol: self.symbol.clone(),
            date: self.date,
            value,
        }
    }
}

impl fmt::Display for Stock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} = {}",
            self.symbol,
            self.date.to_rfc3339(),
            self.value
        )
    }
}

/// A half-open time range over one partition: `[start, end)`.
///
/// The bounds are bind parameters only; ordering between them is the
/// store's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl RangeQuery {
    pub fn new(symbol: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
        }
    }

    /// Build a range, filling missing bounds.
    ///
    /// A missing start binds to the Unix epoch, a missing end to one
    /// hundred years after it.
    pub fn with_defaults(
        symbol: impl Into<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        Self::new(
            symbol,
            start.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            end.unwrap_or_else(open_range_end),
        )
    }
}

fn open_range_end() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
        .checked_add_months(Months::new(OPEN_RANGE_YEARS * 12))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
