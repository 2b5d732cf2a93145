//! Price history series used for sparklines and trend summaries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::{EngineError, Symbol};

/// Look-back window of a history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HistoryRange {
    /// Intraday, current session.
    OneDay,
    /// Last five sessions.
    FiveDays,
    /// Last month.
    OneMonth,
}

impl HistoryRange {
    /// Every supported range.
    pub const ALL: [Self; 3] = [Self::OneDay, Self::FiveDays, Self::OneMonth];

    /// Short label used as configuration key and query value.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
        }
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for HistoryRange {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::InvalidArg(format!("unknown history range '{s}'")))
    }
}

/// One (timestamp, price) sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPoint {
    /// Sample time.
    pub ts: DateTime<Utc>,
    /// Closing price of the sample interval.
    pub price: Decimal,
}

/// Ordered price samples for one (symbol, range).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySeries {
    symbol: Symbol,
    range: HistoryRange,
    points: Vec<HistoryPoint>,
}

impl HistorySeries {
    /// Build a series, sorting by timestamp and keeping the last sample for
    /// duplicated timestamps.
    #[must_use]
    pub fn new(symbol: Symbol, range: HistoryRange, mut points: Vec<HistoryPoint>) -> Self {
        // Stable sort keeps provider order within equal timestamps; the later one wins.
        points.sort_by_key(|p| p.ts);
        let mut out: Vec<HistoryPoint> = Vec::with_capacity(points.len());
        for p in points {
            match out.last_mut() {
                Some(last) if last.ts == p.ts => *last = p,
                _ => out.push(p),
            }
        }
        Self {
            symbol,
            range,
            points: out,
        }
    }

    /// Symbol of the series.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Range of the series.
    #[must_use]
    pub const fn range(&self) -> HistoryRange {
        self.range
    }

    /// Samples in strictly increasing timestamp order.
    #[must_use]
    pub fn points(&self) -> &[HistoryPoint] {
        &self.points
    }

    /// Whether the provider returned no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// First sample.
    #[must_use]
    pub fn first(&self) -> Option<&HistoryPoint> {
        self.points.first()
    }

    /// Last sample.
    #[must_use]
    pub fn last(&self) -> Option<&HistoryPoint> {
        self.points.last()
    }

    /// Lowest price.
    #[must_use]
    pub fn min_price(&self) -> Option<Decimal> {
        self.points.iter().map(|p| p.price).min()
    }

    /// Highest price.
    #[must_use]
    pub fn max_price(&self) -> Option<Decimal> {
        self.points.iter().map(|p| p.price).max()
    }

    /// Percent change from the first to the last sample.
    #[must_use]
    pub fn change_percent(&self) -> Option<Decimal> {
        let first = self.first()?.price;
        let last = self.last()?.price;
        percent_change(first, last)
    }
}

/// `(to - from) / from * 100`, or `None` when `from` is zero.
#[must_use]
pub fn percent_change(from: Decimal, to: Decimal) -> Option<Decimal> {
    if from.is_zero() {
        return None;
    }
    let delta = to.checked_sub(from)?;
    delta
        .checked_div(from)?
        .checked_mul(Decimal::ONE_HUNDRED)
}
