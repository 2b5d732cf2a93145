//! Trading-hours predicate used to stretch poll intervals outside the session.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::America::New_York;

/// Answers whether the primary equity market is open at an instant.
pub trait TradingCalendar: Send + Sync {
    /// `true` while regular trading is in session.
    fn is_market_open(&self, at: DateTime<Utc>) -> bool;
}

/// A market that never closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOpen;

impl TradingCalendar for AlwaysOpen {
    fn is_market_open(&self, _at: DateTime<Utc>) -> bool {
        true
    }
}

/// Calendar handle whose implementation can be replaced while workers hold it.
#[derive(Clone)]
pub struct SharedCalendar(Arc<RwLock<Arc<dyn TradingCalendar>>>);

impl SharedCalendar {
    #[must_use]
    pub fn new(calendar: Arc<dyn TradingCalendar>) -> Self {
        Self(Arc::new(RwLock::new(calendar)))
    }

    /// Swap in `calendar` for every holder of this handle.
    pub fn replace(&self, calendar: Arc<dyn TradingCalendar>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = calendar;
    }

    fn current(&self) -> Arc<dyn TradingCalendar> {
        Arc::clone(&self.0.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl TradingCalendar for SharedCalendar {
    fn is_market_open(&self, at: DateTime<Utc>) -> bool {
        self.current().is_market_open(at)
    }
}

impl std::fmt::Debug for SharedCalendar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCalendar").finish_non_exhaustive()
    }
}

/// NYSE regular session: 09:30 to 16:00 America/New_York, Monday to Friday,
/// excluding configured holidays.
#[derive(Debug, Clone, Default)]
pub struct UsEquityCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl UsEquityCalendar {
    /// Session open, local exchange time.
    pub const OPEN: (u32, u32) = (9, 30);
    /// Session close, local exchange time.
    pub const CLOSE: (u32, u32) = (16, 0);

    /// Calendar with the given holidays.
    #[must_use]
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    /// Parse `YYYY-MM-DD` holiday strings from configuration, skipping invalid ones.
    #[must_use]
    pub fn from_config(holidays: &[String]) -> Self {
        let parsed = holidays.iter().filter_map(|raw| {
            match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::warn!(holiday = %raw, error = %e, "ignoring invalid market holiday");
                    None
                }
            }
        });
        Self::new(parsed)
    }

    /// Whether the exchange is closed all day on `date`.
    #[must_use]
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }
}

impl TradingCalendar for UsEquityCalendar {
    fn is_market_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&New_York);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        if self.is_holiday(local.date_naive()) {
            return false;
        }
        let (Some(open), Some(close)) = (
            NaiveTime::from_hms_opt(Self::OPEN.0, Self::OPEN.1, 0),
            NaiveTime::from_hms_opt(Self::CLOSE.0, Self::CLOSE.1, 0),
        ) else {
            return true;
        };
        let t = local.time();
        t >= open && t < close
    }
}
