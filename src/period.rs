// 📅 Billing Periods - which calendar month a payment or a query belongs to
//
// A period is one calendar month. The active period depends on "today" and
// the configured due day:
//
//   today.day <= due_day  → this month
//   today.day >  due_day  → next month (rollover)
//
// Once the due day has passed, registrations target next month so a late
// payer cannot retroactively satisfy a month that is already past due.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// PERIOD ID
// ============================================================================

/// Calendar-month token identifying one billing cycle.
///
/// Internally the first day of the month, so ordering is calendar order and
/// month arithmetic is delegated to chrono.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodId(NaiveDate);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period '{input}', expected YYYY-MM")]
pub struct PeriodParseError {
    pub input: String,
}

impl PeriodId {
    /// Build a period from year and month (1..=12)
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(PeriodId)
    }

    /// Period containing the given date
    pub fn from_date(date: NaiveDate) -> Self {
        PeriodId(date - Days::new(u64::from(date.day0())))
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// The following calendar month (December rolls into January of next year)
    pub fn next(&self) -> PeriodId {
        PeriodId(self.0 + Months::new(1))
    }

    pub fn prev(&self) -> PeriodId {
        PeriodId(self.0 - Months::new(1))
    }

    pub fn days_in_month(&self) -> u32 {
        (self.next().0 - self.0).num_days() as u32
    }

    /// Due date inside this period, clamped to the month's last day.
    ///
    /// due_day = 31 in February → Feb 28 (or 29).
    pub fn due_date(&self, due_day: u32) -> NaiveDate {
        let day = due_day.clamp(1, self.days_in_month());
        self.0 + Days::new(u64::from(day - 1))
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for PeriodId {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PeriodParseError {
            input: s.to_string(),
        };

        let (year, month) = s.trim().split_once('-').ok_or_else(err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(err());
        }
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;

        PeriodId::new(year, month).ok_or_else(err)
    }
}

// Stored as the "YYYY-MM" string so it can be used as a JSON map key
impl Serialize for PeriodId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeriodId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// Active billing period for `today` given the configured due day.
pub fn resolve_period(today: NaiveDate, due_day: u32) -> PeriodId {
    let current = PeriodId::from_date(today);
    if today.day() > due_day {
        current.next()
    } else {
        current
    }
}

/// Due date of the active period
pub fn active_due_date(today: NaiveDate, due_day: u32) -> NaiveDate {
    resolve_period(today, due_day).due_date(due_day)
}

/// Whole days from `today` until the active period's due date (never negative)
pub fn days_until_due(today: NaiveDate, due_day: u32) -> i64 {
    (active_due_date(today, due_day) - today).num_days()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn period(s: &str) -> PeriodId {
        s.parse().unwrap()
    }

    #[test]
    fn test_resolve_before_and_on_due_day_is_current_month() {
        assert_eq!(resolve_period(date(2025, 1, 5), 10), period("2025-01"));
        assert_eq!(resolve_period(date(2025, 1, 10), 10), period("2025-01"));
    }

    #[test]
    fn test_resolve_after_due_day_rolls_over() {
        assert_eq!(resolve_period(date(2025, 1, 15), 10), period("2025-02"));
        assert_eq!(resolve_period(date(2025, 1, 11), 10), period("2025-02"));
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        assert_eq!(resolve_period(date(2024, 12, 20), 10), period("2025-01"));
        assert_eq!(resolve_period(date(2024, 12, 31), 30), period("2025-01"));
        assert_eq!(resolve_period(date(2024, 12, 31), 31), period("2024-12"));
    }

    #[test]
    fn test_resolve_property_over_a_year() {
        let start = date(2023, 1, 1);
        for offset in 0..(365 + 366) {
            let today = start + Days::new(offset);
            for due_day in 1..=31 {
                let resolved = resolve_period(today, due_day);
                let current = PeriodId::from_date(today);
                if today.day() <= due_day {
                    assert_eq!(resolved, current, "{} due {}", today, due_day);
                } else {
                    assert_eq!(resolved, current.next(), "{} due {}", today, due_day);
                }
            }
        }
    }

    #[test]
    fn test_due_date_clamps_to_short_months() {
        assert_eq!(period("2025-02").due_date(31), date(2025, 2, 28));
        assert_eq!(period("2024-02").due_date(30), date(2024, 2, 29));
        assert_eq!(period("2025-04").due_date(31), date(2025, 4, 30));
        assert_eq!(period("2025-03").due_date(31), date(2025, 3, 31));
        assert_eq!(period("2025-03").due_date(10), date(2025, 3, 10));
    }

    #[test]
    fn test_rollover_near_month_end() {
        // January 31st with due day 30 targets February, due on the 28th
        let today = date(2025, 1, 31);
        assert_eq!(resolve_period(today, 30), period("2025-02"));
        assert_eq!(active_due_date(today, 30), date(2025, 2, 28));
        assert_eq!(days_until_due(today, 30), 28);
    }

    #[test]
    fn test_days_until_due() {
        assert_eq!(days_until_due(date(2025, 1, 8), 10), 2);
        assert_eq!(days_until_due(date(2025, 1, 10), 10), 0);
        assert_eq!(days_until_due(date(2025, 1, 11), 10), 30);
        assert_eq!(days_until_due(date(2025, 4, 30), 31), 0);
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(period("2025-01").days_in_month(), 31);
        assert_eq!(period("2025-02").days_in_month(), 28);
        assert_eq!(period("2024-02").days_in_month(), 29);
        assert_eq!(period("2025-11").days_in_month(), 30);
    }

    #[test]
    fn test_parse_and_display() {
        let p = period("2025-02");
        assert_eq!(p.year(), 2025);
        assert_eq!(p.month(), 2);
        assert_eq!(p.to_string(), "2025-02");

        assert!("2025-13".parse::<PeriodId>().is_err());
        assert!("2025-2".parse::<PeriodId>().is_err());
        assert!("garbage".parse::<PeriodId>().is_err());
        assert!("{'2025-01': True}".parse::<PeriodId>().is_err());
    }

    #[test]
    fn test_ordering_is_calendar_order() {
        let mut periods = vec![period("2025-01"), period("2024-12"), period("2024-02")];
        periods.sort();
        assert_eq!(
            periods,
            vec![period("2024-02"), period("2024-12"), period("2025-01")]
        );
        assert_eq!(period("2024-12").next(), period("2025-01"));
        assert_eq!(period("2025-01").prev(), period("2024-12"));
    }

    #[test]
    fn test_serde_as_string_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(period("2025-02"), true);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"2025-02":true}"#);

        let back: std::collections::BTreeMap<PeriodId, bool> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
