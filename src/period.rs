use std::fmt::{Display, Formatter};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::kpi::RepartitionLevel;

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

pub const QUARTER_LABELS: [&str; 4] = ["Q1", "Q2", "Q3", "Q4"];

pub fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

pub fn days_in_year(year: i32) -> usize {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Every calendar day of `year`, in order.
pub fn year_days(year: i32) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| d.year() == year)
        .collect()
}

pub fn month_days(year: i32, month: u32) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| d.month() == month)
        .collect()
}

pub fn quarter_of_month(month: u32) -> u32 {
    (month.saturating_sub(1)) / 3 + 1
}

pub fn quarter_months(quarter: u32) -> [u32; 3] {
    let first = (quarter.clamp(1, 4) - 1) * 3 + 1;
    [first, first + 1, first + 2]
}

pub fn quarter_days(year: i32, quarter: u32) -> Vec<NaiveDate> {
    quarter_months(quarter)
        .iter()
        .flat_map(|m| month_days(year, *m))
        .collect()
}

pub fn month_name(month: u32) -> &'static str {
    MONTH_NAMES[(month.clamp(1, 12) - 1) as usize]
}

pub fn quarter_label(quarter: u32) -> &'static str {
    QUARTER_LABELS[(quarter.clamp(1, 4) - 1) as usize]
}

pub fn week_label(iso_year: i32, week: u32) -> String {
    format!("{iso_year}-W{week:02}")
}

pub fn day_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    date.weekday().number_from_monday() >= 6
}

/// One repartition period of a target year.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Month(u32),
    Quarter(u32),
    Week { iso_year: i32, week: u32 },
}

impl Period {
    /// Periods of `level` for `year`. `Year` has no per-period allocation.
    pub fn for_level(level: RepartitionLevel, year: i32) -> Vec<Period> {
        match level {
            RepartitionLevel::Year => Vec::new(),
            RepartitionLevel::Month => (1..=12).map(Period::Month).collect(),
            RepartitionLevel::Quarter => (1..=4).map(Period::Quarter).collect(),
            RepartitionLevel::Week => {
                let mut weeks: Vec<Period> = Vec::with_capacity(54);
                for day in year_days(year) {
                    let period = Period::of_date(RepartitionLevel::Week, day);
                    if let Some(period) = period {
                        if weeks.last() != Some(&period) {
                            weeks.push(period);
                        }
                    }
                }
                weeks
            }
        }
    }

    pub fn of_date(level: RepartitionLevel, date: NaiveDate) -> Option<Period> {
        match level {
            RepartitionLevel::Year => None,
            RepartitionLevel::Month => Some(Period::Month(date.month())),
            RepartitionLevel::Quarter => Some(Period::Quarter(quarter_of_month(date.month()))),
            RepartitionLevel::Week => {
                let iso = date.iso_week();
                Some(Period::Week {
                    iso_year: iso.year(),
                    week: iso.week(),
                })
            }
        }
    }

    /// Days of this period that fall inside `year`.
    pub fn days_in(&self, year: i32) -> Vec<NaiveDate> {
        match self {
            Period::Month(m) => month_days(year, *m),
            Period::Quarter(q) => quarter_days(year, *q),
            Period::Week { .. } => year_days(year)
                .into_iter()
                .filter(|d| Period::of_date(RepartitionLevel::Week, *d).as_ref() == Some(self))
                .collect(),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Period::Month(m) => month_name(*m).to_string(),
            Period::Quarter(q) => quarter_label(*q).to_string(),
            Period::Week { iso_year, week } => week_label(*iso_year, *week),
        }
    }

    /// Lenient match of a user-supplied repartition key against this period.
    ///
    /// Bare week numbers (`"7"`, `"W07"`) only address weeks whose ISO year is
    /// the target year; boundary weeks of neighbouring ISO years need the
    /// qualified `YYYY-Www` form.
    pub fn matches_key(&self, key: &str, year: i32) -> bool {
        let normalized = key.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return false;
        }
        match self {
            Period::Month(m) => {
                let name = month_name(*m).to_ascii_lowercase();
                normalized == name
                    || (normalized.len() == 3 && name.starts_with(&normalized))
                    || normalized.parse::<u32>().ok() == Some(*m)
            }
            Period::Quarter(q) => {
                let bare = normalized.strip_prefix('q').unwrap_or(&normalized);
                bare.parse::<u32>().ok() == Some(*q)
            }
            Period::Week { iso_year, week } => match parse_week_key(&normalized) {
                Some((Some(key_year), key_week)) => key_year == *iso_year && key_week == *week,
                Some((None, key_week)) => *iso_year == year && key_week == *week,
                None => false,
            },
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn parse_week_key(normalized: &str) -> Option<(Option<i32>, u32)> {
    if let Some((year, week)) = normalized.split_once("-w") {
        return Some((Some(year.parse().ok()?), week.parse().ok()?));
    }
    let bare = normalized.strip_prefix('w').unwrap_or(normalized);
    Some((None, bare.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{days_in_year, year_days, Period};
    use crate::kpi::RepartitionLevel;

    #[test]
    fn counts_leap_and_common_years() {
        assert_eq!(days_in_year(2024), 366);
        assert_eq!(days_in_year(2023), 365);
        assert_eq!(year_days(2024).len(), 366);
    }

    #[test]
    fn enumerates_weeks_touching_the_year() {
        // 2021-01-01 belongs to 2020-W53.
        let weeks = Period::for_level(RepartitionLevel::Week, 2021);
        assert_eq!(
            weeks.first(),
            Some(&Period::Week {
                iso_year: 2020,
                week: 53
            })
        );
        assert_eq!(weeks.len(), 53);

        // 2024-12-30 and 31 belong to 2025-W01.
        let weeks = Period::for_level(RepartitionLevel::Week, 2024);
        assert_eq!(
            weeks.last(),
            Some(&Period::Week {
                iso_year: 2025,
                week: 1
            })
        );
        let boundary = weeks.last().expect("missing boundary week");
        assert_eq!(boundary.days_in(2024).len(), 2);
    }

    #[test]
    fn matches_lenient_keys() {
        assert!(Period::Month(3).matches_key("March", 2024));
        assert!(Period::Month(3).matches_key("mar", 2024));
        assert!(Period::Month(3).matches_key("3", 2024));
        assert!(!Period::Month(3).matches_key("May", 2024));
        assert!(Period::Quarter(2).matches_key("q2", 2024));
        assert!(Period::Quarter(2).matches_key("2", 2024));

        let w1 = Period::Week {
            iso_year: 2024,
            week: 1,
        };
        let next_w1 = Period::Week {
            iso_year: 2025,
            week: 1,
        };
        assert!(w1.matches_key("W01", 2024));
        assert!(w1.matches_key("2024-W01", 2024));
        assert!(!next_w1.matches_key("W01", 2024));
        assert!(next_w1.matches_key("2025-W01", 2024));
    }

    #[test]
    fn quarter_days_cover_three_months() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 17).expect("valid date");
        assert_eq!(
            Period::of_date(RepartitionLevel::Quarter, date),
            Some(Period::Quarter(2))
        );
        assert_eq!(Period::Quarter(1).days_in(2024).len(), 31 + 29 + 31);
    }
}
