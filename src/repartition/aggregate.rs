use std::collections::BTreeMap;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::kpi::{CalculationType, Granularity, PeriodicKey, PeriodicRecord};
use crate::period::{day_label, month_name, quarter_label, quarter_of_month, week_label};
use crate::repartition::DailySeries;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodValue {
    pub period_key: String,
    pub value: f64,
}

impl PeriodValue {
    fn new(period_key: impl Into<String>, value: f64) -> Self {
        Self {
            period_key: period_key.into(),
            value,
        }
    }
}

/// The full periodic row set of one (year, site, kpi, slot).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodicValues {
    pub daily: Vec<PeriodValue>,
    pub weekly: Vec<PeriodValue>,
    pub monthly: Vec<PeriodValue>,
    pub quarterly: Vec<PeriodValue>,
}

impl PeriodicValues {
    pub fn get(&self, granularity: Granularity) -> &[PeriodValue] {
        match granularity {
            Granularity::Day => &self.daily,
            Granularity::Week => &self.weekly,
            Granularity::Month => &self.monthly,
            Granularity::Quarter => &self.quarterly,
        }
    }

    pub fn is_empty(&self) -> bool {
        Granularity::ALL.iter().all(|g| self.get(*g).is_empty())
    }

    pub fn row_count(&self) -> usize {
        Granularity::ALL.iter().map(|g| self.get(*g).len()).sum()
    }

    pub fn value(&self, granularity: Granularity, period_key: &str) -> Option<f64> {
        self.get(granularity)
            .iter()
            .find(|v| v.period_key == period_key)
            .map(|v| v.value)
    }

    pub fn to_records(&self, key: &PeriodicKey) -> Vec<PeriodicRecord> {
        Granularity::ALL
            .iter()
            .flat_map(|g| {
                self.get(*g).iter().map(move |v| PeriodicRecord {
                    year: key.target.year,
                    site_id: key.target.site_id,
                    kpi_id: key.target.kpi_id,
                    target_slot: key.slot,
                    granularity: *g,
                    period_key: v.period_key.clone(),
                    value: v.value,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    sum: f64,
    count: usize,
}

impl Bucket {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn resolve(&self, calculation_type: CalculationType) -> f64 {
        match calculation_type {
            CalculationType::Incremental => self.sum,
            CalculationType::Average if self.count > 0 => self.sum / self.count as f64,
            CalculationType::Average => 0.0,
        }
    }
}

/// Rolls a daily series up into weeks, months and quarters.
///
/// Quarters are derived from the monthly figures, never from raw days.
pub fn aggregate(series: &DailySeries, calculation_type: CalculationType) -> PeriodicValues {
    let mut weeks: BTreeMap<(i32, u32), Bucket> = BTreeMap::new();
    let mut months: BTreeMap<u32, Bucket> = BTreeMap::new();
    let mut daily = Vec::with_capacity(series.values.len());

    for (day, value) in series.iter() {
        daily.push(PeriodValue::new(day_label(day), value));
        let iso = day.iso_week();
        weeks.entry((iso.year(), iso.week())).or_default().push(value);
        if day.year() == series.year {
            months.entry(day.month()).or_default().push(value);
        }
    }

    let weekly = weeks
        .into_iter()
        .map(|((iso_year, week), bucket)| {
            PeriodValue::new(week_label(iso_year, week), bucket.resolve(calculation_type))
        })
        .collect();

    let month_values: Vec<(u32, f64)> = months
        .into_iter()
        .map(|(month, bucket)| (month, bucket.resolve(calculation_type)))
        .collect();

    let mut quarters: BTreeMap<u32, Bucket> = BTreeMap::new();
    for (month, value) in &month_values {
        quarters
            .entry(quarter_of_month(*month))
            .or_default()
            .push(*value);
    }

    PeriodicValues {
        daily,
        weekly,
        monthly: month_values
            .into_iter()
            .map(|(month, value)| PeriodValue::new(month_name(month), value))
            .collect(),
        quarterly: quarters
            .into_iter()
            .map(|(q, bucket)| PeriodValue::new(quarter_label(q), bucket.resolve(calculation_type)))
            .collect(),
    }
}
