use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::kpi::{CalculationType, RepartitionLevel, RepartitionWeights};
use crate::period::Period;
use crate::repartition::proportions::SUM_EPSILON;

/// Output of the period allocation resolver for one target slot.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodAllocation {
    /// Year level: the whole year is a single period.
    Unallocated,
    /// Incremental KPIs: absolute amount to spread over each period's days.
    Sums(BTreeMap<Period, f64>),
    /// Average KPIs: multiplier applied to the base average inside each period.
    Multipliers(BTreeMap<Period, f64>),
}

impl PeriodAllocation {
    pub fn get(&self, period: &Period) -> Option<f64> {
        match self {
            Self::Unallocated => None,
            Self::Sums(map) | Self::Multipliers(map) => map.get(period).copied(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepartitionCheck {
    pub total_pct: f64,
    pub within_tolerance: bool,
}

pub fn resolve_allocation(
    calculation_type: CalculationType,
    level: RepartitionLevel,
    weights: &RepartitionWeights,
    year: i32,
    target: f64,
) -> PeriodAllocation {
    let periods = Period::for_level(level, year);
    if periods.is_empty() {
        return PeriodAllocation::Unallocated;
    }

    match calculation_type {
        CalculationType::Incremental => {
            let raw: Vec<(Period, f64)> = periods
                .iter()
                .map(|p| (*p, raw_percentage(weights, p, year)))
                .collect();
            let total: f64 = raw.iter().map(|(_, pct)| pct).sum();
            let sums = if total <= SUM_EPSILON {
                let share = target / raw.len() as f64;
                raw.into_iter().map(|(p, _)| (p, share)).collect()
            } else {
                raw.into_iter()
                    .map(|(p, pct)| (p, target * pct / total))
                    .collect()
            };
            PeriodAllocation::Sums(sums)
        }
        CalculationType::Average => PeriodAllocation::Multipliers(
            periods
                .iter()
                .map(|p| (*p, weights.weight_for(p, year).unwrap_or(100.0) / 100.0))
                .collect(),
        ),
    }
}

/// Total of the user percentages for an Incremental repartition.
///
/// Returns `None` when there is nothing to check (Average KPIs, Year level,
/// or no percentages entered). The engine normalizes regardless; this only
/// feeds the caller-facing "not 100%" warning.
pub fn validate_repartition(
    calculation_type: CalculationType,
    level: RepartitionLevel,
    weights: &RepartitionWeights,
    year: i32,
    tolerance_pct: f64,
) -> Option<RepartitionCheck> {
    if calculation_type != CalculationType::Incremental || weights.is_empty() {
        return None;
    }
    let periods = Period::for_level(level, year);
    if periods.is_empty() {
        return None;
    }
    let total_pct: f64 = periods.iter().map(|p| raw_percentage(weights, p, year)).sum();
    Some(RepartitionCheck {
        total_pct,
        within_tolerance: (total_pct - 100.0).abs() <= tolerance_pct,
    })
}

fn raw_percentage(weights: &RepartitionWeights, period: &Period, year: i32) -> f64 {
    let pct = weights.weight_for(period, year).unwrap_or(0.0);
    if pct < 0.0 {
        warn!("negative repartition percentage {pct} for {period}, treating as 0");
        return 0.0;
    }
    pct
}
