pub mod aggregate;
pub mod allocation;
pub mod daily;
pub mod distributor;
pub mod events;
pub mod proportions;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DistributionConfig;
use crate::kpi::{AnnualTarget, CalculationType, TargetSlot};
use crate::repartition::allocation::{resolve_allocation, validate_repartition, RepartitionCheck};
use crate::repartition::daily::{DailyRequest, DailyValueGenerator};
use crate::repartition::events::{apply_events, EventOutcome};
use crate::repartition::proportions::SUM_EPSILON;

pub use aggregate::{aggregate, PeriodValue, PeriodicValues};
pub use allocation::PeriodAllocation;
pub use distributor::{distribute, DerivedValue, Distribution, SubShare};

/// One value per calendar day of `year`, in calendar order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub year: i32,
    pub days: Vec<NaiveDate>,
    pub values: Vec<f64>,
}

impl DailySeries {
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.days.iter().copied().zip(self.values.iter().copied())
    }

    pub fn value_on(&self, date: NaiveDate) -> Option<f64> {
        let idx = self.days.binary_search(&date).ok()?;
        self.values.get(idx).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SlotOutcome {
    /// Target absent or ~0: every periodic row of the slot is removed.
    Cleared,
    Computed {
        values: PeriodicValues,
        events: EventOutcome,
        repartition: Option<RepartitionCheck>,
    },
}

impl SlotOutcome {
    /// Rows to write through `replace_periodic_values`; empty when cleared.
    pub fn periodic_values(&self) -> PeriodicValues {
        match self {
            Self::Cleared => PeriodicValues::default(),
            Self::Computed { values, .. } => values.clone(),
        }
    }
}

pub fn is_zero_target(target: Option<f64>) -> bool {
    target.map(|t| t.abs() <= SUM_EPSILON || !t.is_finite()).unwrap_or(true)
}

/// Runs allocation, daily generation, events and aggregation for one slot.
pub fn compute_slot(
    config: &DistributionConfig,
    calculation_type: CalculationType,
    target: &AnnualTarget,
    slot: TargetSlot,
) -> SlotOutcome {
    let value = target.target(slot);
    if is_zero_target(value) {
        debug!("{} slot {slot}: zero target, clearing", target.key());
        return SlotOutcome::Cleared;
    }
    let value = value.unwrap_or(0.0);

    let repartition = validate_repartition(
        calculation_type,
        target.repartition_level,
        &target.repartition_weights,
        target.year,
        config.repartition_tolerance_pct,
    );
    if let Some(check) = repartition.filter(|c| !c.within_tolerance) {
        warn!(
            "{}: repartition totals {:.2}% instead of 100%, normalizing",
            target.key(),
            check.total_pct
        );
    }

    let allocation = resolve_allocation(
        calculation_type,
        target.repartition_level,
        &target.repartition_weights,
        target.year,
        value,
    );
    let generator = DailyValueGenerator::new(config);
    let mut series = generator.generate(&DailyRequest {
        year: target.year,
        calculation_type,
        profile: target.distribution_profile,
        params: &target.profile_params,
        level: target.repartition_level,
        allocation: &allocation,
        target: value,
    });
    let events = apply_events(
        &mut series,
        &target.profile_params.events,
        calculation_type,
        value,
    );
    if events.inconsistent {
        warn!(
            "{} slot {slot}: events cancel the whole year, annual sum not preserved",
            target.key()
        );
    }

    debug!(
        "{} slot {slot}: {} profile over {} days, total {:.4}",
        target.key(),
        target.distribution_profile,
        series.values.len(),
        series.total()
    );
    SlotOutcome::Computed {
        values: aggregate(&series, calculation_type),
        events,
        repartition,
    }
}
