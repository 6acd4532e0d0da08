use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::kpi::{CalculationType, TargetEvent};
use crate::repartition::proportions::SUM_EPSILON;
use crate::repartition::DailySeries;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub events_applied: usize,
    pub days_adjusted: usize,
    pub rescaled: bool,
    /// Incremental series summed to ~0 after adjustment while the target did not.
    pub inconsistent: bool,
}

/// Applies `value = value * multiplier + addition` for each event in order,
/// then restores the annual sum for Incremental KPIs.
pub fn apply_events(
    series: &mut DailySeries,
    events: &[TargetEvent],
    calculation_type: CalculationType,
    target: f64,
) -> EventOutcome {
    let mut outcome = EventOutcome::default();
    if events.is_empty() {
        return outcome;
    }

    for event in events {
        if event.end_date < event.start_date {
            warn!(
                "ignoring event with end {} before start {}",
                event.end_date, event.start_date
            );
            continue;
        }
        outcome.events_applied += 1;
        for (day, value) in series.days.iter().zip(series.values.iter_mut()) {
            if event.contains(*day) {
                *value = *value * event.multiplier + event.addition;
                outcome.days_adjusted += 1;
            }
        }
    }

    if calculation_type == CalculationType::Average {
        return outcome;
    }

    let adjusted_total = series.total();
    if adjusted_total.abs() > SUM_EPSILON {
        let factor = target / adjusted_total;
        for value in &mut series.values {
            *value *= factor;
        }
        outcome.rescaled = true;
    } else if target.abs() <= SUM_EPSILON {
        series.values.iter_mut().for_each(|v| *v = 0.0);
    } else {
        warn!(
            "event-adjusted series sums to ~0 but target is {target}; leaving values unscaled"
        );
        outcome.inconsistent = true;
    }
    outcome
}
