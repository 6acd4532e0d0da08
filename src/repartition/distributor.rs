use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::kpi::KpiId;
use crate::repartition::proportions::SUM_EPSILON;

/// One linked sub KPI as seen for a single target slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubShare {
    pub kpi_id: KpiId,
    pub weight: f64,
    pub is_manual: bool,
    pub target: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedValue {
    pub kpi_id: KpiId,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub master_target: f64,
    pub manual_sum: f64,
    pub remaining: f64,
    pub weight_total: f64,
    pub derived: Vec<DerivedValue>,
}

impl Distribution {
    pub fn value_for(&self, kpi_id: KpiId) -> Option<f64> {
        self.derived
            .iter()
            .find(|d| d.kpi_id == kpi_id)
            .map(|d| d.value)
    }
}

/// Splits what manual subs leave of the master target across the derived subs.
///
/// Pure in its inputs: re-running with the same manual values reproduces the
/// same derived values, whatever the derived subs currently hold.
pub fn distribute(master_target: f64, subs: &[SubShare]) -> Distribution {
    let manual_sum: f64 = subs
        .iter()
        .filter(|s| s.is_manual)
        .map(|s| s.target.unwrap_or(0.0))
        .sum();
    let remaining = master_target - manual_sum;
    let derived_subs: Vec<&SubShare> = subs.iter().filter(|s| !s.is_manual).collect();
    let weight_total: f64 = derived_subs.iter().map(|s| s.weight.max(0.0)).sum();

    if remaining < 0.0 && !derived_subs.is_empty() {
        warn!(
            "manual sub targets ({manual_sum}) exceed master target ({master_target}); derived subs go negative"
        );
    }

    let derived = derived_subs
        .iter()
        .map(|s| {
            let value = if weight_total > SUM_EPSILON {
                remaining * (s.weight.max(0.0) / weight_total)
            } else {
                remaining / derived_subs.len() as f64
            };
            DerivedValue {
                kpi_id: s.kpi_id,
                value,
            }
        })
        .collect();

    Distribution {
        master_target,
        manual_sum,
        remaining,
        weight_total,
        derived,
    }
}
