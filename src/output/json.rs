use anyhow::Result;
use serde::Serialize;

use crate::kpi::{CalculationType, DistributionProfile, Granularity, RepartitionLevel};
use crate::repartition::{PeriodValue, SlotOutcome};

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Shape of `preview -o json`: the request echo plus one granularity.
#[derive(Debug, Serialize)]
pub struct PreviewDocument<'a> {
    pub year: i32,
    pub target: f64,
    pub calculation_type: CalculationType,
    pub repartition_level: RepartitionLevel,
    pub distribution_profile: DistributionProfile,
    pub granularity: Granularity,
    pub values: &'a [PeriodValue],
    pub outcome: &'a SlotOutcome,
}
