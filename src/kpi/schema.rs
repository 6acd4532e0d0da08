use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kpi::params::{ProfileParams, RepartitionWeights};

pub type KpiId = i64;
pub type SiteId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CalculationType {
    /// Periodic values sum to the annual target.
    Incremental,
    /// Periodic values average to the (period-modulated) annual target.
    Average,
}

impl CalculationType {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Average => "average",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepartitionLevel {
    #[default]
    Year,
    Month,
    Quarter,
    Week,
}

impl RepartitionLevel {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Week => "week",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistributionProfile {
    #[default]
    Even,
    AnnualProgressive,
    AnnualSinusoidal,
    AnnualProgressiveWeekdayBias,
    MonthlySinusoidal,
    IntraPeriodProgressive,
    QuarterlyProgressive,
    QuarterlySinusoidal,
    EventBased,
}

impl DistributionProfile {
    pub const ALL: [DistributionProfile; 9] = [
        DistributionProfile::Even,
        DistributionProfile::AnnualProgressive,
        DistributionProfile::AnnualSinusoidal,
        DistributionProfile::AnnualProgressiveWeekdayBias,
        DistributionProfile::MonthlySinusoidal,
        DistributionProfile::IntraPeriodProgressive,
        DistributionProfile::QuarterlyProgressive,
        DistributionProfile::QuarterlySinusoidal,
        DistributionProfile::EventBased,
    ];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Even => "even",
            Self::AnnualProgressive => "annual_progressive",
            Self::AnnualSinusoidal => "annual_sinusoidal",
            Self::AnnualProgressiveWeekdayBias => "annual_progressive_weekday_bias",
            Self::MonthlySinusoidal => "monthly_sinusoidal",
            Self::IntraPeriodProgressive => "intra_period_progressive",
            Self::QuarterlyProgressive => "quarterly_progressive",
            Self::QuarterlySinusoidal => "quarterly_sinusoidal",
            Self::EventBased => "event_based",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TargetSlot {
    One,
    Two,
}

impl TargetSlot {
    pub const ALL: [TargetSlot; 2] = [TargetSlot::One, TargetSlot::Two];

    pub fn index(&self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Quarter,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Quarter,
    ];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
        }
    }
}

macro_rules! slug_display {
    ($ty:ty) => {
        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_slug())
            }
        }
    };
}

slug_display!(CalculationType);
slug_display!(RepartitionLevel);
slug_display!(DistributionProfile);
slug_display!(Granularity);

impl Display for TargetSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct SchemaParseError {
    pub kind: &'static str,
    pub value: String,
}

impl SchemaParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim()
        .to_ascii_lowercase()
        .replace(['-', ' '], "_")
}

impl FromStr for CalculationType {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "incremental" | "sum" | "cumulative" => Ok(Self::Incremental),
            "average" | "avg" | "mean" => Ok(Self::Average),
            _ => Err(SchemaParseError::new("calculation type", s)),
        }
    }
}

impl FromStr for RepartitionLevel {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "year" | "yearly" | "annual" | "y" => Ok(Self::Year),
            "month" | "monthly" | "m" => Ok(Self::Month),
            "quarter" | "quarterly" | "q" => Ok(Self::Quarter),
            "week" | "weekly" | "w" => Ok(Self::Week),
            _ => Err(SchemaParseError::new("repartition level", s)),
        }
    }
}

impl FromStr for DistributionProfile {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        let compact = normalized.replace('_', "");
        Self::ALL
            .into_iter()
            .find(|p| p.as_slug().replace('_', "") == compact)
            .or(match compact.as_str() {
                "weekdaybias" | "progressiveweekdaybias" => Some(Self::AnnualProgressiveWeekdayBias),
                "events" | "event" => Some(Self::EventBased),
                _ => None,
            })
            .ok_or_else(|| SchemaParseError::new("distribution profile", s))
    }
}

impl FromStr for TargetSlot {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "1" | "one" | "target_value_1" => Ok(Self::One),
            "2" | "two" | "target_value_2" => Ok(Self::Two),
            _ => Err(SchemaParseError::new("target slot", s)),
        }
    }
}

impl FromStr for Granularity {
    type Err = SchemaParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            "quarter" | "quarterly" => Ok(Self::Quarter),
            _ => Err(SchemaParseError::new("granularity", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KpiSpec {
    pub id: KpiId,
    pub name: String,
    pub calculation_type: CalculationType,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl KpiSpec {
    pub fn new(id: KpiId, name: impl Into<String>, calculation_type: CalculationType) -> Self {
        Self {
            id,
            name: name.into(),
            calculation_type,
            unit: None,
            visible: true,
        }
    }
}

/// Identifies one (year, site, kpi) recalculation tuple.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub year: i32,
    pub site_id: SiteId,
    pub kpi_id: KpiId,
}

impl TargetKey {
    pub fn new(year: i32, site_id: SiteId, kpi_id: KpiId) -> Self {
        Self {
            year,
            site_id,
            kpi_id,
        }
    }

    pub fn with_slot(self, slot: TargetSlot) -> PeriodicKey {
        PeriodicKey { target: self, slot }
    }
}

impl Display for TargetKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "year={} site={} kpi={}",
            self.year, self.site_id, self.kpi_id
        )
    }
}

/// Scope of one atomic periodic replace: a tuple and one target slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodicKey {
    pub target: TargetKey,
    pub slot: TargetSlot,
}

impl Display for PeriodicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} slot={}", self.target, self.slot)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnualTarget {
    pub year: i32,
    pub site_id: SiteId,
    pub kpi_id: KpiId,
    pub target_value_1: Option<f64>,
    pub target_value_2: Option<f64>,
    #[serde(default)]
    pub repartition_level: RepartitionLevel,
    #[serde(default)]
    pub repartition_weights: RepartitionWeights,
    #[serde(default)]
    pub distribution_profile: DistributionProfile,
    #[serde(default)]
    pub profile_params: ProfileParams,
    #[serde(default)]
    pub is_manual_1: bool,
    #[serde(default)]
    pub is_manual_2: bool,
}

impl AnnualTarget {
    /// A Year-level, Even-profile record with no values set.
    pub fn blank(key: TargetKey) -> Self {
        Self {
            year: key.year,
            site_id: key.site_id,
            kpi_id: key.kpi_id,
            target_value_1: None,
            target_value_2: None,
            repartition_level: RepartitionLevel::Year,
            repartition_weights: RepartitionWeights::default(),
            distribution_profile: DistributionProfile::Even,
            profile_params: ProfileParams::default(),
            is_manual_1: false,
            is_manual_2: false,
        }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.year, self.site_id, self.kpi_id)
    }

    pub fn target(&self, slot: TargetSlot) -> Option<f64> {
        match slot {
            TargetSlot::One => self.target_value_1,
            TargetSlot::Two => self.target_value_2,
        }
    }

    pub fn is_manual(&self, slot: TargetSlot) -> bool {
        match slot {
            TargetSlot::One => self.is_manual_1,
            TargetSlot::Two => self.is_manual_2,
        }
    }

    pub fn set_target(&mut self, slot: TargetSlot, value: Option<f64>) {
        match slot {
            TargetSlot::One => self.target_value_1 = value,
            TargetSlot::Two => self.target_value_2 = value,
        }
    }

    pub fn set_manual(&mut self, slot: TargetSlot, manual: bool) {
        match slot {
            TargetSlot::One => self.is_manual_1 = manual,
            TargetSlot::Two => self.is_manual_2 = manual,
        }
    }

    /// Writes a value computed by the master/sub distributor.
    pub fn set_derived(&mut self, slot: TargetSlot, value: f64) {
        self.set_target(slot, Some(value));
        self.set_manual(slot, false);
    }

    pub fn with_target(mut self, slot: TargetSlot, value: f64) -> Self {
        self.set_target(slot, Some(value));
        self
    }

    pub fn with_manual(mut self, slot: TargetSlot, manual: bool) -> Self {
        self.set_manual(slot, manual);
        self
    }

    pub fn with_repartition(
        mut self,
        level: RepartitionLevel,
        weights: RepartitionWeights,
    ) -> Self {
        self.repartition_level = level;
        self.repartition_weights = weights;
        self
    }

    pub fn with_profile(mut self, profile: DistributionProfile, params: ProfileParams) -> Self {
        self.distribution_profile = profile;
        self.profile_params = params;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterSubLink {
    pub master_kpi_id: KpiId,
    pub sub_kpi_id: KpiId,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodicRecord {
    pub year: i32,
    pub site_id: SiteId,
    pub kpi_id: KpiId,
    pub target_slot: TargetSlot,
    pub granularity: Granularity,
    pub period_key: String,
    pub value: f64,
}
