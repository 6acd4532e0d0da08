pub mod params;
pub mod schema;

pub use params::{ProfileParams, RepartitionWeights, TargetEvent};
pub use schema::{
    AnnualTarget, CalculationType, DistributionProfile, Granularity, KpiId, KpiSpec,
    MasterSubLink, PeriodicKey, PeriodicRecord, RepartitionLevel, SchemaParseError, SiteId,
    TargetKey, TargetSlot,
};
