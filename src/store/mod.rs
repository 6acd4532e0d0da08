pub mod memory;
pub mod migrations;
pub mod sqlite;

use anyhow::Result;

use crate::kpi::{
    AnnualTarget, Granularity, KpiId, KpiSpec, MasterSubLink, PeriodicKey, PeriodicRecord, SiteId,
    TargetKey,
};
use crate::repartition::PeriodicValues;

pub use memory::MemoryTargetStore;
pub use sqlite::SqliteTargetStore;

/// Everything the recalculation core reads from and writes to its host.
pub trait TargetStore {
    fn kpi_spec(&self, kpi_id: KpiId) -> Result<Option<KpiSpec>>;

    fn annual_target(&self, key: TargetKey) -> Result<Option<AnnualTarget>>;

    /// All annual targets of `year`, optionally restricted to one site.
    fn annual_targets(&self, year: i32, site_id: Option<SiteId>) -> Result<Vec<AnnualTarget>>;

    fn save_annual_target(&self, target: &AnnualTarget) -> Result<()>;

    fn links_for_master(&self, master_kpi_id: KpiId) -> Result<Vec<MasterSubLink>>;

    fn master_link_of(&self, sub_kpi_id: KpiId) -> Result<Option<MasterSubLink>>;

    /// Atomically swaps every periodic row of `key` for `values`.
    ///
    /// An empty `values` clears the slot. Readers never observe a mix of
    /// stale and fresh periods.
    fn replace_periodic_values(&self, key: &PeriodicKey, values: &PeriodicValues) -> Result<()>;

    fn periodic_values(
        &self,
        key: &PeriodicKey,
        granularity: Granularity,
    ) -> Result<Vec<PeriodicRecord>>;
}
