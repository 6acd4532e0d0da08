use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};

use crate::kpi::{
    AnnualTarget, Granularity, KpiId, KpiSpec, MasterSubLink, PeriodicKey, PeriodicRecord, SiteId,
    TargetKey,
};
use crate::repartition::PeriodicValues;
use crate::store::TargetStore;

/// In-process store for embedding hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    specs: RwLock<BTreeMap<KpiId, KpiSpec>>,
    targets: RwLock<BTreeMap<TargetKey, AnnualTarget>>,
    links: RwLock<BTreeMap<KpiId, MasterSubLink>>,
    periodic: RwLock<BTreeMap<PeriodicKey, PeriodicValues>>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory store lock poisoned")
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_kpi_spec(&self, spec: KpiSpec) -> Result<()> {
        self.specs.write().map_err(poisoned)?.insert(spec.id, spec);
        Ok(())
    }

    /// A sub has at most one master; re-linking replaces the previous link.
    pub fn upsert_link(&self, link: MasterSubLink) -> Result<()> {
        self.links
            .write()
            .map_err(poisoned)?
            .insert(link.sub_kpi_id, link);
        Ok(())
    }

    pub fn periodic_snapshot(&self, key: &PeriodicKey) -> Result<Option<PeriodicValues>> {
        Ok(self.periodic.read().map_err(poisoned)?.get(key).cloned())
    }
}

impl TargetStore for MemoryTargetStore {
    fn kpi_spec(&self, kpi_id: KpiId) -> Result<Option<KpiSpec>> {
        Ok(self.specs.read().map_err(poisoned)?.get(&kpi_id).cloned())
    }

    fn annual_target(&self, key: TargetKey) -> Result<Option<AnnualTarget>> {
        Ok(self.targets.read().map_err(poisoned)?.get(&key).cloned())
    }

    fn annual_targets(&self, year: i32, site_id: Option<SiteId>) -> Result<Vec<AnnualTarget>> {
        Ok(self
            .targets
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|t| t.year == year && site_id.map_or(true, |s| t.site_id == s))
            .cloned()
            .collect())
    }

    fn save_annual_target(&self, target: &AnnualTarget) -> Result<()> {
        self.targets
            .write()
            .map_err(poisoned)?
            .insert(target.key(), target.clone());
        Ok(())
    }

    fn links_for_master(&self, master_kpi_id: KpiId) -> Result<Vec<MasterSubLink>> {
        Ok(self
            .links
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|l| l.master_kpi_id == master_kpi_id)
            .cloned()
            .collect())
    }

    fn master_link_of(&self, sub_kpi_id: KpiId) -> Result<Option<MasterSubLink>> {
        Ok(self.links.read().map_err(poisoned)?.get(&sub_kpi_id).cloned())
    }

    fn replace_periodic_values(&self, key: &PeriodicKey, values: &PeriodicValues) -> Result<()> {
        let mut periodic = self.periodic.write().map_err(poisoned)?;
        if values.is_empty() {
            periodic.remove(key);
        } else {
            periodic.insert(*key, values.clone());
        }
        Ok(())
    }

    fn periodic_values(
        &self,
        key: &PeriodicKey,
        granularity: Granularity,
    ) -> Result<Vec<PeriodicRecord>> {
        let periodic = self.periodic.read().map_err(poisoned)?;
        Ok(periodic
            .get(key)
            .map(|values| {
                values
                    .to_records(key)
                    .into_iter()
                    .filter(|r| r.granularity == granularity)
                    .collect()
            })
            .unwrap_or_default())
    }
}
