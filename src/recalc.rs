use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DistributionConfig;
use crate::error::RecalcError;
use crate::kpi::{AnnualTarget, CalculationType, KpiId, PeriodicKey, SiteId, TargetKey, TargetSlot};
use crate::repartition::{compute_slot, distribute, SlotOutcome, SubShare};
use crate::store::TargetStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedTuple {
    pub key: TargetKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalcReport {
    /// Tuples whose periodic values were rewritten.
    pub recalculated: Vec<TargetKey>,
    /// Slots written as empty because their target was absent or ~0.
    pub cleared: Vec<PeriodicKey>,
    pub skipped: Vec<SkippedTuple>,
}

impl RecalcReport {
    fn skip(&mut self, key: TargetKey, err: &RecalcError) {
        warn!("skipping {key}: {err}");
        self.skipped.push(SkippedTuple {
            key,
            reason: err.to_string(),
        });
    }
}

/// Both slot outcomes of one tuple, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleOutcome {
    pub key: TargetKey,
    pub slots: Vec<(TargetSlot, SlotOutcome)>,
}

/// Pure per-tuple pipeline; no store access.
pub fn compute_tuple(
    config: &DistributionConfig,
    calculation_type: CalculationType,
    target: &AnnualTarget,
) -> TupleOutcome {
    TupleOutcome {
        key: target.key(),
        slots: TargetSlot::ALL
            .iter()
            .map(|slot| (*slot, compute_slot(config, calculation_type, target, *slot)))
            .collect(),
    }
}

/// Drives recalculation against a store: loads inputs, runs the pipeline,
/// fans master targets out to their subs and writes periodic rows.
pub struct Recalculator<'a, S: TargetStore + ?Sized> {
    store: &'a S,
    config: &'a DistributionConfig,
}

impl<'a, S: TargetStore + ?Sized> Recalculator<'a, S> {
    pub fn new(store: &'a S, config: &'a DistributionConfig) -> Self {
        Self { store, config }
    }

    /// Recomputes one tuple after its annual record changed.
    ///
    /// Redistribution starts from the topmost master with an annual record, so
    /// a sub (even one that is itself a master) gets all its non-manual
    /// siblings recomputed, and a master reaches its whole subtree.
    pub fn recalculate(&self, key: TargetKey) -> Result<RecalcReport, RecalcError> {
        let mut report = RecalcReport::default();
        let mut visited = BTreeSet::new();

        let root = match self.top_master_of(key)? {
            Some(top) => Some(top),
            None if self.is_master(key.kpi_id)? => Some(key),
            None => None,
        };
        if let Some(root) = root {
            let result = self.recalculate_master(root, &mut visited, &mut report);
            absorb(&mut report, root, result)?;
        }
        if !visited.contains(&key) {
            let result = self.recalculate_tuple(key, &mut report);
            absorb(&mut report, key, result)?;
        }

        info!(
            "{key}: {} tuples recalculated, {} skipped",
            report.recalculated.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Recomputes every tuple of `year`, masters first.
    pub fn recalculate_year(
        &self,
        year: i32,
        site_id: Option<SiteId>,
    ) -> Result<RecalcReport, RecalcError> {
        let mut report = RecalcReport::default();
        let visited = self.masters_pass(year, site_id, &mut report)?;
        for target in self.store.annual_targets(year, site_id)? {
            let key = target.key();
            if visited.contains(&key) {
                continue;
            }
            let result = self.load_calculation_type(key.kpi_id).and_then(|calc| {
                self.write_tuple(&compute_tuple(self.config, calc, &target), &mut report)
            });
            absorb(&mut report, key, result)?;
        }
        info!(
            "year {year}: {} tuples recalculated, {} slots cleared, {} skipped",
            report.recalculated.len(),
            report.cleared.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Distributes every master of the year and recomputes it with its subs.
    /// Returns the tuples already handled.
    pub(crate) fn masters_pass(
        &self,
        year: i32,
        site_id: Option<SiteId>,
        report: &mut RecalcReport,
    ) -> Result<BTreeSet<TargetKey>, RecalcError> {
        let mut visited = BTreeSet::new();
        for target in self.store.annual_targets(year, site_id)? {
            let key = target.key();
            if visited.contains(&key) || !self.is_master(key.kpi_id)? {
                continue;
            }
            // Nested masters are reached through their own master first.
            if let Some(parent) = self.master_key_of(key)? {
                if self.store.annual_target(parent)?.is_some() {
                    continue;
                }
            }
            let result = self.recalculate_master(key, &mut visited, report);
            absorb(report, key, result)?;
        }
        // Sub masters whose parent never came up above.
        for target in self.store.annual_targets(year, site_id)? {
            let key = target.key();
            if !visited.contains(&key) && self.is_master(key.kpi_id)? {
                let result = self.recalculate_master(key, &mut visited, report);
                absorb(report, key, result)?;
            }
        }
        Ok(visited)
    }

    pub(crate) fn load_calculation_type(&self, kpi_id: KpiId) -> Result<CalculationType, RecalcError> {
        self.store
            .kpi_spec(kpi_id)?
            .map(|spec| spec.calculation_type)
            .ok_or(RecalcError::MissingKpi { kpi_id })
    }

    pub(crate) fn write_tuple(
        &self,
        outcome: &TupleOutcome,
        report: &mut RecalcReport,
    ) -> Result<(), RecalcError> {
        for (slot, slot_outcome) in &outcome.slots {
            let key = outcome.key.with_slot(*slot);
            let values = slot_outcome.periodic_values();
            self.store.replace_periodic_values(&key, &values)?;
            debug!("{key}: wrote {} periodic rows", values.row_count());
            if matches!(slot_outcome, SlotOutcome::Cleared) {
                report.cleared.push(key);
            }
        }
        report.recalculated.push(outcome.key);
        Ok(())
    }

    fn is_master(&self, kpi_id: KpiId) -> Result<bool, RecalcError> {
        Ok(!self.store.links_for_master(kpi_id)?.is_empty())
    }

    fn master_key_of(&self, key: TargetKey) -> Result<Option<TargetKey>, RecalcError> {
        Ok(self
            .store
            .master_link_of(key.kpi_id)?
            .map(|link| TargetKey::new(key.year, key.site_id, link.master_kpi_id)))
    }

    /// Walks the master links upward and returns the highest ancestor that
    /// has an annual record for the same year and site.
    fn top_master_of(&self, key: TargetKey) -> Result<Option<TargetKey>, RecalcError> {
        let mut seen = BTreeSet::from([key]);
        let mut current = key;
        let mut top = None;
        while let Some(parent) = self.master_key_of(current)? {
            if !seen.insert(parent) {
                warn!("{key}: master/sub cycle through kpi {}", parent.kpi_id);
                break;
            }
            if self.store.annual_target(parent)?.is_none() {
                break;
            }
            top = Some(parent);
            current = parent;
        }
        Ok(top)
    }

    fn recalculate_tuple(&self, key: TargetKey, report: &mut RecalcReport) -> Result<(), RecalcError> {
        let target = self.store.annual_target(key)?.ok_or(RecalcError::MissingTarget {
            year: key.year,
            site_id: key.site_id,
            kpi_id: key.kpi_id,
        })?;
        let calc = self.load_calculation_type(key.kpi_id)?;
        let outcome = compute_tuple(self.config, calc, &target);
        self.write_tuple(&outcome, report)
    }

    fn recalculate_master(
        &self,
        key: TargetKey,
        visited: &mut BTreeSet<TargetKey>,
        report: &mut RecalcReport,
    ) -> Result<(), RecalcError> {
        if !visited.insert(key) {
            warn!("{key}: master/sub cycle, not redistributing again");
            return Ok(());
        }
        let master = self.store.annual_target(key)?.ok_or(RecalcError::MissingTarget {
            year: key.year,
            site_id: key.site_id,
            kpi_id: key.kpi_id,
        })?;
        let calc = self.load_calculation_type(key.kpi_id)?;
        self.write_tuple(&compute_tuple(self.config, calc, &master), report)?;

        let mut subs: Vec<(AnnualTarget, CalculationType, f64)> = Vec::new();
        for link in self.store.links_for_master(key.kpi_id)? {
            let sub_key = TargetKey::new(key.year, key.site_id, link.sub_kpi_id);
            let Some(spec) = self.store.kpi_spec(link.sub_kpi_id)? else {
                report.skip(
                    sub_key,
                    &RecalcError::MissingLinkedKpi {
                        master_kpi_id: key.kpi_id,
                        sub_kpi_id: link.sub_kpi_id,
                    },
                );
                continue;
            };
            let target = match self.store.annual_target(sub_key)? {
                Some(target) => target,
                None => {
                    info!("{sub_key}: no annual record, creating one for derived values");
                    AnnualTarget::blank(sub_key)
                }
            };
            if link.weight < 0.0 {
                warn!("{sub_key}: negative link weight {} treated as 0", link.weight);
            }
            subs.push((target, spec.calculation_type, link.weight.max(0.0)));
        }

        for slot in TargetSlot::ALL {
            let Some(master_value) = master.target(slot) else {
                continue;
            };
            let shares: Vec<SubShare> = subs
                .iter()
                .map(|(target, _, weight)| SubShare {
                    kpi_id: target.kpi_id,
                    weight: *weight,
                    is_manual: target.is_manual(slot),
                    target: target.target(slot),
                })
                .collect();
            let distribution = distribute(master_value, &shares);
            for (target, _, _) in &mut subs {
                if let Some(value) = distribution.value_for(target.kpi_id) {
                    target.set_derived(slot, value);
                }
            }
        }

        for (target, calc, _) in &subs {
            let sub_key = target.key();
            self.store.save_annual_target(target)?;
            if self.is_master(sub_key.kpi_id)? {
                let result = self.recalculate_master(sub_key, visited, report);
                absorb(report, sub_key, result)?;
            } else {
                visited.insert(sub_key);
                self.write_tuple(&compute_tuple(self.config, *calc, target), report)?;
            }
        }
        Ok(())
    }
}

/// Turns tuple-local failures into report entries; store failures propagate.
fn absorb(
    report: &mut RecalcReport,
    key: TargetKey,
    result: Result<(), RecalcError>,
) -> Result<(), RecalcError> {
    match result {
        Err(err) if err.is_tuple_local() => {
            report.skip(key, &err);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::Recalculator;
    use crate::config::DistributionConfig;
    use crate::kpi::{
        AnnualTarget, CalculationType, Granularity, KpiSpec, MasterSubLink, TargetKey, TargetSlot,
    };
    use crate::store::{MemoryTargetStore, TargetStore};

    const YEAR: i32 = 2024;
    const SITE: i64 = 1;

    fn key(kpi: i64) -> TargetKey {
        TargetKey::new(YEAR, SITE, kpi)
    }

    fn link(master: i64, sub: i64, weight: f64) -> MasterSubLink {
        MasterSubLink {
            master_kpi_id: master,
            sub_kpi_id: sub,
            weight,
        }
    }

    /// Master 10 with subs A=11, B=12 (manual) and C=13 (derived).
    fn master_fixture() -> MemoryTargetStore {
        let store = MemoryTargetStore::new();
        for id in 10..=13 {
            store
                .upsert_kpi_spec(KpiSpec::new(id, format!("kpi-{id}"), CalculationType::Incremental))
                .expect("spec");
        }
        for (sub, weight) in [(11, 1.0), (12, 1.0), (13, 1.0)] {
            store.upsert_link(link(10, sub, weight)).expect("link");
        }
        let targets = [
            AnnualTarget::blank(key(10))
                .with_target(TargetSlot::One, 10_000.0)
                .with_manual(TargetSlot::One, true),
            AnnualTarget::blank(key(11))
                .with_target(TargetSlot::One, 2000.0)
                .with_manual(TargetSlot::One, true),
            AnnualTarget::blank(key(12))
                .with_target(TargetSlot::One, 3000.0)
                .with_manual(TargetSlot::One, true),
            AnnualTarget::blank(key(13)),
        ];
        for target in &targets {
            store.save_annual_target(target).expect("save");
        }
        store
    }

    fn month_total(store: &MemoryTargetStore, kpi: i64, slot: TargetSlot) -> f64 {
        store
            .periodic_values(&key(kpi).with_slot(slot), Granularity::Month)
            .expect("rows")
            .iter()
            .map(|r| r.value)
            .sum()
    }

    #[test]
    fn master_derives_remaining_into_non_manual_sub() {
        let store = master_fixture();
        let config = DistributionConfig::default();
        let report = Recalculator::new(&store, &config)
            .recalculate(key(10))
            .expect("recalculate");

        let c = store.annual_target(key(13)).expect("load").expect("sub c");
        assert!((c.target_value_1.expect("derived") - 5000.0).abs() < 1e-9);
        assert!(!c.is_manual_1);
        assert!((month_total(&store, 13, TargetSlot::One) - 5000.0).abs() < 1e-6);
        assert_eq!(report.recalculated.len(), 4);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn editing_a_sub_redistributes_its_siblings() {
        let store = master_fixture();
        let config = DistributionConfig::default();
        let recalc = Recalculator::new(&store, &config);
        recalc.recalculate(key(10)).expect("first pass");

        let b = store
            .annual_target(key(12))
            .expect("load")
            .expect("sub b")
            .with_target(TargetSlot::One, 1000.0);
        store.save_annual_target(&b).expect("save");
        recalc.recalculate(key(12)).expect("sub edit");

        let c = store.annual_target(key(13)).expect("load").expect("sub c");
        assert!((c.target_value_1.expect("derived") - 7000.0).abs() < 1e-9);
        assert!((month_total(&store, 12, TargetSlot::One) - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn repeated_runs_do_not_drift() {
        let store = master_fixture();
        let config = DistributionConfig::default();
        let recalc = Recalculator::new(&store, &config);
        recalc.recalculate(key(10)).expect("first");
        let first = store.annual_target(key(13)).expect("load");
        recalc.recalculate(key(10)).expect("second");
        assert_eq!(store.annual_target(key(13)).expect("load"), first);
    }

    #[test]
    fn nested_master_edit_redistributes_siblings() {
        // 20 -> {21, 22}, 21 -> {23}; 20 and 21 carry manual targets.
        let store = MemoryTargetStore::new();
        for id in 20..=23 {
            store
                .upsert_kpi_spec(KpiSpec::new(id, format!("kpi-{id}"), CalculationType::Incremental))
                .expect("spec");
        }
        for (master, sub) in [(20, 21), (20, 22), (21, 23)] {
            store.upsert_link(link(master, sub, 1.0)).expect("link");
        }
        for (id, value) in [(20, 100.0), (21, 40.0)] {
            store
                .save_annual_target(
                    &AnnualTarget::blank(key(id))
                        .with_target(TargetSlot::One, value)
                        .with_manual(TargetSlot::One, true),
                )
                .expect("save");
        }
        let config = DistributionConfig::default();
        let recalc = Recalculator::new(&store, &config);
        recalc.recalculate(key(20)).expect("initial");
        let sibling = |store: &MemoryTargetStore| {
            store
                .annual_target(key(22))
                .expect("load")
                .and_then(|t| t.target_value_1)
        };
        assert_eq!(sibling(&store), Some(60.0));

        let edited = store
            .annual_target(key(21))
            .expect("load")
            .expect("mid master")
            .with_target(TargetSlot::One, 70.0);
        store.save_annual_target(&edited).expect("save");
        let report = recalc.recalculate(key(21)).expect("edit");

        assert_eq!(sibling(&store), Some(30.0));
        let leaf = store.annual_target(key(23)).expect("load").expect("leaf");
        assert!((leaf.target_value_1.expect("derived") - 70.0).abs() < 1e-9);
        assert!((month_total(&store, 22, TargetSlot::One) - 30.0).abs() < 1e-6);
        assert!((month_total(&store, 23, TargetSlot::One) - 70.0).abs() < 1e-6);
        assert_eq!(report.recalculated.len(), 4);
    }

    #[test]
    fn flipping_manual_flags_recomputes_every_sibling() {
        let store = master_fixture();
        let config = DistributionConfig::default();
        let recalc = Recalculator::new(&store, &config);
        recalc.recalculate(key(10)).expect("first pass");

        let released = store
            .annual_target(key(11))
            .expect("load")
            .expect("sub a")
            .with_manual(TargetSlot::One, false);
        store.save_annual_target(&released).expect("save");
        recalc.recalculate(key(11)).expect("release a");

        for (id, expected, manual) in [(11, 3500.0, false), (12, 3000.0, true), (13, 3500.0, false)] {
            let sub = store.annual_target(key(id)).expect("load").expect("sub");
            assert!((sub.target_value_1.expect("value") - expected).abs() < 1e-9, "kpi {id}");
            assert_eq!(sub.is_manual_1, manual, "kpi {id}");
            assert!((month_total(&store, id, TargetSlot::One) - expected).abs() < 1e-6, "kpi {id}");
        }

        let pinned = store
            .annual_target(key(13))
            .expect("load")
            .expect("sub c")
            .with_target(TargetSlot::One, 1000.0)
            .with_manual(TargetSlot::One, true);
        store.save_annual_target(&pinned).expect("save");
        recalc.recalculate(key(13)).expect("pin c");

        for (id, expected) in [(11, 6000.0), (12, 3000.0), (13, 1000.0)] {
            let sub = store.annual_target(key(id)).expect("load").expect("sub");
            assert!((sub.target_value_1.expect("value") - expected).abs() < 1e-9, "kpi {id}");
            assert!((month_total(&store, id, TargetSlot::One) - expected).abs() < 1e-6, "kpi {id}");
        }
    }

    #[test]
    fn missing_sub_records_are_created_and_missing_specs_skipped() {
        let store = MemoryTargetStore::new();
        store
            .upsert_kpi_spec(KpiSpec::new(1, "master", CalculationType::Incremental))
            .expect("spec");
        store
            .upsert_kpi_spec(KpiSpec::new(2, "sub", CalculationType::Incremental))
            .expect("spec");
        store.upsert_link(link(1, 2, 3.0)).expect("link");
        store.upsert_link(link(1, 3, 1.0)).expect("dangling link");
        store
            .save_annual_target(&AnnualTarget::blank(key(1)).with_target(TargetSlot::Two, 600.0))
            .expect("save");

        let config = DistributionConfig::default();
        let report = Recalculator::new(&store, &config)
            .recalculate(key(1))
            .expect("recalculate");

        let sub = store.annual_target(key(2)).expect("load").expect("created");
        assert_eq!(sub.target_value_1, None);
        assert!((sub.target_value_2.expect("derived") - 600.0).abs() < 1e-9);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].key, key(3));
        assert!(report.cleared.contains(&key(2).with_slot(TargetSlot::One)));
    }

    #[test]
    fn year_pass_skips_tuples_without_spec_and_clears_zero_targets() {
        let store = master_fixture();
        store
            .save_annual_target(&AnnualTarget::blank(key(40)).with_target(TargetSlot::One, 365.0))
            .expect("orphan");
        store
            .upsert_kpi_spec(KpiSpec::new(41, "average", CalculationType::Average))
            .expect("spec");
        store
            .save_annual_target(&AnnualTarget::blank(key(41)).with_target(TargetSlot::One, 0.0))
            .expect("zero");

        let config = DistributionConfig::default();
        let report = Recalculator::new(&store, &config)
            .recalculate_year(YEAR, Some(SITE))
            .expect("year");

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].key, key(40));
        assert!(report.cleared.contains(&key(41).with_slot(TargetSlot::One)));
        assert_eq!(report.recalculated.len(), 5);
        assert!((month_total(&store, 13, TargetSlot::One) - 5000.0).abs() < 1e-6);
    }
}
