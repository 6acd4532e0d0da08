use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::kpi::{
    AnnualTarget, CalculationType, DistributionProfile, Granularity, KpiId, KpiSpec,
    MasterSubLink, PeriodicKey, PeriodicRecord, ProfileParams, RepartitionLevel,
    RepartitionWeights, SiteId, TargetKey,
};
use crate::repartition::PeriodicValues;
use crate::store::migrations::{periodic_table, BASE_MIGRATION};
use crate::store::TargetStore;

const ANNUAL_COLUMNS: &str = "year, site_id, kpi_id, target_value_1, target_value_2, \
     repartition_level, repartition_weights, distribution_profile, profile_params, \
     is_manual_1, is_manual_2";

pub struct SqliteTargetStore {
    conn: Connection,
}

impl SqliteTargetStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating db directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed opening database: {}", path.display()))?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    pub fn upsert_kpi_spec(&self, spec: &KpiSpec) -> Result<()> {
        self.conn.execute(
            r#"
INSERT INTO kpi_specs(id, name, calculation_type, unit, visible)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(id) DO UPDATE SET
    name = excluded.name,
    calculation_type = excluded.calculation_type,
    unit = excluded.unit,
    visible = excluded.visible
"#,
            params![
                spec.id,
                spec.name,
                spec.calculation_type.as_slug(),
                spec.unit,
                spec.visible
            ],
        )?;
        Ok(())
    }

    pub fn upsert_link(&self, link: &MasterSubLink) -> Result<()> {
        self.conn.execute(
            r#"
INSERT INTO master_sub_links(sub_kpi_id, master_kpi_id, weight)
VALUES (?1, ?2, ?3)
ON CONFLICT(sub_kpi_id) DO UPDATE SET
    master_kpi_id = excluded.master_kpi_id,
    weight = excluded.weight
"#,
            params![link.sub_kpi_id, link.master_kpi_id, link.weight],
        )?;
        Ok(())
    }
}

impl TargetStore for SqliteTargetStore {
    fn kpi_spec(&self, kpi_id: KpiId) -> Result<Option<KpiSpec>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, calculation_type, unit, visible FROM kpi_specs WHERE id = ?1",
                params![kpi_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, name, calc_raw, unit, visible)) = row else {
            return Ok(None);
        };
        match CalculationType::from_str(&calc_raw) {
            Ok(calculation_type) => Ok(Some(KpiSpec {
                id,
                name,
                calculation_type,
                unit,
                visible,
            })),
            Err(err) => {
                warn!("kpi {id} has an unusable specification: {err}");
                Ok(None)
            }
        }
    }

    fn annual_target(&self, key: TargetKey) -> Result<Option<AnnualTarget>> {
        let sql = format!(
            "SELECT {ANNUAL_COLUMNS} FROM annual_targets WHERE year = ?1 AND site_id = ?2 AND kpi_id = ?3"
        );
        let target = self
            .conn
            .query_row(&sql, params![key.year, key.site_id, key.kpi_id], |row| {
                row_to_annual_target(row)
            })
            .optional()?;
        Ok(target)
    }

    fn annual_targets(&self, year: i32, site_id: Option<SiteId>) -> Result<Vec<AnnualTarget>> {
        let sql = if site_id.is_some() {
            format!(
                "SELECT {ANNUAL_COLUMNS} FROM annual_targets WHERE year = ?1 AND site_id = ?2 \
                 ORDER BY site_id, kpi_id"
            )
        } else {
            format!(
                "SELECT {ANNUAL_COLUMNS} FROM annual_targets WHERE year = ?1 ORDER BY site_id, kpi_id"
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(site_id) = site_id {
            stmt.query_map(params![year, site_id], |row| row_to_annual_target(row))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![year], |row| row_to_annual_target(row))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    fn save_annual_target(&self, target: &AnnualTarget) -> Result<()> {
        self.conn.execute(
            &format!(
                r#"
INSERT INTO annual_targets({ANNUAL_COLUMNS})
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(year, site_id, kpi_id) DO UPDATE SET
    target_value_1 = excluded.target_value_1,
    target_value_2 = excluded.target_value_2,
    repartition_level = excluded.repartition_level,
    repartition_weights = excluded.repartition_weights,
    distribution_profile = excluded.distribution_profile,
    profile_params = excluded.profile_params,
    is_manual_1 = excluded.is_manual_1,
    is_manual_2 = excluded.is_manual_2
"#
            ),
            params![
                target.year,
                target.site_id,
                target.kpi_id,
                target.target_value_1,
                target.target_value_2,
                target.repartition_level.as_slug(),
                target.repartition_weights.to_json(),
                target.distribution_profile.as_slug(),
                target.profile_params.to_json(),
                target.is_manual_1,
                target.is_manual_2
            ],
        )?;
        Ok(())
    }

    fn links_for_master(&self, master_kpi_id: KpiId) -> Result<Vec<MasterSubLink>> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT master_kpi_id, sub_kpi_id, weight
FROM master_sub_links
WHERE master_kpi_id = ?1
ORDER BY sub_kpi_id
"#,
        )?;
        let rows = stmt
            .query_map(params![master_kpi_id], |row| row_to_link(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn master_link_of(&self, sub_kpi_id: KpiId) -> Result<Option<MasterSubLink>> {
        let link = self
            .conn
            .query_row(
                "SELECT master_kpi_id, sub_kpi_id, weight FROM master_sub_links WHERE sub_kpi_id = ?1",
                params![sub_kpi_id],
                |row| row_to_link(row),
            )
            .optional()?;
        Ok(link)
    }

    fn replace_periodic_values(&self, key: &PeriodicKey, values: &PeriodicValues) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for granularity in Granularity::ALL {
            let table = periodic_table(granularity);
            tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE year = ?1 AND site_id = ?2 AND kpi_id = ?3 AND target_slot = ?4"
                ),
                params![
                    key.target.year,
                    key.target.site_id,
                    key.target.kpi_id,
                    key.slot.index()
                ],
            )?;
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {table}(year, site_id, kpi_id, target_slot, period_key, value) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ))?;
            for row in values.get(granularity) {
                insert.execute(params![
                    key.target.year,
                    key.target.site_id,
                    key.target.kpi_id,
                    key.slot.index(),
                    row.period_key,
                    row.value
                ])?;
            }
        }
        tx.commit()
            .with_context(|| format!("failed committing periodic values for {key}"))?;
        Ok(())
    }

    fn periodic_values(
        &self,
        key: &PeriodicKey,
        granularity: Granularity,
    ) -> Result<Vec<PeriodicRecord>> {
        let table = periodic_table(granularity);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT period_key, value FROM {table} \
             WHERE year = ?1 AND site_id = ?2 AND kpi_id = ?3 AND target_slot = ?4 \
             ORDER BY rowid"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    key.target.year,
                    key.target.site_id,
                    key.target.kpi_id,
                    key.slot.index()
                ],
                |row| {
                    Ok(PeriodicRecord {
                        year: key.target.year,
                        site_id: key.target.site_id,
                        kpi_id: key.target.kpi_id,
                        target_slot: key.slot,
                        granularity,
                        period_key: row.get(0)?,
                        value: row.get(1)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_annual_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnnualTarget> {
    let year: i32 = row.get(0)?;
    let site_id: SiteId = row.get(1)?;
    let kpi_id: KpiId = row.get(2)?;
    let level_raw: String = row.get(5)?;
    let profile_raw: String = row.get(7)?;
    let repartition_level = RepartitionLevel::from_str(&level_raw).unwrap_or_else(|err| {
        warn!("kpi {kpi_id} year {year}: {err}, using year level");
        RepartitionLevel::Year
    });
    let distribution_profile = DistributionProfile::from_str(&profile_raw).unwrap_or_else(|err| {
        warn!("kpi {kpi_id} year {year}: {err}, using even profile");
        DistributionProfile::Even
    });
    let weights_raw: Option<String> = row.get(6)?;
    let params_raw: Option<String> = row.get(8)?;
    Ok(AnnualTarget {
        year,
        site_id,
        kpi_id,
        target_value_1: row.get(3)?,
        target_value_2: row.get(4)?,
        repartition_level,
        repartition_weights: RepartitionWeights::from_json_lenient(
            weights_raw.as_deref().unwrap_or_default(),
        ),
        distribution_profile,
        profile_params: ProfileParams::from_json_lenient(params_raw.as_deref().unwrap_or_default()),
        is_manual_1: row.get(9)?,
        is_manual_2: row.get(10)?,
    })
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<MasterSubLink> {
    Ok(MasterSubLink {
        master_kpi_id: row.get(0)?,
        sub_kpi_id: row.get(1)?,
        weight: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::SqliteTargetStore;
    use crate::kpi::{
        AnnualTarget, CalculationType, DistributionProfile, Granularity, KpiSpec, MasterSubLink,
        ProfileParams, RepartitionLevel, RepartitionWeights, TargetKey, TargetSlot,
    };
    use crate::repartition::{PeriodValue, PeriodicValues};
    use crate::store::TargetStore;

    fn values(n: usize, base: f64) -> PeriodicValues {
        PeriodicValues {
            daily: (0..n)
                .map(|i| PeriodValue {
                    period_key: format!("2024-01-{:02}", i + 1),
                    value: base + i as f64,
                })
                .collect(),
            quarterly: vec![PeriodValue {
                period_key: "Q1".to_string(),
                value: base,
            }],
            ..PeriodicValues::default()
        }
    }

    #[test]
    fn round_trips_annual_targets_with_lenient_json() {
        let store = SqliteTargetStore::open_in_memory().expect("open store");
        let key = TargetKey::new(2024, 3, 11);
        let target = AnnualTarget::blank(key)
            .with_target(TargetSlot::One, 4000.0)
            .with_manual(TargetSlot::Two, true)
            .with_repartition(
                RepartitionLevel::Quarter,
                RepartitionWeights::from_pairs([("Q1", 25.0), ("Q2", 75.0)]),
            )
            .with_profile(DistributionProfile::QuarterlyProgressive, ProfileParams::default());
        store.save_annual_target(&target).expect("save");
        assert_eq!(store.annual_target(key).expect("load"), Some(target));

        store
            .conn
            .execute(
                "UPDATE annual_targets SET profile_params = '{broken', distribution_profile = 'zigzag'",
                [],
            )
            .expect("corrupt row");
        let loaded = store.annual_target(key).expect("load").expect("row");
        assert_eq!(loaded.distribution_profile, DistributionProfile::Even);
        assert_eq!(loaded.profile_params, ProfileParams::default());
        assert_eq!(store.annual_targets(2024, Some(3)).expect("list").len(), 1);
        assert!(store.annual_targets(2024, Some(4)).expect("list").is_empty());
    }

    #[test]
    fn replace_swaps_the_whole_slot() {
        let store = SqliteTargetStore::open_in_memory().expect("open store");
        let key = TargetKey::new(2024, 1, 1).with_slot(TargetSlot::One);
        let other = TargetKey::new(2024, 1, 1).with_slot(TargetSlot::Two);

        store.replace_periodic_values(&key, &values(5, 10.0)).expect("first");
        store.replace_periodic_values(&other, &values(2, 1.0)).expect("other slot");
        store.replace_periodic_values(&key, &values(3, 20.0)).expect("second");

        let daily = store.periodic_values(&key, Granularity::Day).expect("daily");
        assert_eq!(daily.len(), 3);
        assert!((daily[0].value - 20.0).abs() < 1e-12);
        assert_eq!(store.periodic_values(&other, Granularity::Day).expect("daily").len(), 2);

        store
            .replace_periodic_values(&key, &PeriodicValues::default())
            .expect("clear");
        for g in Granularity::ALL {
            assert!(store.periodic_values(&key, g).expect("rows").is_empty());
        }
    }

    #[test]
    fn resolves_links_both_ways_and_specs() {
        let store = SqliteTargetStore::open_in_memory().expect("open store");
        store
            .upsert_kpi_spec(&KpiSpec::new(1, "Revenue", CalculationType::Incremental))
            .expect("spec");
        for (sub, weight) in [(2, 1.0), (3, 2.5)] {
            store
                .upsert_link(&MasterSubLink {
                    master_kpi_id: 1,
                    sub_kpi_id: sub,
                    weight,
                })
                .expect("link");
        }
        assert_eq!(store.links_for_master(1).expect("links").len(), 2);
        let link = store.master_link_of(3).expect("link").expect("present");
        assert!((link.weight - 2.5).abs() < 1e-12);
        assert!(store.master_link_of(1).expect("link").is_none());
        assert_eq!(
            store.kpi_spec(1).expect("spec").map(|s| s.calculation_type),
            Some(CalculationType::Incremental)
        );
        assert!(store.kpi_spec(99).expect("spec").is_none());
    }
}
