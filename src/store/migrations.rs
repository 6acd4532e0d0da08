pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS kpi_specs (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    calculation_type TEXT NOT NULL,
    unit TEXT,
    visible INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS annual_targets (
    year INTEGER NOT NULL,
    site_id INTEGER NOT NULL,
    kpi_id INTEGER NOT NULL,
    target_value_1 REAL,
    target_value_2 REAL,
    repartition_level TEXT NOT NULL DEFAULT 'year',
    repartition_weights TEXT NOT NULL DEFAULT '{}',
    distribution_profile TEXT NOT NULL DEFAULT 'even',
    profile_params TEXT NOT NULL DEFAULT '{}',
    is_manual_1 INTEGER NOT NULL DEFAULT 0,
    is_manual_2 INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (year, site_id, kpi_id)
);

CREATE TABLE IF NOT EXISTS master_sub_links (
    sub_kpi_id INTEGER PRIMARY KEY,
    master_kpi_id INTEGER NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0
);
CREATE INDEX IF NOT EXISTS idx_links_master ON master_sub_links(master_kpi_id);

CREATE TABLE IF NOT EXISTS periodic_daily (
    year INTEGER NOT NULL,
    site_id INTEGER NOT NULL,
    kpi_id INTEGER NOT NULL,
    target_slot INTEGER NOT NULL,
    period_key TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (year, site_id, kpi_id, target_slot, period_key)
);

CREATE TABLE IF NOT EXISTS periodic_weekly (
    year INTEGER NOT NULL,
    site_id INTEGER NOT NULL,
    kpi_id INTEGER NOT NULL,
    target_slot INTEGER NOT NULL,
    period_key TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (year, site_id, kpi_id, target_slot, period_key)
);

CREATE TABLE IF NOT EXISTS periodic_monthly (
    year INTEGER NOT NULL,
    site_id INTEGER NOT NULL,
    kpi_id INTEGER NOT NULL,
    target_slot INTEGER NOT NULL,
    period_key TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (year, site_id, kpi_id, target_slot, period_key)
);

CREATE TABLE IF NOT EXISTS periodic_quarterly (
    year INTEGER NOT NULL,
    site_id INTEGER NOT NULL,
    kpi_id INTEGER NOT NULL,
    target_slot INTEGER NOT NULL,
    period_key TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (year, site_id, kpi_id, target_slot, period_key)
);
"#;

pub fn periodic_table(granularity: crate::kpi::Granularity) -> &'static str {
    match granularity {
        crate::kpi::Granularity::Day => "periodic_daily",
        crate::kpi::Granularity::Week => "periodic_weekly",
        crate::kpi::Granularity::Month => "periodic_monthly",
        crate::kpi::Granularity::Quarter => "periodic_quarterly",
    }
}
