use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::kpi::{CalculationType, Granularity, PeriodicRecord};
use crate::recalc::RecalcReport;
use crate::repartition::PeriodValue;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// One granularity of a computed slot, with a closing Total/Mean row.
pub fn render_period_table(
    granularity: Granularity,
    calculation_type: CalculationType,
    values: &[PeriodValue],
) -> String {
    let mut table = new_table();
    table.set_header(vec![granularity.to_string(), "Value".to_string()]);
    for v in values {
        table.add_row(vec![v.period_key.clone(), format!("{:.4}", v.value)]);
    }
    if !values.is_empty() {
        let total: f64 = values.iter().map(|v| v.value).sum();
        let (label, figure) = match calculation_type {
            CalculationType::Incremental => ("Total", total),
            CalculationType::Average => ("Mean", total / values.len() as f64),
        };
        table.add_row(Row::from(vec![
            Cell::new(label).fg(Color::Cyan),
            Cell::new(format!("{figure:.4}")).fg(Color::Cyan),
        ]));
    }
    table.to_string()
}

pub fn render_records_table(records: &[PeriodicRecord]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Year", "Site", "KPI", "Slot", "Granularity", "Period", "Value"]);
    for r in records {
        table.add_row(vec![
            r.year.to_string(),
            r.site_id.to_string(),
            r.kpi_id.to_string(),
            r.target_slot.to_string(),
            r.granularity.to_string(),
            r.period_key.clone(),
            format!("{:.4}", r.value),
        ]);
    }
    table.to_string()
}

pub fn render_report_table(report: &RecalcReport) -> String {
    let mut table = new_table();
    table.set_header(vec!["Year", "Site", "KPI", "Status", "Detail"]);
    for key in &report.recalculated {
        let cleared: Vec<String> = report
            .cleared
            .iter()
            .filter(|c| c.target == *key)
            .map(|c| format!("slot {} cleared", c.slot))
            .collect();
        table.add_row(Row::from(vec![
            Cell::new(key.year),
            Cell::new(key.site_id),
            Cell::new(key.kpi_id),
            Cell::new("RECALCULATED").fg(Color::Green),
            Cell::new(cleared.join(", ")),
        ]));
    }
    for skipped in &report.skipped {
        table.add_row(Row::from(vec![
            Cell::new(skipped.key.year),
            Cell::new(skipped.key.site_id),
            Cell::new(skipped.key.kpi_id),
            Cell::new("SKIPPED").fg(Color::Red),
            Cell::new(&skipped.reason),
        ]));
    }
    table.to_string()
}
