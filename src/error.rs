use thiserror::Error;

use crate::kpi::{KpiId, SiteId};

#[derive(Debug, Error)]
pub enum RecalcError {
    #[error("no KPI specification for kpi {kpi_id}")]
    MissingKpi { kpi_id: KpiId },
    #[error("no annual target for year {year}, site {site_id}, kpi {kpi_id}")]
    MissingTarget {
        year: i32,
        site_id: SiteId,
        kpi_id: KpiId,
    },
    #[error("master kpi {master_kpi_id} links to unknown sub kpi {sub_kpi_id}")]
    MissingLinkedKpi {
        master_kpi_id: KpiId,
        sub_kpi_id: KpiId,
    },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RecalcError {
    /// Missing reference data only invalidates the tuple it was raised for.
    pub fn is_tuple_local(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}
