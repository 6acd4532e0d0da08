use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::config::DistributionConfig;
use crate::error::RecalcError;
use crate::kpi::SiteId;
use crate::recalc::{compute_tuple, RecalcReport, Recalculator, SkippedTuple};
use crate::store::TargetStore;

/// Year recalculation with the per-tuple math spread over the blocking pool.
///
/// Masters and their subs go first, serially, since a sub's record must not
/// be written by two distributions at once. Every other tuple is computed
/// concurrently; writes then go through the store one atomic replace at a time.
pub async fn recalculate_year_parallel<S: TargetStore + ?Sized>(
    store: &S,
    config: Arc<DistributionConfig>,
    year: i32,
    site_id: Option<SiteId>,
) -> Result<RecalcReport, RecalcError> {
    let recalc = Recalculator::new(store, config.as_ref());
    let mut report = RecalcReport::default();
    let visited = recalc.masters_pass(year, site_id, &mut report)?;

    let mut handles = Vec::new();
    for target in store.annual_targets(year, site_id)? {
        let key = target.key();
        if visited.contains(&key) {
            continue;
        }
        let calc = match recalc.load_calculation_type(key.kpi_id) {
            Ok(calc) => calc,
            Err(err) if err.is_tuple_local() => {
                warn!("skipping {key}: {err}");
                report.skipped.push(SkippedTuple {
                    key,
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };
        let config = Arc::clone(&config);
        handles.push(tokio::task::spawn_blocking(move || {
            compute_tuple(&config, calc, &target)
        }));
    }
    debug!("year {year}: {} tuples queued on the blocking pool", handles.len());

    for handle in handles {
        let outcome = handle
            .await
            .map_err(|e| RecalcError::Store(anyhow!("tuple computation task failed: {e}")))?;
        recalc.write_tuple(&outcome, &mut report)?;
    }

    info!(
        "year {year} (parallel): {} tuples recalculated, {} slots cleared, {} skipped",
        report.recalculated.len(),
        report.cleared.len(),
        report.skipped.len()
    );
    Ok(report)
}
