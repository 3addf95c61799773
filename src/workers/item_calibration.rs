//! Nightly: refit 3PL parameters for every item with enough responses.

use crate::adaptive::AdaptiveEngine;

pub async fn run(engine: &AdaptiveEngine) {
    tracing::info!("Item calibration worker running");

    match engine.calibrate_all_items().await {
        Ok(summary) => tracing::info!(
            items = summary.items,
            converged = summary.converged,
            insufficient = summary.insufficient,
            failed = summary.failed,
            "Item calibration complete"
        ),
        Err(e) => tracing::warn!(error = %e, "Item calibration failed"),
    }
}
