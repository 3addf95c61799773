//! Nightly: retrain the knowledge tracers on the full interaction log and
//! hot-swap them into the engine.

use crate::adaptive::AdaptiveEngine;

pub async fn run(engine: &AdaptiveEngine) {
    tracing::info!("Knowledge training worker running");

    let report = match engine.train_knowledge_models().await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(error = %e, "Knowledge training failed");
            return;
        }
    };

    tracing::info!(
        learners = report.learners,
        interactions = report.interactions,
        windowed_updates = report.windowed.num_updates,
        windowed_avg_loss = report.windowed.avg_loss,
        "Knowledge training complete"
    );

    #[cfg(feature = "neural")]
    if let Some(sequence) = &report.sequence {
        tracing::info!(
            best_epoch = sequence.best_epoch,
            val_accuracy = ?sequence.val_accuracy,
            "Sequence model retrained"
        );
    }
}
