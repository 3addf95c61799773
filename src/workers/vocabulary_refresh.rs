//! Hourly: rebuild the skill vocabulary when the item corpus gained or lost skills.

use crate::adaptive::AdaptiveEngine;

pub async fn run(engine: &AdaptiveEngine) {
    tracing::debug!("Vocabulary refresh worker tick");

    match engine.refresh_vocabulary().await {
        Ok(true) => {
            let num_skills = engine.context().await.vocabulary().len();
            tracing::info!(num_skills, "Vocabulary refresh: skill vocabulary rebuilt");
        }
        Ok(false) => tracing::debug!("Vocabulary refresh: unchanged"),
        Err(e) => tracing::warn!(error = %e, "Vocabulary refresh failed"),
    }
}
