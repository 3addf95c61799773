use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::adaptive::bandit::BetaStats;
use crate::adaptive::config::SpacedRepetitionConfig;
use crate::adaptive::memory::hlr::{self, HalfLifeState};
use crate::store::keys;
use crate::store::operations::abilities::LearnerAbility;
use crate::store::operations::interactions::{Interaction, StagedInteraction};
use crate::store::{map_tx_error, Store, StoreError};

/// Statistics as written by [`Store::record_outcome_atomic`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedOutcome {
    pub bandit: BetaStats,
    pub review: HalfLifeState,
}

fn abort(error: StoreError) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(error)
}

impl Store {
    /// Appends the interaction and writes the learner's ability, the item's
    /// bandit row and the (learner, item) half-life row in one transaction.
    /// Bandit and half-life rows are read-modify-written inside it, so
    /// concurrent outcomes on the same item never lose an increment.
    pub fn record_outcome_atomic(
        &self,
        interaction: &Interaction,
        ability: &LearnerAbility,
        review_config: &SpacedRepetitionConfig,
    ) -> Result<RecordedOutcome, StoreError> {
        if !ability.theta.is_finite() {
            return Err(StoreError::Validation(format!(
                "theta must be finite for learner {}",
                interaction.learner_id
            )));
        }
        let staged = StagedInteraction::new(self, interaction)?;
        let ability_key = keys::ability_key(&interaction.learner_id)?;
        let ability_bytes = Self::serialize(ability)?;
        let bandit_key = keys::bandit_key(&interaction.item_id)?;
        let review_key = keys::review_key(&interaction.learner_id, &interaction.item_id)?;

        (
            &self.interactions,
            &self.interactions_by_item,
            &self.interaction_counts,
            &self.abilities,
            &self.bandit_stats,
            &self.review_stats,
        )
            .transaction(
                |(tx_interactions, tx_by_item, tx_counts, tx_abilities, tx_bandit, tx_review)| {
                    staged.apply(tx_interactions, tx_by_item, tx_counts)?;
                    tx_abilities.insert(ability_key.as_bytes(), ability_bytes.as_slice())?;

                    let mut bandit: BetaStats = match tx_bandit.get(bandit_key.as_bytes())? {
                        Some(raw) => Self::deserialize(&raw).map_err(abort)?,
                        None => BetaStats::default(),
                    };
                    bandit.record(interaction.is_correct);
                    tx_bandit.insert(
                        bandit_key.as_bytes(),
                        Self::serialize(&bandit).map_err(abort)?,
                    )?;

                    let previous: Option<HalfLifeState> = match tx_review.get(review_key.as_bytes())? {
                        Some(raw) => Some(Self::deserialize(&raw).map_err(abort)?),
                        None => None,
                    };
                    let review = hlr::update_half_life(
                        previous.as_ref(),
                        interaction.is_correct,
                        interaction.created_at,
                        review_config,
                    );
                    tx_review.insert(
                        review_key.as_bytes(),
                        Self::serialize(&review).map_err(abort)?,
                    )?;

                    Ok(RecordedOutcome { bandit, review })
                },
            )
            .map_err(map_tx_error)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn interaction(learner: &str, item: &str, correct: bool) -> Interaction {
        Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: learner.to_string(),
            item_id: item.to_string(),
            skills: vec!["inference".to_string()],
            is_correct: correct,
            theta_at_time: 0.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn outcome_updates_every_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        let config = SpacedRepetitionConfig::default();
        let ability = LearnerAbility {
            theta: 0.32,
            attempts: 1,
            updated_at: Utc::now(),
        };

        let first = store
            .record_outcome_atomic(&interaction("u1", "q1", true), &ability, &config)
            .unwrap();
        assert_eq!(first.bandit, BetaStats { alpha: 2.0, beta: 1.0 });
        assert_eq!(first.review.half_life_days, 2.0);

        let second = store
            .record_outcome_atomic(&interaction("u2", "q1", false), &ability, &config)
            .unwrap();
        assert_eq!(second.bandit, BetaStats { alpha: 2.0, beta: 2.0 });
        assert_eq!(second.review.half_life_days, 0.5);

        assert_eq!(store.count_interactions().unwrap(), 2);
        assert_eq!(store.interactions_for_item("q1").unwrap().len(), 2);
        assert_eq!(store.get_ability("u1").unwrap().theta, 0.32);
        assert_eq!(
            store.get_review_state("u1", "q1").unwrap().unwrap().n_correct,
            1
        );
    }

    #[test]
    fn invalid_key_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        let result = store.record_outcome_atomic(
            &interaction("u1", "bad:id", true),
            &LearnerAbility::default(),
            &SpacedRepetitionConfig::default(),
        );
        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(store.count_interactions().unwrap(), 0);
        assert!(store.bandit_report().unwrap().is_empty());
    }
}
