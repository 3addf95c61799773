//! Collaborator interfaces the engine consumes. [`Store`] implements all of
//! them; tests and embedders may supply their own.

use std::collections::{HashMap, HashSet};

use crate::adaptive::bandit::BetaStats;
use crate::adaptive::memory::HalfLifeState;
use crate::store::operations::calibrations::ItemCalibration;
use crate::store::operations::interactions::Interaction;
use crate::store::operations::items::Item;
use crate::store::{Store, StoreError};

pub trait ContentStore {
    /// Items within `radius` elo of `target_elo`, minus `exclude`, nearest first.
    fn candidates_near(
        &self,
        target_elo: f64,
        radius: f64,
        exclude: &HashSet<String>,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError>;

    fn item(&self, item_id: &str) -> Result<Option<Item>, StoreError>;

    /// Latest calibrations for `item_ids`. Content without calibration data returns nothing.
    fn calibrations(&self, _item_ids: &[String]) -> Result<HashMap<String, ItemCalibration>, StoreError> {
        Ok(HashMap::new())
    }
}

pub trait InteractionLog {
    fn append_interaction(&self, interaction: &Interaction) -> Result<(), StoreError>;

    /// Oldest first.
    fn interactions_for(&self, learner_id: &str) -> Result<Vec<Interaction>, StoreError>;

    fn count_interactions(&self) -> Result<u64, StoreError>;
}

/// Bandit and spaced-repetition statistics read during selection.
pub trait SelectionStats {
    fn bandit_stats(&self, item_ids: &[String]) -> Result<HashMap<String, BetaStats>, StoreError>;

    fn review_states(&self, learner_id: &str) -> Result<Vec<(String, HalfLifeState)>, StoreError>;
}

impl ContentStore for Store {
    fn candidates_near(
        &self,
        target_elo: f64,
        radius: f64,
        exclude: &HashSet<String>,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        self.items_near_elo(target_elo, radius, exclude, limit)
    }

    fn item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        self.get_item(item_id)
    }

    fn calibrations(&self, item_ids: &[String]) -> Result<HashMap<String, ItemCalibration>, StoreError> {
        self.get_calibrations_by_ids(item_ids)
    }
}

impl InteractionLog for Store {
    fn append_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        Store::append_interaction(self, interaction)
    }

    fn interactions_for(&self, learner_id: &str) -> Result<Vec<Interaction>, StoreError> {
        self.interactions_for_learner(learner_id)
    }

    fn count_interactions(&self) -> Result<u64, StoreError> {
        Store::count_interactions(self)
    }
}

impl SelectionStats for Store {
    fn bandit_stats(&self, item_ids: &[String]) -> Result<HashMap<String, BetaStats>, StoreError> {
        self.get_bandit_stats_by_ids(item_ids)
    }

    fn review_states(&self, learner_id: &str) -> Result<Vec<(String, HalfLifeState)>, StoreError> {
        self.review_states_for_learner(learner_id)
    }
}
