use crate::adaptive::memory::HalfLifeState;
use crate::store::keys;
use crate::store::{Store, StoreError};

impl Store {
    pub fn get_review_state(
        &self,
        learner_id: &str,
        item_id: &str,
    ) -> Result<Option<HalfLifeState>, StoreError> {
        let key = keys::review_key(learner_id, item_id)?;
        match self.review_stats.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_review_state(
        &self,
        learner_id: &str,
        item_id: &str,
        state: &HalfLifeState,
    ) -> Result<(), StoreError> {
        let key = keys::review_key(learner_id, item_id)?;
        self.review_stats
            .insert(key.as_bytes(), Self::serialize(state)?)?;
        Ok(())
    }

    /// Every tracked (item, state) pair of one learner, ordered by item id.
    pub fn review_states_for_learner(
        &self,
        learner_id: &str,
    ) -> Result<Vec<(String, HalfLifeState)>, StoreError> {
        let prefix = keys::review_prefix(learner_id)?;
        let mut out = Vec::new();
        for entry in self.review_stats.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let item_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            out.push((item_id, Self::deserialize(&value)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn state(half_life_days: f64) -> HalfLifeState {
        HalfLifeState {
            half_life_days,
            last_practiced: Utc::now(),
            n_correct: 1,
            n_attempts: 1,
        }
    }

    #[test]
    fn states_are_scoped_per_learner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        store.set_review_state("u1", "q2", &state(2.0)).unwrap();
        store.set_review_state("u1", "q1", &state(0.5)).unwrap();
        store.set_review_state("u10", "q1", &state(4.0)).unwrap();

        let states = store.review_states_for_learner("u1").unwrap();
        let ids: Vec<&str> = states.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2"]);
        assert_eq!(states[0].1.half_life_days, 0.5);

        assert!(store.get_review_state("u2", "q1").unwrap().is_none());
        assert_eq!(
            store.get_review_state("u10", "q1").unwrap().unwrap().half_life_days,
            4.0
        );
    }
}
