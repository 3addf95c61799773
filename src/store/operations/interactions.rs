use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;
use std::collections::BTreeMap;

use crate::store::keys;
use crate::store::{map_tx_error, Store, StoreError};

/// One answered attempt. Append-only: never updated or deleted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: String,
    pub learner_id: String,
    pub item_id: String,
    /// Skill tags of the item at the time of the attempt.
    pub skills: Vec<String>,
    pub is_correct: bool,
    pub theta_at_time: f64,
    pub created_at: DateTime<Utc>,
}

/// Keys and bytes prepared outside a transaction so the closure stays cheap to retry.
pub(crate) struct StagedInteraction {
    key: String,
    bytes: Vec<u8>,
    item_index_key: String,
}

impl StagedInteraction {
    pub(crate) fn new(store: &Store, interaction: &Interaction) -> Result<Self, StoreError> {
        let ts = interaction.created_at.timestamp_millis();
        let seq = store.db.generate_id()?;
        Ok(Self {
            key: keys::interaction_key(&interaction.learner_id, ts, seq)?,
            bytes: Store::serialize(interaction)?,
            item_index_key: keys::interaction_by_item_key(&interaction.item_id, ts, seq)?,
        })
    }

    pub(crate) fn apply(
        &self,
        tx_interactions: &TransactionalTree,
        tx_by_item: &TransactionalTree,
        tx_counts: &TransactionalTree,
    ) -> Result<(), ConflictableTransactionError<StoreError>> {
        tx_interactions.insert(self.key.as_bytes(), self.bytes.as_slice())?;
        tx_by_item.insert(self.item_index_key.as_bytes(), self.key.as_bytes())?;
        let total = tx_counts
            .get(keys::INTERACTION_TOTAL_KEY.as_bytes())?
            .map(|raw| decode_count(&raw))
            .unwrap_or(0);
        tx_counts.insert(
            keys::INTERACTION_TOTAL_KEY.as_bytes(),
            &(total + 1).to_be_bytes(),
        )?;
        Ok(())
    }
}

fn decode_count(raw: &[u8]) -> u64 {
    let bytes: [u8; 8] = raw.try_into().unwrap_or([0; 8]);
    u64::from_be_bytes(bytes)
}

impl Store {
    pub fn append_interaction(&self, interaction: &Interaction) -> Result<(), StoreError> {
        let staged = StagedInteraction::new(self, interaction)?;
        (
            &self.interactions,
            &self.interactions_by_item,
            &self.interaction_counts,
        )
            .transaction(|(tx_interactions, tx_by_item, tx_counts)| {
                staged.apply(tx_interactions, tx_by_item, tx_counts)
            })
            .map_err(map_tx_error)
    }

    /// All interactions of one learner, oldest first.
    pub fn interactions_for_learner(&self, learner_id: &str) -> Result<Vec<Interaction>, StoreError> {
        let prefix = keys::interaction_prefix(learner_id)?;
        let mut out = Vec::new();
        for entry in self.interactions.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }

    /// All interactions recorded against one item, oldest first.
    pub fn interactions_for_item(&self, item_id: &str) -> Result<Vec<Interaction>, StoreError> {
        let prefix = keys::interaction_by_item_prefix(item_id)?;
        let mut out = Vec::new();
        for entry in self.interactions_by_item.scan_prefix(prefix.as_bytes()) {
            let (_, primary_key) = entry?;
            match self.interactions.get(&primary_key)? {
                Some(raw) => out.push(Self::deserialize(&raw)?),
                None => tracing::warn!(item_id, "Dangling interactions_by_item entry"),
            }
        }
        Ok(out)
    }

    /// Total interactions across all learners.
    pub fn count_interactions(&self) -> Result<u64, StoreError> {
        match self
            .interaction_counts
            .get(keys::INTERACTION_TOTAL_KEY.as_bytes())?
        {
            Some(raw) => Ok(decode_count(&raw)),
            None => Ok(self.interactions.len() as u64),
        }
    }

    /// Every learner's interactions grouped by learner id (sorted), each oldest first.
    pub fn interaction_sequences(&self) -> Result<BTreeMap<String, Vec<Interaction>>, StoreError> {
        let mut sequences: BTreeMap<String, Vec<Interaction>> = BTreeMap::new();
        for entry in self.interactions.iter() {
            let (_, value) = entry?;
            let interaction: Interaction = Self::deserialize(&value)?;
            sequences
                .entry(interaction.learner_id.clone())
                .or_default()
                .push(interaction);
        }
        Ok(sequences)
    }

    /// Rebuilds the per-item index and the global counter from the primary tree.
    pub fn rebuild_interaction_indexes(&self) -> Result<u64, StoreError> {
        self.interactions_by_item.clear()?;
        let mut total = 0u64;
        for entry in self.interactions.iter() {
            let (key, value) = entry?;
            let interaction: Interaction = Self::deserialize(&value)?;
            let seq = match keys::parse_interaction_seq(&key) {
                Some(seq) => seq,
                None => self.db.generate_id()?,
            };
            let index_key = keys::interaction_by_item_key(
                &interaction.item_id,
                interaction.created_at.timestamp_millis(),
                seq,
            )?;
            self.interactions_by_item.insert(index_key.as_bytes(), key)?;
            total += 1;
        }
        self.interaction_counts
            .insert(keys::INTERACTION_TOTAL_KEY.as_bytes(), &total.to_be_bytes())?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use super::*;

    fn interaction(learner: &str, item: &str, minute: i64, correct: bool) -> Interaction {
        Interaction {
            id: format!("{learner}-{item}-{minute}"),
            learner_id: learner.to_string(),
            item_id: item.to_string(),
            skills: vec!["inference".to_string()],
            is_correct: correct,
            theta_at_time: 0.0,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minute),
        }
    }

    #[test]
    fn append_maintains_index_and_counter() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();

        store.append_interaction(&interaction("u1", "q1", 0, true)).unwrap();
        store.append_interaction(&interaction("u2", "q1", 1, false)).unwrap();
        store.append_interaction(&interaction("u1", "q2", 2, false)).unwrap();

        assert_eq!(store.count_interactions().unwrap(), 3);
        assert_eq!(store.interactions_for_item("q1").unwrap().len(), 2);
        assert_eq!(store.interactions_for_learner("u1").unwrap().len(), 2);
    }

    #[test]
    fn same_timestamp_appends_keep_their_order() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let items: Vec<String> = (0..40).map(|i| format!("q{}", i % 5)).collect();
        for (n, item) in items.iter().enumerate() {
            let mut attempt = interaction("u1", item, 0, true);
            attempt.id = format!("attempt-{n}");
            store.append_interaction(&attempt).unwrap();
        }

        let logged: Vec<String> = store
            .interactions_for_learner("u1")
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        let expected: Vec<String> = (0..40).map(|n| format!("attempt-{n}")).collect();
        assert_eq!(logged, expected);
        let tail: Vec<String> = store
            .interactions_for_learner("u1")
            .unwrap()
            .into_iter()
            .rev()
            .take(3)
            .map(|i| i.item_id)
            .collect();
        assert_eq!(tail, vec!["q4", "q3", "q2"]);

        let by_item: Vec<String> = store
            .interactions_for_item("q0")
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(by_item.first().map(String::as_str), Some("attempt-0"));
        assert_eq!(by_item.last().map(String::as_str), Some("attempt-35"));
    }

    #[test]
    fn sequences_are_grouped_and_chronological() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        store.append_interaction(&interaction("b", "q2", 5, true)).unwrap();
        store.append_interaction(&interaction("a", "q1", 3, true)).unwrap();
        store.append_interaction(&interaction("b", "q1", 1, false)).unwrap();

        let sequences = store.interaction_sequences().unwrap();
        let learners: Vec<&String> = sequences.keys().collect();
        assert_eq!(learners, vec!["a", "b"]);
        let b_items: Vec<&str> = sequences["b"].iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(b_items, vec!["q1", "q2"]);
    }

    #[test]
    fn rebuild_restores_counter() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        store.append_interaction(&interaction("u1", "q1", 0, true)).unwrap();
        store.interaction_counts.clear().unwrap();
        store.interactions_by_item.clear().unwrap();

        assert_eq!(store.rebuild_interaction_indexes().unwrap(), 1);
        assert_eq!(store.count_interactions().unwrap(), 1);
        assert_eq!(store.interactions_for_item("q1").unwrap().len(), 1);
    }
}
