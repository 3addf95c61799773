use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Transactional;
use std::collections::{BTreeMap, HashSet};

use crate::constants::{DEFAULT_DISCRIMINATION, DEFAULT_GUESSING};
use crate::store::keys;
use crate::store::{map_tx_error, Store, StoreError};

fn default_discrimination() -> f64 {
    DEFAULT_DISCRIMINATION
}

fn default_guessing() -> f64 {
    DEFAULT_GUESSING
}

fn default_verified() -> bool {
    true
}

/// A question as authored. Items are immutable once created; calibrated
/// parameters live in `item_calibrations` and are overlaid at selection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub question_type: String,
    /// Authoring label such as "easy" or "hard"; not used for selection.
    #[serde(default)]
    pub difficulty_label: String,
    #[serde(default)]
    pub stimulus: String,
    pub question: String,
    pub choices: Vec<String>,
    pub correct_choice: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub detailed_explanation: Option<String>,
    pub skills: Vec<String>,
    #[serde(default)]
    pub skills_rationale: Option<String>,
    #[serde(default)]
    pub label_source: Option<String>,
    /// Per-choice misconception notes, keyed by choice label.
    #[serde(default)]
    pub diagnoses: BTreeMap<String, String>,
    pub elo_difficulty: f64,
    #[serde(default = "default_discrimination")]
    pub discrimination: f64,
    #[serde(default = "default_guessing")]
    pub guessing: f64,
    #[serde(default = "default_verified")]
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Inserts a new item together with its difficulty index entry.
    /// Fails with `Conflict` when the id already exists.
    pub fn create_item(&self, item: &Item) -> Result<(), StoreError> {
        if !item.elo_difficulty.is_finite() {
            return Err(StoreError::Validation(format!(
                "item {} has non-finite elo_difficulty",
                item.id
            )));
        }
        let key = keys::item_key(&item.id)?;
        let index_key = keys::item_elo_index_key(item.elo_difficulty, &item.id)?;
        let bytes = Self::serialize(item)?;

        (&self.items, &self.items_by_elo)
            .transaction(|(tx_items, tx_index)| {
                if tx_items.get(key.as_bytes())?.is_some() {
                    return Err(sled::transaction::ConflictableTransactionError::Abort(
                        StoreError::Conflict {
                            entity: "item".to_string(),
                            key: key.clone(),
                        },
                    ));
                }
                tx_items.insert(key.as_bytes(), bytes.as_slice())?;
                tx_index.insert(index_key.as_bytes(), key.as_bytes())?;
                Ok(())
            })
            .map_err(map_tx_error)
    }

    pub fn get_item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        let key = keys::item_key(item_id)?;
        match self.items.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_items(&self) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        for entry in self.items.iter() {
            let (_, value) = entry?;
            items.push(Self::deserialize::<Item>(&value)?);
        }
        Ok(items)
    }

    /// Verified items whose elo lies in `[center - radius, center + radius]`,
    /// skipping `exclude`, nearest to `center` first (ties by id), at most `limit`.
    pub fn items_near_elo(
        &self,
        center: f64,
        radius: f64,
        exclude: &HashSet<String>,
        limit: usize,
    ) -> Result<Vec<Item>, StoreError> {
        let (start, end) = keys::item_elo_range(center - radius, center + radius);
        let mut found = Vec::new();

        for entry in self.items_by_elo.range(start.as_bytes()..end.as_bytes()) {
            let (index_key, _) = entry?;
            let Some(item_id) = keys::parse_item_elo_index_key(&index_key) else {
                tracing::warn!("Skipping malformed items_by_elo key");
                continue;
            };
            if exclude.contains(&item_id) {
                continue;
            }
            match self.get_item(&item_id)? {
                Some(item) if item.is_verified => found.push(item),
                Some(_) => {}
                None => {
                    tracing::warn!(item_id = %item_id, "Dangling items_by_elo entry");
                }
            }
        }

        found.sort_by(|a, b| {
            let da = (a.elo_difficulty - center).abs();
            let db = (b.elo_difficulty - center).abs();
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        found.truncate(limit);
        Ok(found)
    }

    /// Rebuilds the difficulty index from the primary item tree.
    pub fn rebuild_item_elo_index(&self) -> Result<usize, StoreError> {
        self.items_by_elo.clear()?;
        let mut indexed = 0usize;
        for entry in self.items.iter() {
            let (key, value) = entry?;
            let item: Item = Self::deserialize(&value)?;
            let index_key = keys::item_elo_index_key(item.elo_difficulty, &item.id)?;
            self.items_by_elo.insert(index_key.as_bytes(), key)?;
            indexed += 1;
        }
        Ok(indexed)
    }
}
