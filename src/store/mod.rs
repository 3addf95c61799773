pub mod keys;
pub mod migrate;
pub mod operations;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use thiserror::Error;

#[derive(Debug)]
pub struct Store {
    db: Db,
    pub items: sled::Tree,
    pub item_calibrations: sled::Tree,
    pub interactions: sled::Tree,
    pub abilities: sled::Tree,
    pub bandit_stats: sled::Tree,
    pub review_stats: sled::Tree,
    pub skill_vocabulary: sled::Tree,
    pub model_weights: sled::Tree,
    pub meta: sled::Tree,
    // Secondary index trees
    pub items_by_elo: sled::Tree,
    pub interactions_by_item: sled::Tree,
    pub interaction_counts: sled::Tree,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("conflict: {entity} already exists at key {key}")]
    Conflict { entity: String, key: String },
    #[error("CAS retry exhausted after {attempts} attempts: entity={entity}, key={key}")]
    CasRetryExhausted {
        entity: String,
        key: String,
        attempts: u32,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration error at version {version}: {message}")]
    Migration { version: u32, message: String },
}

impl Store {
    pub fn open(sled_path: &str) -> Result<Self, StoreError> {
        let db = sled::open(sled_path)?;
        let items = db.open_tree(trees::ITEMS)?;
        let item_calibrations = db.open_tree(trees::ITEM_CALIBRATIONS)?;
        let interactions = db.open_tree(trees::INTERACTIONS)?;
        let abilities = db.open_tree(trees::ABILITIES)?;
        let bandit_stats = db.open_tree(trees::BANDIT_STATS)?;
        let review_stats = db.open_tree(trees::REVIEW_STATS)?;
        let skill_vocabulary = db.open_tree(trees::SKILL_VOCABULARY)?;
        let model_weights = db.open_tree(trees::MODEL_WEIGHTS)?;
        let meta = db.open_tree(trees::META)?;
        // Secondary index trees
        let items_by_elo = db.open_tree(trees::ITEMS_BY_ELO)?;
        let interactions_by_item = db.open_tree(trees::INTERACTIONS_BY_ITEM)?;
        let interaction_counts = db.open_tree(trees::INTERACTION_COUNTS)?;

        Ok(Self {
            db,
            items,
            item_calibrations,
            interactions,
            abilities,
            bandit_stats,
            review_stats,
            skill_vocabulary,
            model_weights,
            meta,
            items_by_elo,
            interactions_by_item,
            interaction_counts,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        migrate::run(self)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Maps a sled transaction failure back onto [`StoreError`].
pub(crate) fn map_tx_error(error: sled::transaction::TransactionError<StoreError>) -> StoreError {
    match error {
        sled::transaction::TransactionError::Abort(store_error) => store_error,
        sled::transaction::TransactionError::Storage(storage_error) => {
            StoreError::Sled(storage_error)
        }
    }
}
