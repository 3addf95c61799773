//! Process-wide engine state that used to be global: the skill vocabulary
//! and the loaded knowledge tracers.
//!
//! Lifecycle: [`EngineContext::load`] runs once when the engine is opened.
//! The context is immutable afterwards; a corpus change or a retrained model
//! produces a new context that replaces the old one wholesale.

use std::sync::Arc;

use crate::adaptive::config::EngineConfig;
use crate::adaptive::error::EngineError;
use crate::adaptive::knowledge::windowed::WindowedWeights;
use crate::adaptive::knowledge::{KnowledgeTracer, TracerSet, WindowedModel};
use crate::adaptive::skills::SkillVocabulary;
use crate::constants::{SEQUENCE_MODEL_NAME, WINDOWED_MODEL_NAME};
use crate::store::Store;

#[derive(Clone)]
pub struct EngineContext {
    vocabulary: Arc<SkillVocabulary>,
    tracers: TracerSet,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("num_skills", &self.vocabulary.len())
            .field("sequence_loaded", &self.tracers.runtime_available())
            .finish()
    }
}

impl EngineContext {
    /// Loads the persisted vocabulary, building and saving it from the item
    /// corpus on first start, then the persisted model weights.
    pub fn load(store: &Store, config: &EngineConfig) -> Result<Self, EngineError> {
        let vocabulary = match store.get_vocabulary()? {
            Some(vocabulary) => vocabulary,
            None => {
                let built = SkillVocabulary::from_items(&store.list_items()?);
                store.set_vocabulary(&built)?;
                tracing::info!(num_skills = built.len(), "Built skill vocabulary from item corpus");
                built
            }
        };
        Ok(Self::from_store(store, Arc::new(vocabulary), config))
    }

    /// In-memory context with untrained models.
    pub fn from_vocabulary(vocabulary: SkillVocabulary, config: &EngineConfig) -> Self {
        let vocabulary = Arc::new(vocabulary);
        let windowed = WindowedModel::new(vocabulary.clone(), &config.knowledge_tracing);
        Self {
            tracers: TracerSet::new(Arc::new(windowed), None),
            vocabulary,
        }
    }

    fn from_store(store: &Store, vocabulary: Arc<SkillVocabulary>, config: &EngineConfig) -> Self {
        let kt = &config.knowledge_tracing;
        let windowed = match store.get_model_weights::<WindowedWeights>(WINDOWED_MODEL_NAME) {
            Ok(Some(saved)) => WindowedModel::with_weights(vocabulary.clone(), kt, &saved),
            Ok(None) => WindowedModel::new(vocabulary.clone(), kt),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load windowed weights, starting untrained");
                WindowedModel::new(vocabulary.clone(), kt)
            }
        };
        let sequence = load_sequence(store, &vocabulary, config);

        Self {
            tracers: TracerSet::new(Arc::new(windowed), sequence),
            vocabulary,
        }
    }

    pub fn vocabulary(&self) -> &Arc<SkillVocabulary> {
        &self.vocabulary
    }

    pub fn tracers(&self) -> &TracerSet {
        &self.tracers
    }

    pub fn with_windowed(&self, windowed: WindowedModel) -> Self {
        Self {
            vocabulary: self.vocabulary.clone(),
            tracers: self.tracers.with_windowed(Arc::new(windowed)),
        }
    }

    pub fn with_sequence(&self, sequence: Option<Arc<dyn KnowledgeTracer>>) -> Self {
        Self {
            vocabulary: self.vocabulary.clone(),
            tracers: self.tracers.with_sequence(sequence),
        }
    }

    /// Rebuilds the vocabulary from the current corpus. Returns `None` when it
    /// is unchanged. A changed vocabulary keeps windowed weights for surviving
    /// skills and drops the sequence model, whose input width and output
    /// positions no longer match.
    pub fn rebuild(&self, store: &Store, config: &EngineConfig) -> Result<Option<Self>, EngineError> {
        let rebuilt = SkillVocabulary::from_items(&store.list_items()?);
        if rebuilt == *self.vocabulary {
            return Ok(None);
        }

        store.set_vocabulary(&rebuilt)?;
        if store.remove_model_weights(SEQUENCE_MODEL_NAME)? {
            tracing::info!("Discarded sequence weights trained on the previous vocabulary");
        }
        tracing::info!(
            previous = self.vocabulary.len(),
            current = rebuilt.len(),
            "Skill vocabulary changed"
        );

        let vocabulary = Arc::new(rebuilt);
        let windowed = WindowedModel::with_weights(
            vocabulary.clone(),
            &config.knowledge_tracing,
            &self.tracers.windowed().export_weights(),
        );
        Ok(Some(Self {
            tracers: TracerSet::new(Arc::new(windowed), None),
            vocabulary,
        }))
    }
}

#[cfg(feature = "neural")]
fn load_sequence(
    store: &Store,
    vocabulary: &Arc<SkillVocabulary>,
    config: &EngineConfig,
) -> Option<Arc<dyn KnowledgeTracer>> {
    use crate::adaptive::knowledge::sequence::{SequenceModel, SequenceWeights};

    if !config.knowledge_tracing.neural_enabled {
        return None;
    }
    let weights = match store.get_model_weights::<SequenceWeights>(SEQUENCE_MODEL_NAME) {
        Ok(Some(weights)) => weights,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load sequence weights");
            return None;
        }
    };
    match SequenceModel::from_weights(vocabulary.clone(), &weights) {
        Ok(model) => Some(Arc::new(model)),
        Err(e) => {
            tracing::warn!(error = %e, "Stored sequence weights do not fit the vocabulary");
            None
        }
    }
}

#[cfg(not(feature = "neural"))]
fn load_sequence(
    _store: &Store,
    _vocabulary: &Arc<SkillVocabulary>,
    _config: &EngineConfig,
) -> Option<Arc<dyn KnowledgeTracer>> {
    None
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use std::collections::BTreeMap;

    use super::*;
    use crate::store::operations::items::Item;

    fn item(id: &str, skills: &[&str]) -> Item {
        Item {
            id: id.to_string(),
            question_type: "critical_reasoning".to_string(),
            difficulty_label: String::new(),
            stimulus: String::new(),
            question: "q".to_string(),
            choices: vec!["A".into(), "B".into()],
            correct_choice: "A".to_string(),
            explanation: String::new(),
            detailed_explanation: None,
            skills: skills.iter().map(|s| s.to_string()).collect(),
            skills_rationale: None,
            label_source: None,
            diagnoses: BTreeMap::new(),
            elo_difficulty: 1500.0,
            discrimination: 1.0,
            guessing: 0.2,
            is_verified: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn first_load_builds_and_persists_vocabulary() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        store.create_item(&item("q1", &["weaken", "assumption"])).unwrap();

        let context = EngineContext::load(&store, &EngineConfig::default()).unwrap();
        assert_eq!(context.vocabulary().skills(), &["assumption", "weaken"]);
        assert_eq!(store.get_vocabulary().unwrap().unwrap().len(), 2);
        assert!(!context.tracers().runtime_available());
    }

    #[test]
    fn rebuild_reports_only_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        store.create_item(&item("q1", &["inference"])).unwrap();
        let config = EngineConfig::default();
        let context = EngineContext::load(&store, &config).unwrap();

        assert!(context.rebuild(&store, &config).unwrap().is_none());

        store.create_item(&item("q2", &["flaw"])).unwrap();
        let rebuilt = context.rebuild(&store, &config).unwrap().unwrap();
        assert_eq!(rebuilt.vocabulary().skills(), &["flaw", "inference"]);
        assert_eq!(store.get_vocabulary().unwrap().unwrap().len(), 2);
    }

    #[cfg(feature = "neural")]
    #[test]
    fn sequence_weights_for_renamed_skills_are_not_loaded() {
        use crate::adaptive::knowledge::sequence::SequenceModel;

        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_str().unwrap()).unwrap();
        store.create_item(&item("q1", &["alpha", "beta"])).unwrap();
        let config = EngineConfig::default();
        let context = EngineContext::load(&store, &config).unwrap();
        let model = SequenceModel::new(context.vocabulary().clone(), 4).unwrap();
        store
            .set_model_weights(SEQUENCE_MODEL_NAME, &model.export_weights().unwrap())
            .unwrap();
        assert!(EngineContext::load(&store, &config)
            .unwrap()
            .tracers()
            .runtime_available());

        store
            .set_vocabulary(&SkillVocabulary::build(["alpha", "gamma"]))
            .unwrap();
        let reloaded = EngineContext::load(&store, &config).unwrap();
        assert_eq!(reloaded.vocabulary().skills(), &["alpha", "gamma"]);
        assert!(!reloaded.tracers().runtime_available());
    }
}
