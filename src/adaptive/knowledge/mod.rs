//! Knowledge tracing: per-skill mastery estimates from an interaction log.
//!
//! Two backends implement [`KnowledgeTracer`]. The windowed logistic model
//! is always present; the recurrent sequence model exists only when the
//! `neural` feature is compiled in and trained weights are loaded.
//! [`select_backend`] is the single place that chooses between them.

#[cfg(feature = "neural")]
pub mod sequence;
pub mod windowed;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::adaptive::error::EngineError;
use crate::store::operations::interactions::Interaction;

pub use windowed::WindowedModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracerKind {
    Windowed,
    Sequence,
}

impl TracerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windowed => "windowed",
            Self::Sequence => "sequence",
        }
    }
}

pub trait KnowledgeTracer: Send + Sync {
    fn kind(&self) -> TracerKind;

    /// `{skill: P(mastered)}` for every skill in the vocabulary.
    fn predict_mastery(&self, history: &[Interaction]) -> Result<HashMap<String, f64>, EngineError>;
}

/// Pure auto-selection rule: the sequence model needs both a runtime and enough data.
pub fn select_backend(runtime_available: bool, total_interactions: u64, threshold: u64) -> TracerKind {
    if runtime_available && total_interactions >= threshold {
        TracerKind::Sequence
    } else {
        TracerKind::Windowed
    }
}

/// The loaded backends. Cheap to clone; swapped wholesale when a model is retrained.
#[derive(Clone)]
pub struct TracerSet {
    windowed: Arc<WindowedModel>,
    sequence: Option<Arc<dyn KnowledgeTracer>>,
}

impl TracerSet {
    pub fn new(windowed: Arc<WindowedModel>, sequence: Option<Arc<dyn KnowledgeTracer>>) -> Self {
        Self { windowed, sequence }
    }

    pub fn windowed(&self) -> &Arc<WindowedModel> {
        &self.windowed
    }

    pub fn runtime_available(&self) -> bool {
        self.sequence.is_some()
    }

    pub fn with_windowed(&self, windowed: Arc<WindowedModel>) -> Self {
        Self {
            windowed,
            sequence: self.sequence.clone(),
        }
    }

    pub fn with_sequence(&self, sequence: Option<Arc<dyn KnowledgeTracer>>) -> Self {
        Self {
            windowed: self.windowed.clone(),
            sequence,
        }
    }

    /// Factory: the tracer to use for a log of `total_interactions` entries.
    pub fn select(&self, total_interactions: u64, threshold: u64) -> Arc<dyn KnowledgeTracer> {
        match (
            select_backend(self.runtime_available(), total_interactions, threshold),
            &self.sequence,
        ) {
            (TracerKind::Sequence, Some(sequence)) => sequence.clone(),
            _ => self.windowed.clone() as Arc<dyn KnowledgeTracer>,
        }
    }

    /// Predicts with the selected tracer, dropping one tier on failure.
    pub fn predict(&self, history: &[Interaction], total_interactions: u64, threshold: u64) -> MasteryEstimate {
        let tracer = self.select(total_interactions, threshold);
        match tracer.predict_mastery(history) {
            Ok(mastery) => MasteryEstimate {
                backend: tracer.kind(),
                mastery,
            },
            Err(e) => {
                tracing::warn!(
                    backend = tracer.kind().as_str(),
                    error = %e,
                    "Knowledge tracer failed, falling back to windowed model"
                );
                MasteryEstimate {
                    backend: TracerKind::Windowed,
                    mastery: self.windowed.predict(history),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryEstimate {
    pub backend: TracerKind,
    pub mastery: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillAgreement {
    pub error_rate: f64,
    pub mastery: f64,
    pub agreement: bool,
}

/// Compares error-rate mastery (1 − error rate) with model mastery for every
/// skill seen in `history`. Skills the model does not know read as 0.5.
pub fn compare_with_error_rates(
    history: &[Interaction],
    mastery: &HashMap<String, f64>,
    tolerance: f64,
) -> BTreeMap<String, SkillAgreement> {
    let mut counts: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for interaction in history {
        for skill in &interaction.skills {
            let entry = counts.entry(skill.as_str()).or_default();
            entry.1 += 1;
            if interaction.is_correct {
                entry.0 += 1;
            }
        }
    }

    counts
        .into_iter()
        .map(|(skill, (correct, total))| {
            let error_rate = if total > 0 {
                1.0 - f64::from(correct) / f64::from(total)
            } else {
                0.5
            };
            let model = mastery.get(skill).copied().unwrap_or(0.5);
            let agreement = ((1.0 - error_rate) - model).abs() < tolerance;
            (
                skill.to_string(),
                SkillAgreement {
                    error_rate,
                    mastery: model,
                    agreement,
                },
            )
        })
        .collect()
}

/// Learner-level split: the first `max(1, ⌊n·(1 − validation_fraction)⌋)`
/// sequences train, the rest validate.
pub fn split_learners<T>(sequences: &[T], validation_fraction: f64) -> (&[T], &[T]) {
    if sequences.is_empty() {
        return (sequences, sequences);
    }
    let n_train = ((sequences.len() as f64) * (1.0 - validation_fraction)).floor() as usize;
    let n_train = n_train.clamp(1, sequences.len());
    sequences.split_at(n_train)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochVerdict {
    Improved,
    Wait,
    Stop,
}

/// Early-stopping bookkeeping on validation loss.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_loss: f64,
    best_epoch: usize,
    waited: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_loss: f64::INFINITY,
            best_epoch: 0,
            waited: 0,
        }
    }

    pub fn observe(&mut self, epoch: usize, loss: f64) -> EpochVerdict {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = epoch;
            self.waited = 0;
            return EpochVerdict::Improved;
        }
        self.waited += 1;
        if self.waited >= self.patience {
            EpochVerdict::Stop
        } else {
            EpochVerdict::Wait
        }
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }

    pub fn best_loss(&self) -> f64 {
        self.best_loss
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::adaptive::config::KnowledgeTracingConfig;
    use crate::adaptive::skills::SkillVocabulary;

    struct Failing;

    impl KnowledgeTracer for Failing {
        fn kind(&self) -> TracerKind {
            TracerKind::Sequence
        }

        fn predict_mastery(&self, _history: &[Interaction]) -> Result<HashMap<String, f64>, EngineError> {
            Err(EngineError::Model("boom".to_string()))
        }
    }

    fn interaction(skills: &[&str], correct: bool) -> Interaction {
        Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: "u1".to_string(),
            item_id: "q1".to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            is_correct: correct,
            theta_at_time: 0.0,
            created_at: Utc::now(),
        }
    }

    fn windowed() -> Arc<WindowedModel> {
        let vocab = Arc::new(SkillVocabulary::build(["a", "b"]));
        Arc::new(WindowedModel::new(vocab, &KnowledgeTracingConfig::default()))
    }

    #[test]
    fn selection_needs_runtime_and_threshold() {
        assert_eq!(select_backend(false, 10_000, 50), TracerKind::Windowed);
        assert_eq!(select_backend(true, 49, 50), TracerKind::Windowed);
        assert_eq!(select_backend(true, 50, 50), TracerKind::Sequence);
    }

    #[test]
    fn set_without_sequence_always_returns_windowed() {
        let set = TracerSet::new(windowed(), None);
        assert!(!set.runtime_available());
        assert_eq!(set.select(1_000, 50).kind(), TracerKind::Windowed);
    }

    #[test]
    fn failing_sequence_model_falls_back() {
        let set = TracerSet::new(windowed(), Some(Arc::new(Failing)));
        assert_eq!(set.select(60, 50).kind(), TracerKind::Sequence);

        let estimate = set.predict(&[interaction(&["a"], true)], 60, 50);
        assert_eq!(estimate.backend, TracerKind::Windowed);
        assert_eq!(estimate.mastery.len(), 2);
    }

    #[test]
    fn comparison_flags_disagreement() {
        let history = vec![
            interaction(&["a"], true),
            interaction(&["a"], true),
            interaction(&["b"], false),
        ];
        let mastery: HashMap<String, f64> =
            [("a".to_string(), 0.9), ("b".to_string(), 0.8)].into_iter().collect();

        let report = compare_with_error_rates(&history, &mastery, 0.3);
        assert!(report["a"].agreement);
        assert_eq!(report["b"].error_rate, 1.0);
        assert!(!report["b"].agreement);
    }

    #[test]
    fn split_keeps_at_least_one_training_learner() {
        let seqs = vec![1, 2, 3, 4, 5];
        let (train, val) = split_learners(&seqs, 0.2);
        assert_eq!(train, &[1, 2, 3, 4]);
        assert_eq!(val, &[5]);

        let single = vec![1];
        let (train, val) = split_learners(&single, 0.2);
        assert_eq!(train.len(), 1);
        assert!(val.is_empty());
    }

    #[test]
    fn early_stopping_counts_patience_from_best() {
        let mut stopper = EarlyStopping::new(2);
        assert_eq!(stopper.observe(0, 1.0), EpochVerdict::Improved);
        assert_eq!(stopper.observe(1, 0.8), EpochVerdict::Improved);
        assert_eq!(stopper.observe(2, 0.9), EpochVerdict::Wait);
        assert_eq!(stopper.observe(3, 0.85), EpochVerdict::Stop);
        assert_eq!(stopper.best_epoch(), 1);
    }
}
