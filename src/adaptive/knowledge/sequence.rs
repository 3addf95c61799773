//! Recurrent sequence tracer: one LSTM layer over 2K-wide interaction
//! encodings, a linear head to K logits and a sigmoid, read at the last step.
//!
//! Training targets are next-step outcomes. Loss is binary cross-entropy
//! restricted to skills tagged on the next interaction.

use candle_core::{DType, Device, Tensor};
use candle_nn::{
    linear, lstm, AdamW, LSTMConfig, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap,
    LSTM, RNN,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::adaptive::config::KnowledgeTracingConfig;
use crate::adaptive::error::{map_candle_err, EngineError};
use crate::adaptive::knowledge::{
    split_learners, EarlyStopping, EpochVerdict, KnowledgeTracer, TracerKind,
};
use crate::adaptive::skills::SkillVocabulary;
use crate::store::operations::interactions::Interaction;

/// Every trainable tensor, flattened, keyed by parameter path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceWeights {
    pub num_skills: usize,
    /// Skill at each input/output position when the weights were trained.
    #[serde(default)]
    pub skills: Vec<String>,
    pub hidden_size: usize,
    pub tensors: BTreeMap<String, StoredTensor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceTrainingReport {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub train_learners: usize,
    pub val_learners: usize,
    /// Next-step accuracy on the validation learners, when any were held out.
    pub val_accuracy: Option<f64>,
}

struct Batch {
    inputs: Tensor,
    targets: Tensor,
    mask: Tensor,
    mask_count: f64,
}

pub struct SequenceModel {
    vocabulary: Arc<SkillVocabulary>,
    varmap: VarMap,
    lstm: LSTM,
    head: Linear,
    hidden_size: usize,
    device: Device,
}

impl std::fmt::Debug for SequenceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceModel")
            .field("num_skills", &self.vocabulary.len())
            .field("hidden_size", &self.hidden_size)
            .finish()
    }
}

impl SequenceModel {
    /// Freshly initialised network sized to `vocabulary`.
    pub fn new(vocabulary: Arc<SkillVocabulary>, hidden_size: usize) -> Result<Self, EngineError> {
        if vocabulary.is_empty() {
            return Err(EngineError::InvalidInput(
                "sequence model needs a non-empty skill vocabulary".to_string(),
            ));
        }
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let k = vocabulary.len();
        let lstm = lstm(2 * k, hidden_size, LSTMConfig::default(), vb.pp("lstm"))
            .map_err(map_candle_err)?;
        let head = linear(hidden_size, k, vb.pp("head")).map_err(map_candle_err)?;

        Ok(Self {
            vocabulary,
            varmap,
            lstm,
            head,
            hidden_size,
            device,
        })
    }

    /// Rebuilds a network from exported weights. Fails when the shapes do not
    /// match `vocabulary`.
    pub fn from_weights(
        vocabulary: Arc<SkillVocabulary>,
        weights: &SequenceWeights,
    ) -> Result<Self, EngineError> {
        if weights.num_skills != vocabulary.len() {
            return Err(EngineError::InvalidInput(format!(
                "sequence weights cover {} skills, vocabulary has {}",
                weights.num_skills,
                vocabulary.len()
            )));
        }
        if weights.skills != vocabulary.skills() {
            return Err(EngineError::InvalidInput(
                "sequence weights were trained on a different skill vocabulary".to_string(),
            ));
        }
        let model = Self::new(vocabulary, weights.hidden_size)?;
        model.import_weights(weights)?;
        Ok(model)
    }

    pub fn vocabulary(&self) -> &Arc<SkillVocabulary> {
        &self.vocabulary
    }

    fn logits(&self, inputs: &Tensor) -> candle_core::Result<Tensor> {
        let states = self.lstm.seq(inputs)?;
        let hidden = self.lstm.states_to_tensor(&states)?;
        self.head.forward(&hidden)
    }

    fn encode_steps(&self, steps: &[Interaction]) -> candle_core::Result<Tensor> {
        let width = 2 * self.vocabulary.len();
        let mut flat = Vec::with_capacity(steps.len() * width);
        for step in steps {
            flat.extend(self.vocabulary.encode(&step.skills, step.is_correct));
        }
        Tensor::from_vec(flat, (1, steps.len(), width), &self.device)
    }

    /// Inputs are steps 0..T-1, targets are outcomes at steps 1..T. `None`
    /// when the sequence is too short or no next step carries a known skill.
    fn batch(&self, sequence: &[Interaction]) -> candle_core::Result<Option<Batch>> {
        if sequence.len() < 2 {
            return Ok(None);
        }
        let k = self.vocabulary.len();
        let steps = sequence.len() - 1;
        let mut targets = Vec::with_capacity(steps * k);
        let mut mask = Vec::with_capacity(steps * k);
        for next in &sequence[1..] {
            let tagged = self.vocabulary.skill_mask(&next.skills);
            let outcome = if next.is_correct { 1.0 } else { 0.0 };
            targets.extend(tagged.iter().map(|m| m * outcome));
            mask.extend(tagged);
        }
        let mask_count: f64 = mask.iter().map(|m| f64::from(*m)).sum();
        if mask_count == 0.0 {
            return Ok(None);
        }

        Ok(Some(Batch {
            inputs: self.encode_steps(&sequence[..steps])?,
            targets: Tensor::from_vec(targets, (1, steps, k), &self.device)?,
            mask: Tensor::from_vec(mask, (1, steps, k), &self.device)?,
            mask_count,
        }))
    }

    /// Mean masked BCE, computed from logits as max(x,0) − x·y + ln(1 + e^−|x|).
    fn masked_loss(&self, batch: &Batch) -> candle_core::Result<Tensor> {
        let logits = self.logits(&batch.inputs)?;
        let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
        let bce = logits
            .relu()?
            .sub(&logits.mul(&batch.targets)?)?
            .add(&softplus)?;
        bce.mul(&batch.mask)?
            .sum_all()?
            .affine(1.0 / batch.mask_count, 0.0)
    }

    fn probabilities(&self, steps: &[Interaction]) -> candle_core::Result<Tensor> {
        let logits = self.logits(&self.encode_steps(steps)?)?;
        // (1, T, K) -> (T, K)
        logits.neg()?.exp()?.affine(1.0, 1.0)?.recip()?.squeeze(0)
    }

    pub fn predict(&self, history: &[Interaction]) -> Result<HashMap<String, f64>, EngineError> {
        if history.is_empty() {
            return Ok(self
                .vocabulary
                .skills()
                .iter()
                .map(|skill| (skill.clone(), 0.5))
                .collect());
        }
        let last = self
            .probabilities(history)
            .and_then(|p| p.get(history.len() - 1))
            .and_then(|p| p.to_vec1::<f32>())
            .map_err(map_candle_err)?;
        Ok(self.vocabulary.decode(&last))
    }

    fn snapshot(&self) -> Result<HashMap<String, Tensor>, EngineError> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| EngineError::Model("variable map lock poisoned".to_string()))?;
        data.iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy().map_err(map_candle_err)?)))
            .collect()
    }

    fn restore(&self, snapshot: &HashMap<String, Tensor>) -> Result<(), EngineError> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| EngineError::Model("variable map lock poisoned".to_string()))?;
        for (name, var) in data.iter() {
            let Some(saved) = snapshot.get(name) else {
                return Err(EngineError::Model(format!("missing tensor {name} in snapshot")));
            };
            var.set(saved).map_err(map_candle_err)?;
        }
        Ok(())
    }

    pub fn export_weights(&self) -> Result<SequenceWeights, EngineError> {
        let mut tensors = BTreeMap::new();
        for (name, tensor) in self.snapshot()? {
            let shape = tensor.dims().to_vec();
            let values = tensor
                .flatten_all()
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(map_candle_err)?;
            tensors.insert(name, StoredTensor { shape, values });
        }
        Ok(SequenceWeights {
            num_skills: self.vocabulary.len(),
            skills: self.vocabulary.skills().to_vec(),
            hidden_size: self.hidden_size,
            tensors,
        })
    }

    pub fn import_weights(&self, weights: &SequenceWeights) -> Result<(), EngineError> {
        let mut snapshot = HashMap::with_capacity(weights.tensors.len());
        for (name, stored) in &weights.tensors {
            let tensor = Tensor::from_vec(stored.values.clone(), stored.shape.as_slice(), &self.device)
                .map_err(map_candle_err)?;
            snapshot.insert(name.clone(), tensor);
        }
        self.restore(&snapshot)
    }

    fn mean_loss(&self, sequences: &[Vec<Interaction>]) -> Result<Option<f64>, EngineError> {
        let mut total = 0.0;
        let mut batches = 0usize;
        for sequence in sequences {
            let Some(batch) = self.batch(sequence).map_err(map_candle_err)? else {
                continue;
            };
            let loss = self
                .masked_loss(&batch)
                .and_then(|l| l.to_scalar::<f32>())
                .map_err(map_candle_err)?;
            total += f64::from(loss);
            batches += 1;
        }
        Ok((batches > 0).then(|| total / batches as f64))
    }

    /// Share of next steps where mean predicted mastery over the step's
    /// skills (> 0.5) matches the observed outcome.
    pub fn next_step_accuracy(&self, sequences: &[Vec<Interaction>]) -> Result<Option<f64>, EngineError> {
        let mut hits = 0u64;
        let mut total = 0u64;
        for sequence in sequences {
            if sequence.len() < 2 {
                continue;
            }
            let probs = self
                .probabilities(&sequence[..sequence.len() - 1])
                .and_then(|p| p.to_vec2::<f32>())
                .map_err(map_candle_err)?;
            for (row, next) in probs.iter().zip(sequence[1..].iter()) {
                let ids: Vec<usize> = next
                    .skills
                    .iter()
                    .filter_map(|s| self.vocabulary.id_of(s))
                    .collect();
                if ids.is_empty() {
                    continue;
                }
                let mean = ids.iter().map(|id| f64::from(row[*id])).sum::<f64>() / ids.len() as f64;
                if (mean > 0.5) == next.is_correct {
                    hits += 1;
                }
                total += 1;
            }
        }
        Ok((total > 0).then(|| hits as f64 / total as f64))
    }

    /// Trains in place: Adam over per-learner batches, learner-level
    /// train/validation split, early stopping on validation loss. The best
    /// epoch's weights are restored before returning.
    pub fn train(
        &mut self,
        sequences: &[Vec<Interaction>],
        config: &KnowledgeTracingConfig,
    ) -> Result<SequenceTrainingReport, EngineError> {
        let (train_set, val_set) = split_learners(sequences, config.validation_fraction);
        let params = ParamsAdamW {
            lr: config.sequence_learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params).map_err(map_candle_err)?;

        let mut stopper = EarlyStopping::new(config.patience);
        let mut best: Option<HashMap<String, Tensor>> = None;
        let mut train_losses = Vec::with_capacity(config.epochs);
        let mut val_losses = Vec::with_capacity(config.epochs);
        let mut best_epoch = 0;

        for epoch in 0..config.epochs {
            let mut epoch_loss = 0.0;
            let mut batches = 0usize;
            for sequence in train_set {
                let Some(batch) = self.batch(sequence).map_err(map_candle_err)? else {
                    continue;
                };
                let loss = self.masked_loss(&batch).map_err(map_candle_err)?;
                optimizer.backward_step(&loss).map_err(map_candle_err)?;
                epoch_loss += f64::from(loss.to_scalar::<f32>().map_err(map_candle_err)?);
                batches += 1;
            }
            train_losses.push(epoch_loss / batches.max(1) as f64);

            match self.mean_loss(val_set)? {
                Some(val_loss) => {
                    val_losses.push(val_loss);
                    match stopper.observe(epoch, val_loss) {
                        EpochVerdict::Improved => {
                            best_epoch = epoch;
                            best = Some(self.snapshot()?);
                        }
                        EpochVerdict::Wait => {}
                        EpochVerdict::Stop => {
                            tracing::info!(epoch, best_epoch, "Sequence model early stopping");
                            break;
                        }
                    }
                }
                None => {
                    best_epoch = epoch;
                    best = Some(self.snapshot()?);
                }
            }
        }

        if let Some(snapshot) = &best {
            self.restore(snapshot)?;
        }

        Ok(SequenceTrainingReport {
            epochs_run: train_losses.len(),
            train_losses,
            val_losses,
            best_epoch,
            train_learners: train_set.len(),
            val_learners: val_set.len(),
            val_accuracy: self.next_step_accuracy(val_set)?,
        })
    }
}

impl KnowledgeTracer for SequenceModel {
    fn kind(&self) -> TracerKind {
        TracerKind::Sequence
    }

    fn predict_mastery(&self, history: &[Interaction]) -> Result<HashMap<String, f64>, EngineError> {
        self.predict(history)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn interaction(learner: &str, skills: &[&str], correct: bool, step: i64) -> Interaction {
        Interaction {
            id: format!("{learner}-{step}"),
            learner_id: learner.to_string(),
            item_id: format!("q{step}"),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            is_correct: correct,
            theta_at_time: 0.0,
            created_at: Utc::now() + Duration::seconds(step),
        }
    }

    fn vocab() -> Arc<SkillVocabulary> {
        Arc::new(SkillVocabulary::build(["assumption", "flaw", "inference"]))
    }

    fn learner(name: &str, len: i64) -> Vec<Interaction> {
        (0..len)
            .map(|i| {
                let skill = ["assumption", "flaw", "inference"][(i % 3) as usize];
                interaction(name, &[skill], skill != "flaw", i)
            })
            .collect()
    }

    #[test]
    fn empty_vocabulary_is_rejected() {
        let err = SequenceModel::new(Arc::new(SkillVocabulary::default()), 8).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn empty_history_predicts_neutral() {
        let model = SequenceModel::new(vocab(), 8).unwrap();
        let mastery = model.predict(&[]).unwrap();
        assert_eq!(mastery.len(), 3);
        assert!(mastery.values().all(|p| *p == 0.5));
    }

    #[test]
    fn prediction_covers_every_skill_with_probabilities() {
        let model = SequenceModel::new(vocab(), 8).unwrap();
        let mastery = model.predict(&learner("u1", 5)).unwrap();
        assert_eq!(mastery.len(), 3);
        assert!(mastery.values().all(|p| *p > 0.0 && *p < 1.0));
    }

    #[test]
    fn untagged_next_steps_produce_no_batch() {
        let model = SequenceModel::new(vocab(), 8).unwrap();
        let seq = vec![
            interaction("u1", &["assumption"], true, 0),
            interaction("u1", &["unknown"], false, 1),
        ];
        assert!(model.batch(&seq).unwrap().is_none());
        assert!(model.batch(&seq[..1]).unwrap().is_none());
    }

    #[test]
    fn exported_weights_reproduce_predictions() {
        let model = SequenceModel::new(vocab(), 8).unwrap();
        let history = learner("u1", 6);
        let weights = model.export_weights().unwrap();

        let restored = SequenceModel::from_weights(vocab(), &weights).unwrap();
        assert_eq!(restored.predict(&history).unwrap(), model.predict(&history).unwrap());

        let json = serde_json::to_vec(&weights).unwrap();
        let parsed: SequenceWeights = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, weights);
    }

    #[test]
    fn weights_for_other_vocabulary_are_rejected() {
        let model = SequenceModel::new(vocab(), 8).unwrap();
        let weights = model.export_weights().unwrap();
        let other = Arc::new(SkillVocabulary::build(["only"]));
        assert!(SequenceModel::from_weights(other, &weights).is_err());
    }

    #[test]
    fn weights_for_same_width_but_renamed_skills_are_rejected() {
        let model = SequenceModel::new(vocab(), 8).unwrap();
        let weights = model.export_weights().unwrap();
        let renamed: Vec<String> = vocab().skills().iter().map(|s| format!("{s}-v2")).collect();
        let renamed = Arc::new(SkillVocabulary::build(renamed.iter().map(String::as_str)));
        assert_eq!(renamed.len(), weights.num_skills);
        assert!(SequenceModel::from_weights(renamed, &weights).is_err());
    }

    #[test]
    fn training_reports_split_and_restores_best_epoch() {
        let mut model = SequenceModel::new(vocab(), 8).unwrap();
        let sequences: Vec<Vec<Interaction>> =
            (0..5).map(|i| learner(&format!("u{i}"), 12)).collect();
        let config = KnowledgeTracingConfig {
            hidden_size: 8,
            epochs: 4,
            patience: 2,
            sequence_learning_rate: 0.01,
            ..Default::default()
        };

        let report = model.train(&sequences, &config).unwrap();
        assert_eq!(report.train_learners, 4);
        assert_eq!(report.val_learners, 1);
        assert!(report.epochs_run >= 1 && report.epochs_run <= 4);
        assert_eq!(report.val_losses.len(), report.epochs_run);
        assert!(report.best_epoch < report.epochs_run);
        assert!(report.val_accuracy.is_some());

        // After restoring, validation loss equals the best recorded one.
        let restored = model.mean_loss(&sequences[4..]).unwrap().unwrap();
        let best = report.val_losses[report.best_epoch];
        assert!((restored - best).abs() < 1e-5, "{restored} vs {best}");
    }
}
