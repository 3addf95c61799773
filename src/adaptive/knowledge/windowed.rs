//! Windowed logistic knowledge tracer.
//!
//! Per skill, the last `window_size` interactions touching that skill are
//! turned into four features per row:
//! - recency: (i + 1) / rows
//! - running correct rate up to row i
//! - streak, signed (correct positive), divided by the window and clipped to ±1
//! - attempts on the skill / attempt_saturation, capped at 1
//!
//! The zero-padded window is averaged and fed through a per-skill linear
//! model and a numerically stable sigmoid. Weights start at zero, so an
//! untrained model answers the neutral prior everywhere.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::adaptive::config::KnowledgeTracingConfig;
use crate::adaptive::error::EngineError;
use crate::adaptive::knowledge::{KnowledgeTracer, TracerKind};
use crate::adaptive::skills::SkillVocabulary;
use crate::store::operations::interactions::Interaction;

pub const NUM_FEATURES: usize = 4;

const BCE_EPS: f64 = 1e-7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillWeights {
    pub weights: [f64; NUM_FEATURES],
    pub bias: f64,
}

impl SkillWeights {
    fn logit(&self, features: &[f64; NUM_FEATURES]) -> f64 {
        self.weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias
    }
}

/// Persisted weights, keyed by skill name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowedWeights {
    pub skills: BTreeMap<String, SkillWeights>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowedTrainingSummary {
    pub total_loss: f64,
    pub num_updates: u64,
    pub avg_loss: f64,
}

pub fn stable_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Zero-padded `window_size × 4` feature window for `skill`. Empty when the
/// skill never appears.
pub fn feature_window(
    history: &[Interaction],
    skill: &str,
    window_size: usize,
    attempt_saturation: f64,
) -> Vec<[f64; NUM_FEATURES]> {
    let relevant: Vec<&Interaction> = history
        .iter()
        .filter(|i| i.skills.iter().any(|s| s == skill))
        .collect();
    if relevant.is_empty() {
        return Vec::new();
    }

    let mut rows = vec![[0.0; NUM_FEATURES]; window_size];
    let start = relevant.len().saturating_sub(window_size);
    let window = &relevant[start..];
    let attempts = (relevant.len() as f64 / attempt_saturation).min(1.0);

    let mut running_correct = 0u32;
    let mut streak: i64 = 0;
    for (i, interaction) in window.iter().enumerate() {
        if interaction.is_correct {
            running_correct += 1;
            streak = if streak > 0 { streak + 1 } else { 1 };
        } else {
            streak = if streak < 0 { streak - 1 } else { -1 };
        }
        rows[i] = [
            (i + 1) as f64 / window.len() as f64,
            f64::from(running_correct) / (i + 1) as f64,
            (streak as f64 / window_size as f64).clamp(-1.0, 1.0),
            attempts,
        ];
    }
    rows
}

fn mean_features(rows: &[[f64; NUM_FEATURES]]) -> [f64; NUM_FEATURES] {
    let mut mean = [0.0; NUM_FEATURES];
    if rows.is_empty() {
        return mean;
    }
    for row in rows {
        for (m, x) in mean.iter_mut().zip(row.iter()) {
            *m += x;
        }
    }
    let n = rows.len() as f64;
    mean.iter_mut().for_each(|m| *m /= n);
    mean
}

#[derive(Debug, Clone)]
pub struct WindowedModel {
    vocabulary: Arc<SkillVocabulary>,
    weights: HashMap<String, SkillWeights>,
    window_size: usize,
    learning_rate: f64,
    neutral_prior: f64,
    attempt_saturation: f64,
}

impl WindowedModel {
    /// Zero weights for every vocabulary skill.
    pub fn new(vocabulary: Arc<SkillVocabulary>, config: &KnowledgeTracingConfig) -> Self {
        let weights = vocabulary
            .skills()
            .iter()
            .map(|skill| (skill.clone(), SkillWeights::default()))
            .collect();
        Self {
            vocabulary,
            weights,
            window_size: config.window_size,
            learning_rate: config.windowed_learning_rate,
            neutral_prior: config.neutral_prior,
            attempt_saturation: config.attempt_saturation,
        }
    }

    /// Loads persisted weights; skills unknown to the vocabulary are dropped,
    /// vocabulary skills without saved weights start at zero.
    pub fn with_weights(
        vocabulary: Arc<SkillVocabulary>,
        config: &KnowledgeTracingConfig,
        saved: &WindowedWeights,
    ) -> Self {
        let mut model = Self::new(vocabulary, config);
        for (skill, weights) in &saved.skills {
            if let Some(slot) = model.weights.get_mut(skill) {
                *slot = *weights;
            }
        }
        model
    }

    pub fn export_weights(&self) -> WindowedWeights {
        WindowedWeights {
            skills: self
                .weights
                .iter()
                .map(|(skill, w)| (skill.clone(), *w))
                .collect(),
        }
    }

    pub fn vocabulary(&self) -> &Arc<SkillVocabulary> {
        &self.vocabulary
    }

    fn skill_probability(&self, history: &[Interaction], skill: &str) -> f64 {
        let Some(weights) = self.weights.get(skill) else {
            return self.neutral_prior;
        };
        let rows = feature_window(history, skill, self.window_size, self.attempt_saturation);
        if rows.is_empty() {
            return self.neutral_prior;
        }
        stable_sigmoid(weights.logit(&mean_features(&rows)))
    }

    pub fn predict(&self, history: &[Interaction]) -> HashMap<String, f64> {
        self.vocabulary
            .skills()
            .iter()
            .map(|skill| (skill.clone(), self.skill_probability(history, skill)))
            .collect()
    }

    /// Online SGD with binary cross-entropy: for every interaction after the
    /// first, one step per tagged skill using the preceding history as input.
    pub fn train(&mut self, sequences: &[Vec<Interaction>], epochs: usize) -> WindowedTrainingSummary {
        let mut total_loss = 0.0;
        let mut num_updates = 0u64;

        for _ in 0..epochs {
            for sequence in sequences {
                for t in 1..sequence.len() {
                    let current = &sequence[t];
                    let history = &sequence[..t];
                    let target = if current.is_correct { 1.0 } else { 0.0 };

                    for skill in &current.skills {
                        let Some(weights) = self.weights.get(skill).copied() else {
                            continue;
                        };
                        let rows =
                            feature_window(history, skill, self.window_size, self.attempt_saturation);
                        let features = if rows.is_empty() {
                            [0.0; NUM_FEATURES]
                        } else {
                            mean_features(&rows)
                        };

                        let pred = stable_sigmoid(weights.logit(&features));
                        total_loss -= target * (pred + BCE_EPS).ln()
                            + (1.0 - target) * (1.0 - pred + BCE_EPS).ln();
                        num_updates += 1;

                        let grad = pred - target;
                        let mut next = weights;
                        for (w, x) in next.weights.iter_mut().zip(features.iter()) {
                            *w -= self.learning_rate * grad * x;
                        }
                        next.bias -= self.learning_rate * grad;
                        self.weights.insert(skill.clone(), next);
                    }
                }
            }
        }

        WindowedTrainingSummary {
            total_loss,
            num_updates,
            avg_loss: total_loss / num_updates.max(1) as f64,
        }
    }
}

impl KnowledgeTracer for WindowedModel {
    fn kind(&self) -> TracerKind {
        TracerKind::Windowed
    }

    fn predict_mastery(&self, history: &[Interaction]) -> Result<HashMap<String, f64>, EngineError> {
        Ok(self.predict(history))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn interaction(skills: &[&str], correct: bool) -> Interaction {
        Interaction {
            id: uuid::Uuid::new_v4().to_string(),
            learner_id: "u1".to_string(),
            item_id: "q".to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            is_correct: correct,
            theta_at_time: 0.0,
            created_at: Utc::now(),
        }
    }

    fn model() -> WindowedModel {
        let vocab = Arc::new(SkillVocabulary::build(["assumption", "inference"]));
        WindowedModel::new(vocab, &KnowledgeTracingConfig::default())
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(stable_sigmoid(0.0), 0.5);
        assert!(stable_sigmoid(-800.0) >= 0.0);
        assert!(stable_sigmoid(800.0) <= 1.0);
        assert!(!stable_sigmoid(-800.0).is_nan());
    }

    #[test]
    fn skills_without_history_get_neutral_prior() {
        let mastery = model().predict(&[interaction(&["assumption"], true)]);
        assert_eq!(mastery["inference"], 0.5);
    }

    #[test]
    fn features_follow_window_rules() {
        let history = vec![
            interaction(&["a"], true),
            interaction(&["b"], false),
            interaction(&["a"], true),
            interaction(&["a"], false),
        ];
        let rows = feature_window(&history, "a", 20, 50.0);
        assert_eq!(rows.len(), 20);
        assert_eq!(rows[0], [1.0 / 3.0, 1.0, 1.0 / 20.0, 3.0 / 50.0]);
        assert_eq!(rows[1], [2.0 / 3.0, 1.0, 2.0 / 20.0, 3.0 / 50.0]);
        assert_eq!(rows[2], [1.0, 2.0 / 3.0, -1.0 / 20.0, 3.0 / 50.0]);
        assert_eq!(rows[3], [0.0; NUM_FEATURES]);
    }

    #[test]
    fn window_keeps_only_latest_rows() {
        let history: Vec<Interaction> = (0..30).map(|i| interaction(&["a"], i >= 10)).collect();
        let rows = feature_window(&history, "a", 20, 50.0);
        // Only the last 20 (all correct) remain in the window.
        assert_eq!(rows[19][1], 1.0);
        assert_eq!(rows[19][2], 1.0);
        assert_eq!(rows[19][3], 30.0 / 50.0);
    }

    #[test]
    fn training_reports_one_update_per_skill_step() {
        let mut m = model();
        let seq = vec![
            interaction(&["assumption"], true),
            interaction(&["assumption", "inference"], true),
            interaction(&["inference", "unknown"], false),
        ];
        let summary = m.train(&[seq], 1);
        assert_eq!(summary.num_updates, 3);
        assert!(summary.total_loss > 0.0);
        assert!((summary.avg_loss - summary.total_loss / 3.0).abs() < 1e-12);
    }

    #[test]
    fn training_on_consistent_success_raises_mastery() {
        let mut m = model();
        let seq: Vec<Interaction> = (0..15).map(|_| interaction(&["assumption"], true)).collect();
        let before = m.predict(&seq)["assumption"];
        m.train(&[seq.clone()], 5);
        let after = m.predict(&seq)["assumption"];
        assert_eq!(before, 0.5);
        assert!(after > 0.5);
    }

    #[test]
    fn exported_weights_restore_predictions() {
        let mut m = model();
        let seq: Vec<Interaction> = (0..6).map(|i| interaction(&["inference"], i % 3 != 0)).collect();
        m.train(&[seq.clone()], 2);

        let restored =
            WindowedModel::with_weights(m.vocabulary().clone(), &KnowledgeTracingConfig::default(), &m.export_weights());
        assert_eq!(restored.predict(&seq), m.predict(&seq));
    }
}
