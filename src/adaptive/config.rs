use serde::{Deserialize, Serialize};

use crate::constants::{THETA_MAX, THETA_MIN};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringConfig {
    /// η in θ' = θ + η·(obs − P)
    pub learning_rate: f64,
    pub theta_min: f64,
    pub theta_max: f64,
    pub score_base: f64,
    pub score_per_theta: f64,
    pub score_min: i32,
    pub score_max: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.4,
            theta_min: THETA_MIN,
            theta_max: THETA_MAX,
            score_base: 30.0,
            score_per_theta: 7.0,
            score_min: 20,
            score_max: 51,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationConfig {
    pub min_responses: usize,
    pub a_min: f64,
    pub a_max: f64,
    pub b_min: f64,
    pub b_max: f64,
    pub c_min: f64,
    pub c_max: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_responses: 5,
            a_min: 0.5,
            a_max: 2.5,
            b_min: -3.0,
            b_max: 3.0,
            c_min: 0.0,
            c_max: 0.35,
            max_iterations: 500,
            tolerance: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeTracingConfig {
    /// Interactions per skill fed to the windowed model.
    pub window_size: usize,
    pub windowed_learning_rate: f64,
    /// Passes over the log per windowed training run.
    #[serde(default = "default_windowed_epochs")]
    pub windowed_epochs: usize,
    pub neutral_prior: f64,
    /// Attempt count at which the normalized-attempts feature saturates.
    pub attempt_saturation: f64,
    /// Minimum total interactions before the sequence model is preferred.
    pub sequence_threshold: u64,
    pub hidden_size: usize,
    pub epochs: usize,
    pub patience: usize,
    pub validation_fraction: f64,
    pub sequence_learning_rate: f64,
    /// Maximum |error-rate mastery − model mastery| still counted as agreement.
    pub agreement_tolerance: f64,
    #[serde(default = "default_true")]
    pub neural_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_windowed_epochs() -> usize {
    1
}

impl Default for KnowledgeTracingConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            windowed_learning_rate: 0.05,
            windowed_epochs: 1,
            neutral_prior: 0.5,
            attempt_saturation: 50.0,
            sequence_threshold: 50,
            hidden_size: 64,
            epochs: 10,
            patience: 5,
            validation_fraction: 0.2,
            sequence_learning_rate: 0.001,
            agreement_tolerance: 0.3,
            neural_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditConfig {
    pub enabled: bool,
    pub explore_weight: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            explore_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpacedRepetitionConfig {
    pub enabled: bool,
    pub cold_start_half_life_days: f64,
    pub min_half_life_days: f64,
    pub max_half_life_days: f64,
    pub correct_multiplier: f64,
    pub incorrect_multiplier: f64,
    pub review_threshold: f64,
    pub injection_probability: f64,
}

impl Default for SpacedRepetitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cold_start_half_life_days: 1.0,
            min_half_life_days: 0.25,
            max_half_life_days: 90.0,
            correct_multiplier: 2.0,
            incorrect_multiplier: 0.5,
            review_threshold: 0.5,
            injection_probability: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommenderConfig {
    pub pool_size: usize,
    pub narrow_radius: f64,
    pub wide_radius: f64,
    pub recent_exclusion: usize,
    pub weak_skill_count: usize,
    pub mastery_bonus: f64,
    pub weak_skill_bonus: f64,
    pub use_knowledge_tracing: bool,
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            narrow_radius: 200.0,
            wide_radius: 400.0,
            recent_exclusion: 10,
            weak_skill_count: 3,
            mastery_bonus: 0.5,
            weak_skill_bonus: 0.5,
            use_knowledge_tracing: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub knowledge_tracing: KnowledgeTracingConfig,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub spaced_repetition: SpacedRepetitionConfig,
    #[serde(default)]
    pub recommender: RecommenderConfig,
    /// Seed for the selection RNG; `None` seeds from entropy.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl EngineConfig {
    pub fn from_env(env_config: &crate::config::EngineEnvConfig) -> Self {
        let mut config = Self::default();
        config.random_seed = env_config.random_seed;
        config.bandit.enabled = env_config.bandit_enabled;
        config.knowledge_tracing.neural_enabled = env_config.neural_enabled;
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        let s = &self.scoring;
        if !(s.learning_rate > 0.0 && s.learning_rate <= 1.0) {
            return Err("scoring.learning_rate must be in (0,1]".to_string());
        }
        if s.theta_min >= s.theta_max {
            return Err("scoring.theta_min must be < theta_max".to_string());
        }
        if s.score_min > s.score_max {
            return Err("scoring.score_min must be <= score_max".to_string());
        }

        let c = &self.calibration;
        if c.min_responses == 0 {
            return Err("calibration.min_responses must be > 0".to_string());
        }
        if c.a_min <= 0.0 || c.a_min > c.a_max {
            return Err("calibration a bounds must satisfy 0 < a_min <= a_max".to_string());
        }
        if c.b_min > c.b_max {
            return Err("calibration.b_min must be <= b_max".to_string());
        }
        if c.c_min < 0.0 || c.c_max >= 1.0 || c.c_min > c.c_max {
            return Err("calibration c bounds must lie in [0,1)".to_string());
        }
        if c.max_iterations == 0 || c.tolerance <= 0.0 {
            return Err("calibration.max_iterations and tolerance must be > 0".to_string());
        }

        let k = &self.knowledge_tracing;
        if k.window_size == 0 {
            return Err("knowledge_tracing.window_size must be > 0".to_string());
        }
        if k.windowed_learning_rate <= 0.0 || k.sequence_learning_rate <= 0.0 {
            return Err("knowledge_tracing learning rates must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&k.neutral_prior) {
            return Err("knowledge_tracing.neutral_prior must be in [0,1]".to_string());
        }
        if k.attempt_saturation <= 0.0 {
            return Err("knowledge_tracing.attempt_saturation must be > 0".to_string());
        }
        if k.hidden_size == 0 || k.epochs == 0 || k.windowed_epochs == 0 {
            return Err("knowledge_tracing hidden_size and epochs must be > 0".to_string());
        }
        if !(k.validation_fraction > 0.0 && k.validation_fraction < 1.0) {
            return Err("knowledge_tracing.validation_fraction must be in (0,1)".to_string());
        }
        if !(0.0..=1.0).contains(&k.agreement_tolerance) {
            return Err("knowledge_tracing.agreement_tolerance must be in [0,1]".to_string());
        }

        if !(0.0..=1.0).contains(&self.bandit.explore_weight) {
            return Err("bandit.explore_weight must be in [0,1]".to_string());
        }

        let sr = &self.spaced_repetition;
        if sr.min_half_life_days <= 0.0 || sr.min_half_life_days > sr.max_half_life_days {
            return Err("spaced_repetition half-life bounds must satisfy 0 < min <= max".to_string());
        }
        if !(sr.min_half_life_days..=sr.max_half_life_days).contains(&sr.cold_start_half_life_days) {
            return Err("spaced_repetition.cold_start_half_life_days must lie within bounds".to_string());
        }
        if sr.correct_multiplier <= 0.0 || sr.incorrect_multiplier <= 0.0 {
            return Err("spaced_repetition multipliers must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&sr.review_threshold) {
            return Err("spaced_repetition.review_threshold must be in [0,1]".to_string());
        }
        if !(0.0..=1.0).contains(&sr.injection_probability) {
            return Err("spaced_repetition.injection_probability must be in [0,1]".to_string());
        }

        let r = &self.recommender;
        if r.pool_size == 0 {
            return Err("recommender.pool_size must be > 0".to_string());
        }
        if r.narrow_radius <= 0.0 || r.narrow_radius > r.wide_radius {
            return Err("recommender radii must satisfy 0 < narrow <= wide".to_string());
        }
        if r.mastery_bonus < 0.0 || r.weak_skill_bonus < 0.0 {
            return Err("recommender bonuses must be >= 0".to_string());
        }

        Ok(())
    }
}
