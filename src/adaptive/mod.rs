//! Adaptive assessment: ability scoring, item selection and learner modelling.

pub mod bandit;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod irt;
pub mod knowledge;
pub mod memory;
pub mod offline;
pub mod recommender;
pub mod skills;
pub mod source;
pub mod types;
pub mod weak_skills;

pub use config::EngineConfig;
pub use engine::AdaptiveEngine;
pub use error::EngineError;
pub use knowledge::{MasteryEstimate, TracerKind};
pub use source::{ContentStore, InteractionLog, SelectionStats};
pub use types::{ItemSnapshot, NextItem, OutcomeReceipt, SelectionSource};
