use std::env;
use std::str::FromStr;

use crate::logging::LogConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub log: LogConfig,
    pub sled_path: String,
    pub worker: WorkerConfig,
    pub engine: EngineEnvConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub is_leader: bool,
    pub enable_knowledge_training: bool,
    pub enable_item_calibration: bool,
}

/// Environment toggles layered over `EngineConfig::default()`.
#[derive(Debug, Clone)]
pub struct EngineEnvConfig {
    pub random_seed: Option<u64>,
    pub bandit_enabled: bool,
    pub neural_enabled: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log: LogConfig {
                log_level: env_or("RUST_LOG", "info"),
                enable_file_logs: env_or_bool("ENABLE_FILE_LOGS", false),
                log_dir: env_or("LOG_DIR", "./logs"),
            },
            sled_path: env_or("SLED_PATH", "./data/assessment.sled"),
            worker: WorkerConfig {
                is_leader: env_or_bool("WORKER_LEADER", true),
                enable_knowledge_training: env_or_bool("ENABLE_KNOWLEDGE_TRAINING", true),
                enable_item_calibration: env_or_bool("ENABLE_ITEM_CALIBRATION", true),
            },
            engine: EngineEnvConfig {
                random_seed: env_opt_parse("ENGINE_RANDOM_SEED"),
                bandit_enabled: env_or_bool("ENGINE_BANDIT_ENABLED", true),
                neural_enabled: env_or_bool("ENGINE_NEURAL_ENABLED", true),
            },
        }
    }
}

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_or_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    env_opt_parse(key).unwrap_or(default)
}

/// `None` when the variable is unset or unparseable.
pub fn env_opt_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Failed to parse env var, using default");
            None
        }
    }
}

pub fn env_or_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}
