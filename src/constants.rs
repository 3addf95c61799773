/// CAS（Compare-And-Swap）操作最大重试次数
pub const MAX_CAS_RETRIES: u32 = 20;

/// Milliseconds per day, used for elapsed-time conversions in the forgetting curve.
pub const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Elo value that maps to θ = 0.
pub const ELO_CENTER: f64 = 1500.0;

/// Elo points per unit of θ.
pub const ELO_PER_THETA: f64 = 100.0;

/// Lower bound of the ability scale.
pub const THETA_MIN: f64 = -3.0;

/// Upper bound of the ability scale.
pub const THETA_MAX: f64 = 3.0;

/// Default discrimination for items that were never calibrated.
pub const DEFAULT_DISCRIMINATION: f64 = 1.0;

/// Default guessing parameter (five-way multiple choice).
pub const DEFAULT_GUESSING: f64 = 0.2;

/// Model name under which the windowed knowledge-tracing weights are stored.
pub const WINDOWED_MODEL_NAME: &str = "windowed";

/// Model name under which the sequence knowledge-tracing weights are stored.
pub const SEQUENCE_MODEL_NAME: &str = "sequence";
