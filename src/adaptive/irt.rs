//! Three-parameter logistic (3PL) item response model.
//!
//! Ability θ and item difficulty b share one standard-normal-like scale.
//! Items store difficulty denormalised on the elo scale, θ = (elo − 1500) / 100.
//!
//! The ability update is an exponential moving estimate driven by the
//! residual between observed and predicted correctness. It is not a
//! Bayesian posterior under 3PL and is kept that way on purpose.

use serde::{Deserialize, Serialize};

use crate::adaptive::config::{CalibrationConfig, ScoringConfig};
use crate::constants::{ELO_CENTER, ELO_PER_THETA};

/// Exponent magnitude beyond which `exp` is treated as saturated.
const EXPONENT_LIMIT: f64 = 700.0;

/// Probability clamp inside the log-likelihood.
const LIKELIHOOD_EPS: f64 = 1e-10;

/// Armijo sufficient-decrease constant for the calibration line search.
const ARMIJO_C: f64 = 1e-4;

const MIN_STEP: f64 = 1e-12;

pub fn elo_to_theta(elo: f64) -> f64 {
    (elo - ELO_CENTER) / ELO_PER_THETA
}

pub fn theta_to_elo(theta: f64) -> f64 {
    ELO_CENTER + ELO_PER_THETA * theta
}

/// P(correct | θ) = c + (1 − c) / (1 + exp(−a(θ − b))).
///
/// Returns exactly `c` or `1.0` once the exponent saturates.
pub fn probability(theta: f64, b: f64, a: f64, c: f64) -> f64 {
    let exponent = -a * (theta - b);
    if exponent > EXPONENT_LIMIT {
        return c;
    }
    if exponent < -EXPONENT_LIMIT {
        return 1.0;
    }
    c + (1.0 - c) / (1.0 + exponent.exp())
}

/// θ' = clamp(θ + η·(obs − P), θ_min, θ_max)
pub fn update_theta(
    theta: f64,
    b: f64,
    a: f64,
    c: f64,
    is_correct: bool,
    config: &ScoringConfig,
) -> f64 {
    let expected = probability(theta, b, a, c);
    let observed = if is_correct { 1.0 } else { 0.0 };
    let next = theta + config.learning_rate * (observed - expected);
    next.clamp(config.theta_min, config.theta_max)
}

/// Fisher information of a 3PL item at θ. Zero where P ≤ c or P ≥ 1.
pub fn information(theta: f64, b: f64, a: f64, c: f64) -> f64 {
    let p = probability(theta, b, a, c);
    if p <= c || p >= 1.0 {
        return 0.0;
    }
    let numerator = a * a * (p - c).powi(2) * (1.0 - p);
    let denominator = (1.0 - c).powi(2) * p;
    numerator / denominator
}

/// Linear projection of θ onto the external score scale, rounded and clamped.
pub fn score_for(theta: f64, config: &ScoringConfig) -> i32 {
    let raw = config.score_base + config.score_per_theta * theta;
    let clamped = raw.clamp(config.score_min as f64, config.score_max as f64);
    clamped.round() as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemParameters {
    /// Discrimination.
    pub a: f64,
    /// Difficulty on the θ scale.
    pub b: f64,
    /// Guessing.
    pub c: f64,
}

impl Default for ItemParameters {
    fn default() -> Self {
        Self {
            a: crate::constants::DEFAULT_DISCRIMINATION,
            b: 0.0,
            c: crate::constants::DEFAULT_GUESSING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResponse {
    pub theta: f64,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResult {
    pub parameters: ItemParameters,
    pub converged: bool,
    pub iterations: usize,
    pub responses: usize,
    /// Negative log-likelihood at the returned parameters; `None` when no fit was attempted.
    pub neg_log_likelihood: Option<f64>,
}

struct Bounds {
    lower: [f64; 3],
    upper: [f64; 3],
}

impl Bounds {
    fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            lower: [config.a_min, config.b_min, config.c_min],
            upper: [config.a_max, config.b_max, config.c_max],
        }
    }

    fn project(&self, x: [f64; 3]) -> [f64; 3] {
        let mut out = x;
        for i in 0..3 {
            out[i] = x[i].clamp(self.lower[i], self.upper[i]);
        }
        out
    }
}

/// Negative log-likelihood of `responses` under (a, b, c) and its gradient.
fn neg_log_likelihood(x: [f64; 3], responses: &[CalibrationResponse]) -> (f64, [f64; 3]) {
    let [a, b, c] = x;
    let mut value = 0.0;
    let mut grad = [0.0; 3];

    for r in responses {
        let y = if r.is_correct { 1.0 } else { 0.0 };
        let exponent = (-a * (r.theta - b)).clamp(-EXPONENT_LIMIT, EXPONENT_LIMIT);
        let s = 1.0 / (1.0 + exponent.exp());
        let p = c + (1.0 - c) * s;
        let pc = p.clamp(LIKELIHOOD_EPS, 1.0 - LIKELIHOOD_EPS);
        value -= y * pc.ln() + (1.0 - y) * (1.0 - pc).ln();

        // The clamp is flat outside the open interval, so its derivative vanishes there.
        if p > LIKELIHOOD_EPS && p < 1.0 - LIKELIHOOD_EPS {
            let d_p = -(y / pc - (1.0 - y) / (1.0 - pc));
            let ds = s * (1.0 - s);
            grad[0] += d_p * (1.0 - c) * ds * (r.theta - b);
            grad[1] -= d_p * (1.0 - c) * ds * a;
            grad[2] += d_p * (1.0 - s);
        }
    }

    (value, grad)
}

/// Maximum-likelihood fit of (a, b, c) over the configured parameter box.
///
/// Projected gradient descent with Barzilai-Borwein step lengths and an
/// Armijo backtracking line search. With fewer than `min_responses`
/// observations the initial guess is echoed back with `converged = false`.
pub fn calibrate(
    responses: &[CalibrationResponse],
    initial: ItemParameters,
    config: &CalibrationConfig,
) -> CalibrationResult {
    if responses.len() < config.min_responses {
        return CalibrationResult {
            parameters: initial,
            converged: false,
            iterations: 0,
            responses: responses.len(),
            neg_log_likelihood: None,
        };
    }

    let bounds = Bounds::from_config(config);
    let mut x = bounds.project([initial.a, initial.b, initial.c]);
    let (mut f, mut g) = neg_log_likelihood(x, responses);
    let mut step = 1.0;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        let trial = bounds.project([x[0] - g[0], x[1] - g[1], x[2] - g[2]]);
        let projected_gradient = (0..3).map(|i| (x[i] - trial[i]).abs()).fold(0.0, f64::max);
        if projected_gradient < config.tolerance {
            converged = true;
            break;
        }

        let (next, f_next, g_next) = loop {
            let candidate = bounds.project([
                x[0] - step * g[0],
                x[1] - step * g[1],
                x[2] - step * g[2],
            ]);
            let (f_candidate, g_candidate) = neg_log_likelihood(candidate, responses);
            let decrease: f64 = (0..3).map(|i| g[i] * (x[i] - candidate[i])).sum();
            if f_candidate <= f - ARMIJO_C * decrease {
                break Some((candidate, f_candidate, g_candidate));
            }
            step *= 0.5;
            if step < MIN_STEP {
                break None;
            }
        }
        .map_or((x, f, g), |found| found);

        iterations += 1;
        if next == x {
            // Line search stalled at a boundary optimum.
            converged = projected_gradient < config.tolerance.sqrt();
            break;
        }

        let s: [f64; 3] = [next[0] - x[0], next[1] - x[1], next[2] - x[2]];
        let y: [f64; 3] = [g_next[0] - g[0], g_next[1] - g[1], g_next[2] - g[2]];
        let sy: f64 = (0..3).map(|i| s[i] * y[i]).sum();
        let ss: f64 = s.iter().map(|v| v * v).sum();

        let relative_change = (f - f_next).abs() / f.abs().max(1.0);
        x = next;
        f = f_next;
        g = g_next;

        if relative_change <= 1e-12 && projected_gradient < config.tolerance.sqrt() {
            converged = true;
            break;
        }

        step = if sy > 1e-12 { (ss / sy).clamp(1e-6, 1e3) } else { 1.0 };
    }

    CalibrationResult {
        parameters: ItemParameters {
            a: x[0],
            b: x[1],
            c: x[2],
        },
        converged,
        iterations,
        responses: responses.len(),
        neg_log_likelihood: Some(f),
    }
}
