//! Thompson-sampling item selector.
//!
//! Each item keeps a Beta(α, β) posterior over "answered correctly",
//! starting from the uniform prior (1, 1). A selection blends the item's
//! Fisher information at θ (exploit) with a posterior sample (explore).

use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::adaptive::irt::{self, ItemParameters};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetaStats {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaStats {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl BetaStats {
    pub fn record(&mut self, is_correct: bool) {
        if is_correct {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }

    pub fn expected_value(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Variance of the Beta distribution.
    pub fn uncertainty(&self) -> f64 {
        let total = self.alpha + self.beta;
        (self.alpha * self.beta) / (total * total * (total + 1.0))
    }

    /// One posterior draw; falls back to the mean if the parameters are degenerate.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match Beta::new(self.alpha, self.beta) {
            Ok(distribution) => distribution.sample(rng),
            Err(_) => self.expected_value(),
        }
    }
}

/// An arm offered to the selector.
#[derive(Debug, Clone, Copy)]
pub struct Arm<'a> {
    pub item_id: &'a str,
    pub parameters: ItemParameters,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BanditChoice {
    /// Position of the chosen arm in the input slice.
    pub index: usize,
    pub exploit: f64,
    pub explore: f64,
    pub combined: f64,
}

/// combined = (1 − w)·information + w·sample, argmax wins; earlier arms win ties.
/// Arms without statistics use the (1, 1) prior. Empty input selects nothing.
pub fn select<R: Rng + ?Sized>(
    theta: f64,
    arms: &[Arm<'_>],
    stats: &HashMap<String, BetaStats>,
    explore_weight: f64,
    rng: &mut R,
) -> Option<BanditChoice> {
    let weight = explore_weight.clamp(0.0, 1.0);
    let mut best: Option<BanditChoice> = None;

    for (index, arm) in arms.iter().enumerate() {
        let p = arm.parameters;
        let exploit = irt::information(theta, p.b, p.a, p.c);
        let explore = stats
            .get(arm.item_id)
            .copied()
            .unwrap_or_default()
            .sample(rng);
        let combined = (1.0 - weight) * exploit + weight * explore;

        if best.map_or(true, |b| combined > b.combined) {
            best = Some(BanditChoice {
                index,
                exploit,
                explore,
                combined,
            });
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn arm(id: &str, b: f64) -> Arm<'_> {
        Arm {
            item_id: id,
            parameters: ItemParameters { a: 1.0, b, c: 0.2 },
        }
    }

    #[test]
    fn fresh_stats_count_outcomes_exactly() {
        let mut stats = BetaStats::default();
        stats.record(true);
        stats.record(true);
        stats.record(false);
        assert_eq!(stats, BetaStats { alpha: 3.0, beta: 2.0 });
        assert_eq!(stats.expected_value(), 0.6);
        assert!((stats.uncertainty() - 6.0 / (25.0 * 6.0)).abs() < 1e-12);
    }

    #[test]
    fn empty_candidates_select_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(select(0.0, &[], &HashMap::new(), 0.3, &mut rng).is_none());
    }

    #[test]
    fn single_candidate_is_returned() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let arms = [arm("only", 2.5)];
        assert_eq!(select(0.0, &arms, &HashMap::new(), 0.3, &mut rng).unwrap().index, 0);
    }

    #[test]
    fn pure_exploit_picks_best_matched_difficulty() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let arms = [arm("hard", 2.5), arm("matched", 0.1), arm("easy", -2.0)];
        for _ in 0..20 {
            let choice = select(0.0, &arms, &HashMap::new(), 0.0, &mut rng).unwrap();
            assert_eq!(choice.index, 1);
            assert_eq!(choice.combined, choice.exploit);
        }
    }

    #[test]
    fn pure_explore_follows_posterior() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let arms = [arm("cold", 0.0), arm("hot", 0.0)];
        let stats: HashMap<String, BetaStats> = [
            ("cold".to_string(), BetaStats { alpha: 1.0, beta: 60.0 }),
            ("hot".to_string(), BetaStats { alpha: 60.0, beta: 1.0 }),
        ]
        .into_iter()
        .collect();

        let hot = (0..200)
            .filter(|_| select(0.0, &arms, &stats, 1.0, &mut rng).unwrap().index == 1)
            .count();
        assert!(hot > 190, "hot chosen {hot}/200");
    }

    #[test]
    fn same_seed_gives_same_choice() {
        let arms = [arm("a", 0.0), arm("b", 0.2), arm("c", -0.2)];
        let run = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..10)
                .map(|_| select(0.0, &arms, &HashMap::new(), 0.5, &mut rng).unwrap().index)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }
}
