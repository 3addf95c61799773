//! Error-rate ranking of skills over a learner's log.

use std::collections::HashMap;

use crate::store::operations::interactions::Interaction;

#[derive(Debug, Clone, PartialEq)]
pub struct SkillErrorRate {
    pub skill: String,
    pub error_rate: f64,
    pub attempts: u32,
}

/// Error rate per skill in first-seen order.
pub fn skill_error_rates(history: &[Interaction]) -> Vec<SkillErrorRate> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<&str, (u32, u32)> = HashMap::new();

    for interaction in history {
        for skill in &interaction.skills {
            let entry = counts.entry(skill.as_str()).or_insert_with(|| {
                order.push(skill.clone());
                (0, 0)
            });
            entry.1 += 1;
            if interaction.is_correct {
                entry.0 += 1;
            }
        }
    }

    order
        .into_iter()
        .filter_map(|skill| {
            let (correct, total) = counts.get(skill.as_str()).copied()?;
            (total > 0).then(|| SkillErrorRate {
                error_rate: 1.0 - f64::from(correct) / f64::from(total),
                attempts: total,
                skill,
            })
        })
        .collect()
}

/// The `count` skills with the highest error rate. The sort is stable, so
/// equal rates keep first-seen order.
pub fn weak_skills(history: &[Interaction], count: usize) -> Vec<String> {
    let mut rates = skill_error_rates(history);
    rates.sort_by(|a, b| b.error_rate.total_cmp(&a.error_rate));
    rates.into_iter().take(count).map(|r| r.skill).collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn attempt(skills: &[&str], correct: bool) -> Interaction {
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

    #[test]
    fn empty_log_has_no_weak_skills() {
        assert!(weak_skills(&[], 3).is_empty());
    }

    #[test]
    fn ordered_by_error_rate_descending() {
        let log = vec![
            attempt(&["assumption"], true),
            attempt(&["inference"], false),
            attempt(&["assumption", "flaw"], false),
            attempt(&["weaken"], true),
        ];
        assert_eq!(weak_skills(&log, 3), vec!["inference", "flaw", "assumption"]);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let log = vec![
            attempt(&["c"], false),
            attempt(&["a"], false),
            attempt(&["b"], false),
            attempt(&["d"], false),
        ];
        assert_eq!(weak_skills(&log, 3), vec!["c", "a", "b"]);
    }

    #[test]
    fn counts_every_tag_of_an_interaction() {
        let rates = skill_error_rates(&[attempt(&["a", "b"], true), attempt(&["a"], false)]);
        assert_eq!(rates[0].skill, "a");
        assert_eq!(rates[0].attempts, 2);
        assert_eq!(rates[0].error_rate, 0.5);
        assert_eq!(rates[1].error_rate, 0.0);
    }
}
