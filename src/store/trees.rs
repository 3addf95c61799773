pub const ITEMS: &str = "items";
pub const ITEM_CALIBRATIONS: &str = "item_calibrations";
pub const INTERACTIONS: &str = "interactions";
pub const ABILITIES: &str = "abilities";
pub const BANDIT_STATS: &str = "bandit_stats";
pub const REVIEW_STATS: &str = "review_stats";
pub const SKILL_VOCABULARY: &str = "skill_vocabulary";
pub const MODEL_WEIGHTS: &str = "model_weights";
pub const META: &str = "meta";

// Secondary index trees
pub const ITEMS_BY_ELO: &str = "items_by_elo";
pub const INTERACTIONS_BY_ITEM: &str = "interactions_by_item";
pub const INTERACTION_COUNTS: &str = "interaction_counts";
