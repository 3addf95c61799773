use crate::store::StoreError;

/// Key under which the current skill vocabulary is stored.
pub const VOCABULARY_KEY: &str = "current";

/// Key under which the global interaction counter is stored.
pub const INTERACTION_TOTAL_KEY: &str = "total";

/// Fixed-point scale for elo values in the difficulty index.
const ELO_INDEX_SCALE: f64 = 100.0;

fn segment<'a>(field: &str, value: &'a str) -> Result<&'a str, StoreError> {
    if value.is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    if value.contains(':') {
        return Err(StoreError::Validation(format!(
            "{field} must not contain ':' (got {value:?})"
        )));
    }
    Ok(value)
}

pub fn item_key(item_id: &str) -> Result<String, StoreError> {
    Ok(segment("item_id", item_id)?.to_string())
}

/// Sortable fixed-width encoding of an elo value. Negative values collapse to zero.
pub fn elo_index_component(elo: f64) -> u64 {
    if !elo.is_finite() || elo <= 0.0 {
        return 0;
    }
    (elo * ELO_INDEX_SCALE).round().min(1e15) as u64
}

pub fn item_elo_index_key(elo: f64, item_id: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{:016}:{}",
        elo_index_component(elo),
        segment("item_id", item_id)?
    ))
}

/// Inclusive `[start, end)` byte range covering every indexed elo in `[low, high]`.
pub fn item_elo_range(low: f64, high: f64) -> (String, String) {
    (
        format!("{:016}:", elo_index_component(low)),
        // ';' sorts directly after ':'
        format!("{:016};", elo_index_component(high)),
    )
}

pub fn parse_item_elo_index_key(key: &[u8]) -> Option<String> {
    let sep = key.iter().position(|b| *b == b':')?;
    let id = std::str::from_utf8(&key[sep + 1..]).ok()?;
    (!id.is_empty()).then(|| id.to_string())
}

pub fn calibration_key(item_id: &str) -> Result<String, StoreError> {
    item_key(item_id)
}

/// `{learner}:{ts_ms:020}:{seq:020}`. `seq` is a store-wide monotonic id, so
/// attempts recorded within the same millisecond keep their append order.
pub fn interaction_key(learner_id: &str, timestamp_ms: i64, seq: u64) -> Result<String, StoreError> {
    let ts = timestamp_ms.max(0) as u64;
    Ok(format!("{}:{:020}:{:020}", segment("learner_id", learner_id)?, ts, seq))
}

/// Append sequence number carried in the last segment of an interaction key.
pub fn parse_interaction_seq(key: &[u8]) -> Option<u64> {
    let sep = key.iter().rposition(|b| *b == b':')?;
    std::str::from_utf8(&key[sep + 1..]).ok()?.parse().ok()
}

pub fn interaction_prefix(learner_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}:", segment("learner_id", learner_id)?))
}

pub fn interaction_by_item_key(item_id: &str, timestamp_ms: i64, seq: u64) -> Result<String, StoreError> {
    let ts = timestamp_ms.max(0) as u64;
    Ok(format!("{}:{:020}:{:020}", segment("item_id", item_id)?, ts, seq))
}

pub fn interaction_by_item_prefix(item_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}:", segment("item_id", item_id)?))
}

pub fn ability_key(learner_id: &str) -> Result<String, StoreError> {
    Ok(segment("learner_id", learner_id)?.to_string())
}

pub fn bandit_key(item_id: &str) -> Result<String, StoreError> {
    item_key(item_id)
}

pub fn review_key(learner_id: &str, item_id: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}:{}",
        segment("learner_id", learner_id)?,
        segment("item_id", item_id)?
    ))
}

pub fn review_prefix(learner_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}:", segment("learner_id", learner_id)?))
}

pub fn model_weights_key(model: &str) -> Result<String, StoreError> {
    Ok(segment("model", model)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_separator_in_segments() {
        assert!(item_key("a:b").is_err());
        assert!(review_key("", "item").is_err());
        assert!(interaction_key("x:y", 1, 0).is_err());
    }

    #[test]
    fn elo_index_orders_numerically() {
        let low = item_elo_index_key(1299.5, "z").unwrap();
        let high = item_elo_index_key(1700.0, "a").unwrap();
        assert!(low < high);

        let (start, end) = item_elo_range(1300.0, 1700.0);
        assert!(high.as_str() >= start.as_str() && high.as_str() < end.as_str());
        assert!(low.as_str() < start.as_str());
    }

    #[test]
    fn parses_item_id_back_from_index_key() {
        let key = item_elo_index_key(1500.0, "q-17").unwrap();
        assert_eq!(parse_item_elo_index_key(key.as_bytes()).as_deref(), Some("q-17"));
    }

    #[test]
    fn interaction_keys_sort_chronologically() {
        let earlier = interaction_key("u1", 1_000, 9).unwrap();
        let later = interaction_key("u1", 2_000, 1).unwrap();
        assert!(earlier < later);
        assert!(later.starts_with(&interaction_prefix("u1").unwrap()));
    }

    #[test]
    fn same_millisecond_keys_sort_by_sequence() {
        let first = interaction_key("u1", 1_000, 9).unwrap();
        let second = interaction_key("u1", 1_000, 10).unwrap();
        assert!(first < second);
        assert_eq!(parse_interaction_seq(second.as_bytes()), Some(10));
        assert!(interaction_by_item_key("q1", 1_000, 9).unwrap() < interaction_by_item_key("q1", 1_000, 10).unwrap());
    }
}
