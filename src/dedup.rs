use crate::normalizer::extract_place_id;
use serde_json::Value;
use std::collections::HashSet;

/// Keeps the first occurrence of every key, in encounter order.
///
/// Items for which `key` returns `None` are never treated as duplicates.
pub fn dedupe_by<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> Option<String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| match key(item) {
            Some(id) => seen.insert(id),
            None => true,
        })
        .collect()
}

/// Drops raw provider records whose place id was already seen.
pub fn dedupe_raw_results(raw_results: Vec<Value>) -> Vec<Value> {
    let before = raw_results.len();
    let deduped = dedupe_by(raw_results, extract_place_id);
    if deduped.len() < before {
        tracing::debug!(
            "Removed {} duplicate place(s) from {} raw results",
            before - deduped.len(),
            before
        );
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_occurrence_wins() {
        let raw = vec![
            json!({ "placeId": "X", "title": "First" }),
            json!({ "placeId": "Y", "title": "Other" }),
            json!({ "place_id": "X", "title": "Second" }),
        ];
        let deduped = dedupe_raw_results(raw);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0]["title"], "First");
        assert_eq!(deduped[1]["title"], "Other");
    }

    #[test]
    fn test_results_without_id_always_pass() {
        let raw = vec![
            json!({ "title": "No id" }),
            json!({ "title": "No id" }),
            json!({ "placeId": "" }),
        ];
        assert_eq!(dedupe_raw_results(raw).len(), 3);
    }

    #[test]
    fn test_generic_keys() {
        let items = vec![("a", 1), ("b", 2), ("a", 3)];
        let deduped = dedupe_by(items, |(k, _)| Some(k.to_string()));
        assert_eq!(deduped, vec![("a", 1), ("b", 2)]);
    }
}
