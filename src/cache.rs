use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::discovery::{AggregationOutcome, Outcome};

/// Per-target cache of fetched info and secrets.
///
/// A stored value stays until it is explicitly invalidated; `put` never replaces it.
#[derive(Debug)]
pub struct ResultCache<I, S = String> {
    info: RwLock<HashMap<String, I>>,
    secrets: RwLock<HashMap<String, S>>,
}

impl<I, S> Default for ResultCache<I, S> {
    fn default() -> Self {
        Self {
            info: RwLock::new(HashMap::new()),
            secrets: RwLock::new(HashMap::new()),
        }
    }
}

impl<I: Clone, S: Clone> ResultCache<I, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &str) -> Option<I> {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(target)
    }

    /// Stores `value` unless the target already has an entry. Returns whether it was stored.
    pub fn put(&self, target: &str, value: I) -> bool {
        let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
        if info.contains_key(target) {
            return false;
        }
        info.insert(target.to_string(), value);
        true
    }

    pub fn invalidate(&self, target: &str) {
        self.info
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
    }

    pub fn get_secret(&self, target: &str) -> Option<S> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    pub fn put_secret(&self, target: &str, secret: S) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.to_string(), secret);
    }

    /// Drops both the info and the secret for one target.
    pub fn invalidate_target(&self, target: &str) {
        self.invalidate(target);
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
    }

    pub fn invalidate_all(&self) {
        self.info
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Caches every successful result of a round. Errors and timeouts are not cached.
    pub fn merge(&self, outcome: &AggregationOutcome<I>) -> usize {
        self.merge_where(outcome, |_| true)
    }

    /// Like `merge`, restricted to the targets `keep` accepts.
    pub fn merge_where(&self, outcome: &AggregationOutcome<I>, keep: impl Fn(&str) -> bool) -> usize {
        outcome
            .results
            .iter()
            .filter(|r| keep(&r.target))
            .filter_map(|r| match &r.outcome {
                Outcome::Success(info) => Some((r.target.as_str(), info)),
                _ => None,
            })
            .filter(|(target, info)| self.put(target, (*info).clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ConnectionResult;
    use std::collections::BTreeSet;

    #[test]
    fn put_is_write_once_until_invalidated() {
        let cache: ResultCache<u32> = ResultCache::new();
        assert!(cache.put("a", 1));
        assert!(!cache.put("a", 2));
        assert_eq!(cache.get("a"), Some(1));

        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
        assert!(cache.put("a", 3));
        assert_eq!(cache.get("a"), Some(3));
    }

    #[test]
    fn invalidate_target_drops_secret_too() {
        let cache: ResultCache<u32> = ResultCache::new();
        cache.put("a", 1);
        cache.put_secret("a", "hunter2".to_string());
        cache.put_secret("b", "other".to_string());

        cache.invalidate_target("a");
        assert!(!cache.contains("a"));
        assert_eq!(cache.get_secret("a"), None);
        assert_eq!(cache.get_secret("b").as_deref(), Some("other"));

        cache.invalidate_all();
        assert!(cache.is_empty());
        assert_eq!(cache.get_secret("b"), None);
    }

    #[test]
    fn merge_only_caches_successes() {
        let cache: ResultCache<String> = ResultCache::new();
        cache.put("kept", "old".to_string());
        let outcome = AggregationOutcome {
            results: vec![
                ConnectionResult {
                    target: "err".to_string(),
                    outcome: Outcome::Error("nope".to_string()),
                },
                ConnectionResult {
                    target: "kept".to_string(),
                    outcome: Outcome::Success("new".to_string()),
                },
                ConnectionResult {
                    target: "ok".to_string(),
                    outcome: Outcome::Success("fresh".to_string()),
                },
                ConnectionResult {
                    target: "slow".to_string(),
                    outcome: Outcome::Timeout,
                },
            ],
            timed_out: BTreeSet::from(["slow".to_string()]),
        };

        assert_eq!(cache.merge(&outcome), 1);
        assert_eq!(cache.get("kept").as_deref(), Some("old"));
        assert_eq!(cache.get("ok").as_deref(), Some("fresh"));
        assert!(!cache.contains("err"));
        assert!(!cache.contains("slow"));
    }

    #[test]
    fn merge_where_skips_rejected_targets() {
        let cache: ResultCache<String> = ResultCache::new();
        let outcome = AggregationOutcome {
            results: vec![
                ConnectionResult {
                    target: "a".to_string(),
                    outcome: Outcome::Success("stale".to_string()),
                },
                ConnectionResult {
                    target: "b".to_string(),
                    outcome: Outcome::Success("b1".to_string()),
                },
            ],
            timed_out: BTreeSet::new(),
        };
        assert_eq!(cache.merge_where(&outcome, |t| t != "a"), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b").as_deref(), Some("b1"));
    }
}
