//! Trials and the ordered trial set of an experiment

use crate::ids::{ImplementationRef, TrialKey};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One registered candidate implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    key: TrialKey,
    is_default: bool,
    implementation: ImplementationRef,
}

impl Trial {
    /// Create trial
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<TrialKey>, implementation: impl Into<ImplementationRef>, is_default: bool) -> Self {
        Self {
            key: key.into(),
            is_default,
            implementation: implementation.into(),
        }
    }

    /// Trial key
    #[inline]
    #[must_use]
    pub fn key(&self) -> &TrialKey {
        &self.key
    }

    /// Whether this is the control trial
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Label handed to the implementation resolver
    #[inline]
    #[must_use]
    pub fn implementation(&self) -> &ImplementationRef {
        &self.implementation
    }
}

/// Validated, ordered set of trials
///
/// Insertion order is registration order and drives "try any" fallback.
/// Only [`crate::DefinitionBuilder`] constructs one, so the invariants
/// (non-empty, unique keys, exactly one default) always hold.
#[derive(Debug, Clone)]
pub struct TrialSet {
    trials: IndexMap<TrialKey, Trial>,
    default_index: usize,
}

impl TrialSet {
    pub(crate) fn from_validated(trials: IndexMap<TrialKey, Trial>, default_index: usize) -> Self {
        debug_assert!(trials.get_index(default_index).is_some_and(|(_, t)| t.is_default()));
        Self {
            trials,
            default_index,
        }
    }

    /// Look up trial by key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Trial> {
        self.trials.get(key)
    }

    /// Whether key is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.trials.contains_key(key)
    }

    /// The control trial
    #[inline]
    #[must_use]
    pub fn default_trial(&self) -> &Trial {
        &self.trials[self.default_index]
    }

    /// Key of the control trial
    #[inline]
    #[must_use]
    pub fn default_key(&self) -> &TrialKey {
        self.default_trial().key()
    }

    /// All keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &TrialKey> {
        self.trials.keys()
    }

    /// Non-default keys in registration order
    pub fn non_default_keys(&self) -> impl Iterator<Item = &TrialKey> {
        self.trials
            .values()
            .filter(|t| !t.is_default())
            .map(Trial::key)
    }

    /// All trials in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.trials.values()
    }

    /// Number of trials (never zero)
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Always false; kept for API symmetry with collections
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set() -> TrialSet {
        let mut trials = IndexMap::new();
        for (key, default) in [("b", false), ("a", true), ("c", false)] {
            trials.insert(TrialKey::new(key), Trial::new(key, format!("impl-{key}"), default));
        }
        TrialSet::from_validated(trials, 1)
    }

    #[test]
    fn keeps_registration_order() {
        let set = set();
        let keys: Vec<&str> = set.keys().map(TrialKey::as_str).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn default_and_non_default() {
        let set = set();
        assert_eq!(set.default_key().as_str(), "a");
        let others: Vec<&str> = set.non_default_keys().map(TrialKey::as_str).collect();
        assert_eq!(others, vec!["b", "c"]);
    }

    #[test]
    fn lookup() {
        let set = set();
        assert!(set.contains("c"));
        assert!(!set.contains("z"));
        assert_eq!(set.get("b").unwrap().implementation().as_str(), "impl-b");
        assert_eq!(set.len(), 3);
    }
}
