//! Version consistency classifier.
//!
//! The allocation store keeps one `allocation_version` per company row and
//! the commit path bumps every row of a fund together, so at rest a fund
//! has exactly one distinct version. This classifier turns the observed
//! distinct set into a verdict:
//!
//! - one distinct value, equal to expected      -> consistent
//! - one distinct value, different from expected -> a concurrent commit won
//! - more than one distinct value                -> fractured: a prior
//!   non-atomic write broke the invariant; fatal, surfaced as a conflict
//!
//! On any inconsistent verdict the caller must reject and mutate nothing.

use rsv_schemas::VersionConflict;
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionConsistency {
    pub expected_version: i64,
    pub consistent: bool,
    /// Distinct observed versions, ascending.
    pub actual_versions: Vec<i64>,
}

impl VersionConsistency {
    /// Classify the observed row versions against the caller's baseline.
    pub fn evaluate(expected_version: i64, observed: impl IntoIterator<Item = i64>) -> Self {
        let distinct: BTreeSet<i64> = observed.into_iter().collect();
        let actual_versions: Vec<i64> = distinct.into_iter().collect();
        let consistent = actual_versions.len() == 1 && actual_versions[0] == expected_version;
        Self {
            expected_version,
            consistent,
            actual_versions,
        }
    }

    /// More than one distinct version: the fund-wide single-version
    /// invariant was already broken before this call.
    pub fn is_fractured(&self) -> bool {
        self.actual_versions.len() > 1
    }

    /// Conflict payload for the rejection result.
    pub fn into_conflict(self) -> VersionConflict {
        VersionConflict {
            expected_version: self.expected_version,
            actual_versions: self.actual_versions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_matching_version_is_consistent() {
        let v = VersionConsistency::evaluate(3, vec![3, 3, 3]);
        assert!(v.consistent);
        assert!(!v.is_fractured());
        assert_eq!(v.actual_versions, vec![3]);
    }

    #[test]
    fn single_different_version_is_stale() {
        let v = VersionConsistency::evaluate(3, vec![4, 4]);
        assert!(!v.consistent);
        assert!(!v.is_fractured());
        assert_eq!(v.actual_versions, vec![4]);
    }

    #[test]
    fn multiple_versions_is_fractured() {
        let v = VersionConsistency::evaluate(3, vec![3, 4, 3]);
        assert!(!v.consistent);
        assert!(v.is_fractured());
        assert_eq!(v.actual_versions, vec![3, 4]);
    }

    #[test]
    fn empty_observation_is_inconsistent() {
        // A fund with no rows never reaches the guard (it is a not-found),
        // but the classifier itself must not call an empty set consistent.
        let v = VersionConsistency::evaluate(1, vec![]);
        assert!(!v.consistent);
        assert!(!v.is_fractured());
        assert!(v.actual_versions.is_empty());
    }

    #[test]
    fn conflict_payload_carries_expected_and_actuals() {
        let c = VersionConsistency::evaluate(3, vec![5, 4]).into_conflict();
        assert_eq!(c.expected_version, 3);
        assert_eq!(c.actual_versions, vec![4, 5]);
    }
}
