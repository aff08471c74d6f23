// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-envelope delivery budget.
//!
//! A budget caps how far an envelope may travel: a hop ceiling, a TTL
//! deadline, and the set of subject hashes already visited on the way here.
//! Cycle detection works purely on the hash set; raw subject tokens never
//! travel with the budget.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default hop ceiling applied when the publisher supplies none.
pub const DEFAULT_MAX_HOPS: u8 = 5;

/// Default TTL in milliseconds applied when the publisher supplies none.
pub const DEFAULT_TTL_MS: u32 = 30_000;

/// Inclusive bounds `max_hops` is clamped into.
pub const MAX_HOPS_BOUNDS: (u8, u8) = (1, 16);

/// Inclusive bounds `ttl_ms` is clamped into (1 ms – 5 min).
pub const TTL_MS_BOUNDS: (u32, u32) = (1, 300_000);

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Normalized budget carried by every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Budget {
    /// Maximum number of publisher hops, clamped into [`MAX_HOPS_BOUNDS`].
    pub max_hops: u8,

    /// Time-to-live in milliseconds, clamped into [`TTL_MS_BOUNDS`].
    pub ttl_ms: u32,

    /// Absolute deadline computed as `created_at + ttl_ms`.
    pub deadline: DateTime<Utc>,

    /// Hashes of subjects already visited on this envelope's path.
    ///
    /// Serialises as a sorted array (`BTreeSet`) for wire stability.
    #[serde(default)]
    pub visited: BTreeSet<u64>,
}

impl Budget {
    /// Apply defaults and clamps to caller-supplied overrides.
    ///
    /// `deadline` is anchored at `now`; the visited set is taken as-is (a
    /// re-publish passes its parent's set through).
    pub fn normalize(overrides: &BudgetOverrides, now: DateTime<Utc>) -> Self {
        let (hops_min, hops_max) = MAX_HOPS_BOUNDS;
        let (ttl_min, ttl_max) = TTL_MS_BOUNDS;
        let max_hops = overrides
            .max_hops
            .unwrap_or(DEFAULT_MAX_HOPS)
            .clamp(hops_min, hops_max);
        let ttl_ms = overrides
            .ttl_ms
            .unwrap_or(DEFAULT_TTL_MS)
            .clamp(ttl_min, ttl_max);
        Self {
            max_hops,
            ttl_ms,
            deadline: now + Duration::milliseconds(i64::from(ttl_ms)),
            visited: overrides.visited.clone(),
        }
    }

    /// Record a visited subject hash. Returns `true` if it was new.
    pub fn visit(&mut self, subject_hash: u64) -> bool {
        self.visited.insert(subject_hash)
    }

    /// Number of hops already consumed.
    pub fn hops_used(&self) -> usize {
        self.visited.len()
    }
}

// ---------------------------------------------------------------------------
// BudgetOverrides
// ---------------------------------------------------------------------------

/// Caller-supplied partial budget, normalized by [`Budget::normalize`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BudgetOverrides {
    /// Hop ceiling; defaults to [`DEFAULT_MAX_HOPS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<u8>,

    /// TTL in milliseconds; defaults to [`DEFAULT_TTL_MS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u32>,

    /// Pre-populated visited set (used by re-publishes and tests).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub visited: BTreeSet<u64>,
}

impl BudgetOverrides {
    /// Overrides carrying a parent envelope's visited set for a re-publish.
    pub fn inherited(parent: &Budget) -> Self {
        Self {
            max_hops: Some(parent.max_hops),
            ttl_ms: Some(parent.ttl_ms),
            visited: parent.visited.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied() {
        let now = Utc::now();
        let b = Budget::normalize(&BudgetOverrides::default(), now);
        assert_eq!(b.max_hops, DEFAULT_MAX_HOPS);
        assert_eq!(b.ttl_ms, DEFAULT_TTL_MS);
        assert_eq!(b.deadline, now + Duration::milliseconds(30_000));
        assert!(b.visited.is_empty());
    }

    #[test]
    fn max_hops_clamped_to_bounds() {
        let now = Utc::now();
        let low = Budget::normalize(
            &BudgetOverrides {
                max_hops: Some(0),
                ..Default::default()
            },
            now,
        );
        assert_eq!(low.max_hops, 1);

        let high = Budget::normalize(
            &BudgetOverrides {
                max_hops: Some(200),
                ..Default::default()
            },
            now,
        );
        assert_eq!(high.max_hops, 16);
    }

    #[test]
    fn ttl_clamped_to_bounds() {
        let now = Utc::now();
        let low = Budget::normalize(
            &BudgetOverrides {
                ttl_ms: Some(0),
                ..Default::default()
            },
            now,
        );
        assert_eq!(low.ttl_ms, 1);

        let high = Budget::normalize(
            &BudgetOverrides {
                ttl_ms: Some(10_000_000),
                ..Default::default()
            },
            now,
        );
        assert_eq!(high.ttl_ms, 300_000);
    }

    #[test]
    fn visit_reports_new_membership() {
        let now = Utc::now();
        let mut b = Budget::normalize(&BudgetOverrides::default(), now);
        assert!(b.visit(42));
        assert!(!b.visit(42));
        assert_eq!(b.hops_used(), 1);
    }

    #[test]
    fn inherited_overrides_carry_visited() {
        let now = Utc::now();
        let mut parent = Budget::normalize(&BudgetOverrides::default(), now);
        parent.visit(7);
        parent.visit(9);
        let o = BudgetOverrides::inherited(&parent);
        assert_eq!(o.max_hops, Some(parent.max_hops));
        assert_eq!(o.visited, parent.visited);
    }

    #[test]
    fn overrides_reject_unknown_fields() {
        let err = serde_json::from_str::<BudgetOverrides>(r#"{"max_hops": 3, "bogus": 1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn visited_serialises_sorted() {
        let now = Utc::now();
        let mut b = Budget::normalize(&BudgetOverrides::default(), now);
        b.visit(9);
        b.visit(1);
        b.visit(5);
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["visited"], serde_json::json!([1, 5, 9]));
    }
}
