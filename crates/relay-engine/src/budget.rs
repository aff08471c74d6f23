// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pre-persist budget evaluation.
//!
//! Check order matters and is observable: TTL first, then cycle detection,
//! then the hop ceiling. An envelope that trips both the cycle rule and the
//! hop ceiling reports `cycle_detected`.

use chrono::{DateTime, Utc};
use relay_core::{Budget, DeadLetterReason};
use relay_subject::subject_hash;

/// Evaluate an envelope's budget before persistence.
///
/// Returns `None` when the envelope may proceed, or the dead-letter reason
/// that rejects it. The cycle rule fires when the origin or the destination
/// subject is already on the envelope's path, or when an origin publishes
/// straight to itself.
pub fn evaluate(
    budget: &Budget,
    from: &str,
    subject: &str,
    now: DateTime<Utc>,
) -> Option<DeadLetterReason> {
    if now > budget.deadline {
        return Some(DeadLetterReason::TtlExpired);
    }

    if subject == from
        || budget.visited.contains(&subject_hash(from))
        || budget.visited.contains(&subject_hash(subject))
    {
        return Some(DeadLetterReason::CycleDetected);
    }

    if budget.visited.len() >= budget.max_hops as usize {
        return Some(DeadLetterReason::HopLimit);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relay_core::BudgetOverrides;

    fn budget(overrides: BudgetOverrides) -> Budget {
        Budget::normalize(&overrides, Utc::now())
    }

    #[test]
    fn fresh_budget_passes() {
        let b = budget(BudgetOverrides::default());
        assert_eq!(
            evaluate(&b, "relay.human.console", "relay.agent.a", Utc::now()),
            None
        );
    }

    #[test]
    fn expired_deadline_rejects() {
        let b = budget(BudgetOverrides {
            ttl_ms: Some(1),
            ..Default::default()
        });
        let later = Utc::now() + Duration::seconds(10);
        assert_eq!(
            evaluate(&b, "relay.a.x", "relay.b.y", later),
            Some(DeadLetterReason::TtlExpired)
        );
    }

    #[test]
    fn self_publish_is_a_cycle() {
        let b = budget(BudgetOverrides::default());
        assert_eq!(
            evaluate(&b, "relay.loop.a", "relay.loop.a", Utc::now()),
            Some(DeadLetterReason::CycleDetected)
        );
    }

    #[test]
    fn visited_origin_is_a_cycle() {
        let mut visited = std::collections::BTreeSet::new();
        visited.insert(subject_hash("relay.loop.a"));
        let b = budget(BudgetOverrides {
            visited,
            ..Default::default()
        });
        assert_eq!(
            evaluate(&b, "relay.loop.a", "relay.loop.b", Utc::now()),
            Some(DeadLetterReason::CycleDetected)
        );
    }

    #[test]
    fn visited_destination_is_a_cycle() {
        let mut visited = std::collections::BTreeSet::new();
        visited.insert(subject_hash("relay.loop.b"));
        let b = budget(BudgetOverrides {
            visited,
            ..Default::default()
        });
        assert_eq!(
            evaluate(&b, "relay.loop.a", "relay.loop.b", Utc::now()),
            Some(DeadLetterReason::CycleDetected)
        );
    }

    #[test]
    fn hop_ceiling_rejects() {
        let mut visited = std::collections::BTreeSet::new();
        visited.insert(subject_hash("relay.hop.1"));
        visited.insert(subject_hash("relay.hop.2"));
        let b = budget(BudgetOverrides {
            max_hops: Some(2),
            visited,
            ..Default::default()
        });
        assert_eq!(
            evaluate(&b, "relay.hop.3", "relay.hop.4", Utc::now()),
            Some(DeadLetterReason::HopLimit)
        );
    }

    #[test]
    fn cycle_takes_precedence_over_hop_limit() {
        // One hop used, ceiling of one, and the origin is already on the
        // path: both rules trip, cycle wins.
        let mut visited = std::collections::BTreeSet::new();
        visited.insert(subject_hash("relay.loop.a"));
        let b = budget(BudgetOverrides {
            max_hops: Some(1),
            visited,
            ..Default::default()
        });
        assert_eq!(
            evaluate(&b, "relay.loop.a", "relay.loop.b", Utc::now()),
            Some(DeadLetterReason::CycleDetected)
        );
    }

    #[test]
    fn hops_below_ceiling_pass() {
        let mut visited = std::collections::BTreeSet::new();
        visited.insert(subject_hash("relay.hop.1"));
        let b = budget(BudgetOverrides {
            max_hops: Some(2),
            visited,
            ..Default::default()
        });
        assert_eq!(evaluate(&b, "relay.hop.2", "relay.hop.3", Utc::now()), None);
    }
}
