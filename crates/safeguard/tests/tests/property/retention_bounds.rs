//! Property tests: retention never exceeds its cap, evicts unprotected
//! automatic checkpoints first and touches manual ones last.

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use safeguard_checkpoint::retention::retained_tiers;
use safeguard_checkpoint::{plan_eviction, CheckpointId, CheckpointKind, CheckpointMeta, RetentionPolicy};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn arb_kind() -> impl Strategy<Value = CheckpointKind> {
    prop_oneof![
        2 => Just(CheckpointKind::Automatic),
        1 => Just(CheckpointKind::Scheduled),
        1 => Just(CheckpointKind::EventTriggered),
        1 => Just(CheckpointKind::Manual),
    ]
}

/// Checkpoints spread over roughly a year, with ids in creation order.
fn arb_history() -> impl Strategy<Value = Vec<CheckpointMeta>> {
    prop::collection::vec((arb_kind(), 0i64..12 * 60), 0..60).prop_map(|entries| {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut at = start;
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (kind, gap_hours))| {
                at += Duration::hours(gap_hours);
                CheckpointMeta {
                    id: CheckpointId(i as u64 + 1),
                    kind,
                    created_at: at,
                }
            })
            .collect()
    })
}

fn arb_policy() -> impl Strategy<Value = RetentionPolicy> {
    (1usize..40, 1usize..6, 0usize..8, 0usize..5, 0usize..6).prop_map(
        |(max_checkpoints, keep_recent, daily, weekly, monthly)| RetentionPolicy {
            max_checkpoints,
            keep_recent,
            daily,
            weekly,
            monthly,
        },
    )
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// After eviction the cap holds and every evicted id exists exactly once.
    #[test]
    fn eviction_respects_cap(history in arb_history(), policy in arb_policy()) {
        let evict = plan_eviction(&history, &policy, &BTreeSet::new());
        let unique: BTreeSet<_> = evict.iter().copied().collect();
        prop_assert_eq!(unique.len(), evict.len());

        let known: BTreeSet<_> = history.iter().map(|m| m.id).collect();
        prop_assert!(unique.is_subset(&known));
        prop_assert!(history.len() - evict.len() <= policy.max_checkpoints);
    }

    /// Surviving automatic checkpoints are all protected by some tier.
    #[test]
    fn unprotected_automatic_checkpoints_are_evicted(
        history in arb_history(),
        policy in arb_policy(),
    ) {
        let protected = retained_tiers(&history, &policy);
        let evict: BTreeSet<_> = plan_eviction(&history, &policy, &BTreeSet::new()).into_iter().collect();
        for meta in &history {
            if !meta.kind.is_manual() && !protected.contains(&meta.id) {
                prop_assert!(evict.contains(&meta.id), "{} survived", meta.id);
            }
        }
    }

    /// Manual checkpoints go only once no automatic checkpoint is left.
    #[test]
    fn manual_checkpoints_go_last(history in arb_history(), policy in arb_policy()) {
        let evict: BTreeSet<_> = plan_eviction(&history, &policy, &BTreeSet::new()).into_iter().collect();
        let manual_evicted = history
            .iter()
            .any(|m| m.kind.is_manual() && evict.contains(&m.id));
        if manual_evicted {
            for meta in history.iter().filter(|m| !m.kind.is_manual()) {
                prop_assert!(evict.contains(&meta.id));
            }
        }
    }

    /// Cap-driven eviction within a class removes the oldest first.
    #[test]
    fn cap_eviction_is_oldest_first(history in arb_history(), policy in arb_policy()) {
        let protected = retained_tiers(&history, &policy);
        let evict: BTreeSet<_> = plan_eviction(&history, &policy, &BTreeSet::new()).into_iter().collect();

        let classes: [Box<dyn Fn(&CheckpointMeta) -> bool>; 2] = [
            Box::new(|m| !m.kind.is_manual() && protected.contains(&m.id)),
            Box::new(|m| m.kind.is_manual()),
        ];
        for in_class in classes.iter() {
            let members: Vec<_> = history.iter().filter(|m| in_class(m)).collect();
            // Ids follow creation time, so an evicted member never has a
            // surviving older sibling.
            let newest_evicted = members.iter().filter(|m| evict.contains(&m.id)).map(|m| m.id).max();
            if let Some(newest) = newest_evicted {
                for meta in members.iter().filter(|m| m.id < newest) {
                    prop_assert!(evict.contains(&meta.id), "{} kept before {}", meta.id, newest);
                }
            }
        }
    }

    /// With room to spare, the newest `keep_recent` automatic checkpoints survive.
    #[test]
    fn recent_automatic_checkpoints_survive_without_pressure(
        history in arb_history(),
        keep_recent in 1usize..6,
    ) {
        let policy = RetentionPolicy {
            max_checkpoints: 1000,
            keep_recent,
            daily: 0,
            weekly: 0,
            monthly: 0,
        };
        let evict: BTreeSet<_> = plan_eviction(&history, &policy, &BTreeSet::new()).into_iter().collect();
        let mut automatic: Vec<_> = history.iter().filter(|m| !m.kind.is_manual()).collect();
        automatic.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        for (rank, meta) in automatic.iter().enumerate() {
            prop_assert_eq!(evict.contains(&meta.id), rank >= keep_recent);
        }
        prop_assert!(history.iter().filter(|m| m.kind.is_manual()).all(|m| !evict.contains(&m.id)));
    }
}
