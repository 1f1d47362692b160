//! Tiered retention for checkpoints.
//!
//! Manual checkpoints are never pruned by tier; they are only evicted when
//! the hard `max_checkpoints` cap cannot be met otherwise.

use crate::error::{CheckpointError, Result};
use crate::types::{CheckpointId, CheckpointKind};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

/// What retention needs to know about a checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub id: CheckpointId,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Hard cap on stored checkpoints of every kind.
    pub max_checkpoints: usize,
    /// Newest automatic checkpoints always kept.
    pub keep_recent: usize,
    /// Newest checkpoint of each of the last `daily` days that have one.
    pub daily: usize,
    /// Same per ISO week.
    pub weekly: usize,
    /// Same per calendar month.
    pub monthly: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_checkpoints: 100,
            keep_recent: 5,
            daily: 7,
            weekly: 4,
            monthly: 12,
        }
    }
}

impl RetentionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_checkpoints == 0 {
            return Err(CheckpointError::Configuration(
                "max_checkpoints must be at least 1".into(),
            ));
        }
        if self.keep_recent == 0 {
            return Err(CheckpointError::Configuration(
                "keep_recent must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn newest_first(metas: &[CheckpointMeta]) -> Vec<CheckpointMeta> {
    let mut sorted = metas.to_vec();
    sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    sorted
}

fn oldest_first(mut metas: Vec<CheckpointMeta>) -> Vec<CheckpointMeta> {
    metas.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    metas
}

/// Newest checkpoint of each of the first `quota` distinct buckets.
fn protect_buckets<K, F>(sorted: &[CheckpointMeta], quota: usize, key: F, out: &mut BTreeSet<CheckpointId>)
where
    K: Eq + Hash,
    F: Fn(&DateTime<Utc>) -> K,
{
    let mut seen = HashSet::new();
    for meta in sorted {
        if seen.len() == quota {
            break;
        }
        if seen.insert(key(&meta.created_at)) {
            out.insert(meta.id);
        }
    }
}

/// Non-manual checkpoints protected by at least one tier.
pub fn retained_tiers(metas: &[CheckpointMeta], policy: &RetentionPolicy) -> BTreeSet<CheckpointId> {
    let automatic: Vec<_> = newest_first(metas)
        .into_iter()
        .filter(|m| !m.kind.is_manual())
        .collect();

    let mut keep: BTreeSet<_> = automatic.iter().take(policy.keep_recent).map(|m| m.id).collect();
    protect_buckets(&automatic, policy.daily, |t| t.date_naive(), &mut keep);
    protect_buckets(
        &automatic,
        policy.weekly,
        |t| {
            let week = t.iso_week();
            (week.year(), week.week())
        },
        &mut keep,
    );
    protect_buckets(&automatic, policy.monthly, |t| (t.year(), t.month()), &mut keep);
    keep
}

/// Checkpoints to delete, in deletion order.
///
/// Every automatic checkpoint outside all tiers goes first (oldest first).
/// If the total still exceeds `max_checkpoints`, protected automatic
/// checkpoints are evicted oldest first, then manual ones. Ids in `pinned`
/// are never returned, so the cap may be left unmet.
pub fn plan_eviction(
    metas: &[CheckpointMeta],
    policy: &RetentionPolicy,
    pinned: &BTreeSet<CheckpointId>,
) -> Vec<CheckpointId> {
    let protected = retained_tiers(metas, policy);
    let (manual, automatic): (Vec<_>, Vec<_>) = metas
        .iter()
        .copied()
        .filter(|m| !pinned.contains(&m.id))
        .partition(|m| m.kind.is_manual());
    let (kept, pruned): (Vec<_>, Vec<_>) = automatic.into_iter().partition(|m| protected.contains(&m.id));

    let mut evict: Vec<_> = oldest_first(pruned).into_iter().map(|m| m.id).collect();
    let mut remaining = metas.len() - evict.len();

    for meta in oldest_first(kept).into_iter().chain(oldest_first(manual)) {
        if remaining <= policy.max_checkpoints {
            break;
        }
        evict.push(meta.id);
        remaining -= 1;
    }
    evict
}
