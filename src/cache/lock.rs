use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use super::telemetry::Tier;

/// Acquire a shared guard on a tier, recovering from poisoning.
pub(crate) fn read_tier<'a, T>(
    lock: &'a RwLock<T>,
    tier: Tier,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read()
        .unwrap_or_else(|poisoned| recover(poisoned, tier, op, "rwlock.read"))
}

/// Acquire an exclusive guard on a tier, recovering from poisoning.
///
/// LRU lookups reorder recency, so `get` goes through here as well.
pub(crate) fn write_tier<'a, T>(
    lock: &'a RwLock<T>,
    tier: Tier,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write()
        .unwrap_or_else(|poisoned| recover(poisoned, tier, op, "rwlock.write"))
}

fn recover<G>(
    poisoned: PoisonError<G>,
    tier: Tier,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        op,
        tier = tier.as_str(),
        lock_kind,
        result = "poisoned_recovered",
        hint = "tier contents may be stale after a panic in another thread",
        "Recovered from poisoned page cache lock"
    );
    poisoned.into_inner()
}
