//! TTL eviction for the two-level balance cache.

use crate::store::BalanceCache;

use super::TTL_MS;

/// A cached entry may be served as `cached` only while this holds.
pub fn is_fresh(ts: i64, now_ms: i64) -> bool {
    now_ms - ts < TTL_MS
}

/// Drop every entry at or past the TTL, then drop emptied contract buckets.
///
/// Returns whether anything was deleted so the caller can skip a redundant
/// store write.
pub fn evict_expired(balances: &mut BalanceCache, now_ms: i64) -> bool {
    let mut mutated = false;
    for bucket in balances.values_mut() {
        let before = bucket.len();
        bucket.retain(|_, entry| is_fresh(entry.ts, now_ms));
        if bucket.len() != before {
            mutated = true;
        }
    }
    let before = balances.len();
    balances.retain(|_, bucket| !bucket.is_empty());
    if balances.len() != before {
        mutated = true;
    }
    mutated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BalanceEntry;

    fn entry(ts: i64) -> BalanceEntry {
        BalanceEntry {
            hex: "0x0".into(),
            ts,
            formatted: "0".into(),
        }
    }

    #[test]
    fn test_removes_stale_entries_and_empty_buckets() {
        let now = 10_000_000;
        let mut balances = BalanceCache::new();
        balances
            .entry("0xaaa".to_string())
            .or_default()
            .insert("alice".into(), entry(now - TTL_MS - 1));
        balances.entry("0xbbb".to_string()).or_default().extend([
            ("bob".to_string(), entry(now - 1)),
            ("carol".to_string(), entry(now - TTL_MS)),
        ]);

        assert!(evict_expired(&mut balances, now));

        // the 0xaaa bucket emptied out and was pruned with it
        assert!(!balances.contains_key("0xaaa"));
        let bucket = &balances["0xbbb"];
        assert!(bucket.contains_key("bob"));
        assert!(!bucket.contains_key("carol"));

        // every survivor is fresh
        for bucket in balances.values() {
            assert!(bucket.values().all(|e| is_fresh(e.ts, now)));
        }
    }

    #[test]
    fn test_no_mutation_means_no_write() {
        let now = 10_000_000;
        let mut balances = BalanceCache::new();
        balances
            .entry("0xaaa".to_string())
            .or_default()
            .insert("alice".into(), entry(now - 5));

        assert!(!evict_expired(&mut balances, now));
        assert_eq!(balances["0xaaa"].len(), 1);
    }

    #[test]
    fn test_freshness_boundary() {
        let now = 10_000_000;
        assert!(is_fresh(now - TTL_MS + 1, now));
        assert!(!is_fresh(now - TTL_MS, now));
    }
}
