use super::*;

fn cache(ttl_secs: u64, capacity: usize) -> EntryCache<String, u32> {
    EntryCache::new(CacheDomain::Users, DomainConfig::new(ttl_secs, capacity))
}

#[tokio::test(start_paused = true)]
async fn get_returns_value_until_ttl_elapses() {
    let cache = cache(10, 16);
    cache.set("a".to_string(), 7);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(cache.get(&"a".to_string()), Some(7));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get(&"a".to_string()), None);
    assert!(!cache.has(&"a".to_string()));
    assert_eq!(cache.stats().keys, 0);
}

#[tokio::test(start_paused = true)]
async fn set_refreshes_insertion_time() {
    let cache = cache(10, 16);
    cache.set("a".to_string(), 1);
    tokio::time::advance(Duration::from_secs(8)).await;
    cache.set("a".to_string(), 2);
    tokio::time::advance(Duration::from_secs(8)).await;

    assert_eq!(cache.get(&"a".to_string()), Some(2));
}

#[tokio::test(start_paused = true)]
async fn full_cache_evicts_oldest_entry() {
    let cache = cache(60, 2);
    cache.set("first".to_string(), 1);
    tokio::time::advance(Duration::from_millis(10)).await;
    cache.set("second".to_string(), 2);
    tokio::time::advance(Duration::from_millis(10)).await;
    cache.set("third".to_string(), 3);

    assert!(!cache.has(&"first".to_string()));
    assert!(cache.has(&"second".to_string()));
    assert!(cache.has(&"third".to_string()));
    assert_eq!(cache.stats().keys, 2);
}

#[tokio::test(start_paused = true)]
async fn full_cache_prefers_dropping_expired_entries() {
    let cache = cache(5, 2);
    cache.set("stale".to_string(), 1);
    tokio::time::advance(Duration::from_secs(6)).await;
    cache.set("fresh".to_string(), 2);
    cache.set("newest".to_string(), 3);

    assert!(cache.has(&"fresh".to_string()));
    assert!(cache.has(&"newest".to_string()));
}

#[tokio::test(start_paused = true)]
async fn overwriting_existing_key_does_not_evict() {
    let cache = cache(60, 2);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    cache.set("a".to_string(), 3);

    assert_eq!(cache.get(&"a".to_string()), Some(3));
    assert_eq!(cache.get(&"b".to_string()), Some(2));
}

#[tokio::test(start_paused = true)]
async fn insert_if_absent_reports_first_insert_only() {
    let cache = cache(5, 16);
    assert!(cache.insert_if_absent("m".to_string(), 1));
    assert!(!cache.insert_if_absent("m".to_string(), 2));
    assert_eq!(cache.get(&"m".to_string()), Some(1));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(cache.insert_if_absent("m".to_string(), 3));
}

#[tokio::test(start_paused = true)]
async fn insert_if_absent_never_evicts_live_entries() {
    let cache = cache(60, 2);
    assert!(cache.insert_if_absent("a".to_string(), 1));
    assert!(cache.insert_if_absent("b".to_string(), 2));
    assert!(cache.insert_if_absent("c".to_string(), 3));
    assert_eq!(cache.stats().keys, 3);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(!cache.insert_if_absent("a".to_string(), 4));

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(cache.insert_if_absent("d".to_string(), 5));
    assert_eq!(cache.stats().keys, 1);
}

#[tokio::test(start_paused = true)]
async fn upsert_sees_live_value_only() {
    let cache = cache(5, 16);
    assert_eq!(cache.upsert("k".to_string(), |v| v.copied().unwrap_or(0) + 1), 1);
    assert_eq!(cache.upsert("k".to_string(), |v| v.copied().unwrap_or(0) + 1), 2);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.upsert("k".to_string(), |v| v.copied().unwrap_or(0) + 1), 1);
}

#[tokio::test(start_paused = true)]
async fn update_existing_skips_missing_keys() {
    let cache = cache(60, 16);
    assert!(!cache.update_existing(&"ghost".to_string(), |v| *v += 1));
    assert!(!cache.has(&"ghost".to_string()));

    cache.set("k".to_string(), 1);
    assert!(cache.update_existing(&"k".to_string(), |v| *v += 10));
    assert_eq!(cache.get(&"k".to_string()), Some(11));
}

#[tokio::test(start_paused = true)]
async fn stats_count_hits_and_misses() {
    let cache = cache(60, 16);
    cache.set("a".to_string(), 1);
    let _ = cache.get(&"a".to_string());
    let _ = cache.get(&"a".to_string());
    let _ = cache.get(&"b".to_string());
    let _ = cache.has(&"b".to_string());

    let stats = cache.stats();
    assert_eq!(stats.keys, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(start_paused = true)]
async fn clear_is_idempotent() {
    let cache = cache(60, 16);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);

    assert_eq!(cache.clear(), 2);
    assert_eq!(cache.clear(), 0);
    assert_eq!(cache.stats().keys, 0);
}

#[tokio::test(start_paused = true)]
async fn purge_expired_removes_only_stale_entries() {
    let cache = cache(5, 16);
    cache.set("old".to_string(), 1);
    tokio::time::advance(Duration::from_secs(4)).await;
    cache.set("new".to_string(), 2);
    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(cache.purge_expired(), 1);
    assert!(cache.has(&"new".to_string()));
}

#[tokio::test]
async fn zero_capacity_is_treated_as_one() {
    let cache = cache(60, 0);
    cache.set("a".to_string(), 1);
    cache.set("b".to_string(), 2);
    assert_eq!(cache.stats().keys, 1);
    assert!(cache.has(&"b".to_string()));
}
