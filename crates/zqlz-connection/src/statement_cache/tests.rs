//! Tests for the statement cache and execution profile

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use zqlz_core::{
    CursorConcurrency, CursorHoldability, CursorOptions, CursorType, GeneratedKeys,
    StatementSignature,
};

use super::cache::{Admission, StatementCache};
use super::profile::StatementProfile;

/// Mock prepared statement counting how often it was closed
struct MockStatement {
    sql: String,
    closes: AtomicUsize,
}

impl MockStatement {
    fn new(sql: &str) -> Arc<Self> {
        Arc::new(Self {
            sql: sql.to_string(),
            closes: AtomicUsize::new(0),
        })
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

type Listener = fn(&StatementSignature, Arc<MockStatement>);

fn close_statement(_signature: &StatementSignature, statement: Arc<MockStatement>) {
    statement.closes.fetch_add(1, Ordering::SeqCst);
}

fn cache(capacity: usize) -> StatementCache<Arc<MockStatement>, Listener> {
    StatementCache::new(capacity, close_statement as Listener)
}

fn prepare(
    cache: &StatementCache<Arc<MockStatement>, Listener>,
    signature: &StatementSignature,
) -> Arc<MockStatement> {
    match cache.get(signature) {
        Some(statement) => statement,
        None => cache
            .insert(signature.clone(), MockStatement::new(signature.sql()))
            .into_inner(),
    }
}

// =============================================================================
// Keying
// =============================================================================

#[test]
fn test_identical_request_is_a_hit() {
    let cache = cache(4);
    let signature = StatementSignature::new("SELECT * FROM users WHERE id = ?");

    let first = prepare(&cache, &signature);
    let second = prepare(&cache, &StatementSignature::new("SELECT * FROM users WHERE id = ?"));

    assert!(Arc::ptr_eq(&first, &second));
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(cache.uses(&signature), Some(2));
}

#[test]
fn test_cursor_concurrency_change_is_a_miss() {
    let cache = cache(4);
    let read_only = StatementSignature::new("SELECT * FROM t").with_cursor(CursorOptions::new(
        CursorType::ScrollInsensitive,
        CursorConcurrency::ReadOnly,
    ));
    let updatable = StatementSignature::new("SELECT * FROM t").with_cursor(CursorOptions::new(
        CursorType::ScrollInsensitive,
        CursorConcurrency::Updatable,
    ));

    let a = prepare(&cache, &read_only);
    let b = prepare(&cache, &updatable);

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().hits, 0);
}

#[test]
fn test_every_discriminator_separates_entries() {
    let cache = cache(16);
    let sql = "INSERT INTO t (name) VALUES (?)";
    let cursor = CursorOptions::new(CursorType::ForwardOnly, CursorConcurrency::ReadOnly);
    let signatures = [
        StatementSignature::new(sql),
        StatementSignature::callable(sql),
        StatementSignature::new(sql).with_cursor(cursor),
        StatementSignature::new(sql)
            .with_cursor(cursor.with_holdability(CursorHoldability::HoldOverCommit)),
        StatementSignature::new(sql).with_generated_keys(GeneratedKeys::Flag(true)),
        StatementSignature::new(sql).with_generated_keys(GeneratedKeys::ColumnIndexes(vec![1])),
        StatementSignature::new(sql)
            .with_generated_keys(GeneratedKeys::ColumnNames(vec!["id".to_string()])),
    ];

    for signature in &signatures {
        prepare(&cache, signature);
    }
    assert_eq!(cache.len(), signatures.len());
    assert_eq!(cache.stats().hits, 0);

    // Asking again hits every one of them
    for signature in &signatures {
        prepare(&cache, signature);
    }
    assert_eq!(cache.stats().hits, signatures.len() as u64);
}

// =============================================================================
// Eviction
// =============================================================================

#[test]
fn test_capacity_two_evicts_least_recently_used() {
    let cache = cache(2);
    let a = prepare(&cache, &StatementSignature::new("A"));
    let b = prepare(&cache, &StatementSignature::new("B"));
    let c = prepare(&cache, &StatementSignature::new("C"));

    assert!(!cache.contains(&StatementSignature::new("A")));
    assert!(cache.contains(&StatementSignature::new("B")));
    assert!(cache.contains(&StatementSignature::new("C")));
    assert_eq!(a.close_count(), 1);
    assert_eq!(b.close_count(), 0);
    assert_eq!(c.close_count(), 0);
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_hit_refreshes_recency() {
    let cache = cache(2);
    let a = prepare(&cache, &StatementSignature::new("A"));
    let b = prepare(&cache, &StatementSignature::new("B"));
    prepare(&cache, &StatementSignature::new("A"));
    prepare(&cache, &StatementSignature::new("C"));

    assert_eq!(
        cache.signatures(),
        vec![StatementSignature::new("A"), StatementSignature::new("C")]
    );
    assert_eq!(a.close_count(), 0);
    assert_eq!(b.close_count(), 1);
}

#[test]
fn test_capacity_zero_closes_everything() {
    let cache = cache(3);
    let statements: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|sql| prepare(&cache, &StatementSignature::new(*sql)))
        .collect();

    cache.set_capacity(0);

    assert!(cache.is_empty());
    for statement in &statements {
        assert_eq!(statement.close_count(), 1, "{} not closed once", statement.sql);
    }

    // Disabled cache hands values back without keeping them
    let admission = cache.insert(StatementSignature::new("D"), MockStatement::new("D"));
    assert!(!admission.is_cached());
    assert!(matches!(admission, Admission::Uncached(_)));
    assert!(cache.is_empty());
}

#[test]
fn test_shrinking_capacity_applies_on_next_insert() {
    let cache = cache(3);
    let a = prepare(&cache, &StatementSignature::new("A"));
    let b = prepare(&cache, &StatementSignature::new("B"));
    let c = prepare(&cache, &StatementSignature::new("C"));

    cache.set_capacity(1);
    assert_eq!(cache.len(), 3);
    assert_eq!(a.close_count(), 0);

    let d = prepare(&cache, &StatementSignature::new("D"));
    assert_eq!(cache.signatures(), vec![StatementSignature::new("D")]);
    assert_eq!(a.close_count(), 1);
    assert_eq!(b.close_count(), 1);
    assert_eq!(c.close_count(), 1);
    assert_eq!(d.close_count(), 0);
}

#[test]
fn test_duplicate_insert_keeps_cached_value() {
    let cache = cache(2);
    let signature = StatementSignature::new("SELECT 1");
    let original = MockStatement::new("SELECT 1");
    let duplicate = MockStatement::new("SELECT 1");

    cache.insert(signature.clone(), original.clone());
    let admission = cache.insert(signature.clone(), duplicate.clone());

    assert!(Arc::ptr_eq(&admission.into_inner(), &original));
    assert_eq!(duplicate.close_count(), 1);
    assert_eq!(original.close_count(), 0);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_clear_closes_each_statement_once() {
    let cache = cache(4);
    let a = prepare(&cache, &StatementSignature::new("A"));
    let b = prepare(&cache, &StatementSignature::new("B"));

    cache.clear();
    cache.clear();

    assert!(cache.is_empty());
    assert_eq!(a.close_count(), 1);
    assert_eq!(b.close_count(), 1);
}

#[test]
fn test_closure_listener() {
    let evicted = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = evicted.clone();
    let cache = StatementCache::new(1, move |signature: &StatementSignature, _value: u32| {
        sink.lock().push(signature.sql().to_string());
    });

    cache.insert(StatementSignature::new("A"), 1);
    cache.insert(StatementSignature::new("B"), 2);
    cache.insert(StatementSignature::new("C"), 3);

    assert_eq!(*evicted.lock(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(cache.get(&StatementSignature::new("C")), Some(3));
}

#[test]
fn test_concurrent_access_closes_each_eviction_once() {
    let cache = Arc::new(cache(4));
    let created = Arc::new(parking_lot::Mutex::new(Vec::new()));

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let cache = cache.clone();
            let created = created.clone();
            scope.spawn(move || {
                for round in 0..200 {
                    let sql = format!("SELECT {}", (worker * 7 + round) % 12);
                    let signature = StatementSignature::new(sql.as_str());
                    if cache.get(&signature).is_none() {
                        let statement = MockStatement::new(&sql);
                        created.lock().push(statement.clone());
                        cache.insert(signature, statement);
                    }
                }
            });
        }
    });

    assert!(cache.len() <= 4);
    let created = created.lock();
    let closed: usize = created.iter().map(|s| s.close_count()).sum();
    assert!(created.iter().all(|s| s.close_count() <= 1));
    // Everything not still cached was closed exactly once
    assert_eq!(closed + cache.len(), created.len());
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_cache_stats() {
    let cache = cache(2);
    prepare(&cache, &StatementSignature::new("A"));
    prepare(&cache, &StatementSignature::new("A"));
    prepare(&cache, &StatementSignature::new("A"));
    prepare(&cache, &StatementSignature::new("B"));
    prepare(&cache, &StatementSignature::new("C"));

    let stats = cache.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.size, 2);
    assert_eq!(stats.peak_size, 2);
    assert_eq!(stats.capacity, 2);
    assert_eq!(stats.evictions, 1);
    assert!((stats.hit_ratio() - 0.4).abs() < 0.001);
}

#[test]
fn test_profile_orders_by_total_time() {
    let profile = StatementProfile::new(8);
    profile.record("fast", Duration::from_millis(1));
    profile.record("fast", Duration::from_millis(1));
    profile.record("slow", Duration::from_millis(50));
    profile.record("medium", Duration::from_millis(10));

    let top = profile.top(2);
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].sql, "slow");
    assert_eq!(top[1].sql, "medium");

    let all = profile.top(10);
    let fast = all.iter().find(|t| t.sql == "fast").expect("fast recorded");
    assert_eq!(fast.count, 2);
    assert_eq!(fast.total(), Duration::from_millis(2));
    assert_eq!(fast.average(), Duration::from_millis(1));
}

#[test]
fn test_profile_is_capacity_bounded() {
    let profile = StatementProfile::new(2);
    profile.record("a", Duration::from_millis(5));
    profile.record("b", Duration::from_millis(20));
    // Cheaper than everything tracked, so it is not admitted
    profile.record("c", Duration::from_millis(1));
    assert_eq!(profile.len(), 2);

    // More expensive than "a", which gets dropped
    profile.record("d", Duration::from_millis(10));
    let sqls: Vec<_> = profile.top(5).into_iter().map(|t| t.sql).collect();
    assert_eq!(sqls, vec!["b".to_string(), "d".to_string()]);
}
