//! Selection behaviour through the public pool API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use unidirector::load_balancer::backend::BackendRef;
use unidirector::load_balancer::{Pool, RequestContext, Strategy};
use unidirector::sync::{LockRank, RankedMutex};

mod common;

fn tally(pool: &Pool, ctx: &RequestContext, n: usize) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for _ in 0..n {
        let backend = pool.resolve(ctx).expect("pool has healthy members");
        *counts.entry(backend.name().to_string()).or_default() += 1;
    }
    counts
}

#[test]
fn test_random_follows_weights() {
    let pool = Pool::with_strategy("weighted", Strategy::random());
    pool.add_backend(common::backend("x", 9001), 1.0).unwrap();
    pool.add_backend(common::backend("y", 9002), 3.0).unwrap();

    let counts = tally(&pool, &RequestContext::new("/"), 10_000);
    let y = counts["y"] as f64 / 10_000.0;
    assert!((y - 0.75).abs() < 0.05, "y share {}", y);
}

#[test]
fn test_power_of_two_prefers_idle_backend() {
    let pool = Pool::with_strategy("p2c", Strategy::random_choices(2).unwrap());
    let busy = common::backend("busy", 9001);
    let idle = common::backend("idle", 9002);
    for _ in 0..10 {
        busy.inc_connections();
    }
    pool.add_backend(busy.clone(), 1.0).unwrap();
    pool.add_backend(idle.clone(), 1.0).unwrap();

    let counts = tally(&pool, &RequestContext::new("/"), 2_000);
    // Idle wins unless both draws land on busy (about a quarter of the time).
    let idle_share = counts["idle"] as f64 / 2_000.0;
    assert!(idle_share > 0.65, "idle share {}", idle_share);
}

#[test]
fn test_zero_weight_member_never_selected() {
    let pool = Pool::with_strategy("drain", Strategy::random());
    pool.add_backend(common::backend("draining", 9001), 0.0).unwrap();
    pool.add_backend(common::backend("live", 9002), 1.0).unwrap();

    let counts = tally(&pool, &RequestContext::new("/"), 500);
    assert_eq!(counts.get("draining"), None);
}

#[test]
fn test_hash_affinity_across_threads() {
    let pool = Arc::new(Pool::with_strategy("cache", Strategy::hash(Some("X-Session".into()))));
    for i in 0..5 {
        pool.add_backend(common::backend(&format!("b{}", i), 9000 + i), 1.0)
            .unwrap();
    }
    let ctx = RequestContext::new("/").with_header("X-Session", "user-7");
    let expected = pool.resolve(&ctx).unwrap().name().to_string();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let ctx = ctx.clone();
            thread::spawn(move || {
                (0..200)
                    .map(|_| pool.resolve(&ctx).unwrap().name().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().iter().all(|name| *name == expected));
    }
}

#[test]
fn test_nested_pool_selection() {
    let inner = Arc::new(Pool::with_strategy("inner", Strategy::round_robin()));
    let a = common::backend("a", 9001);
    inner.add_backend(a.clone(), 1.0).unwrap();

    let outer = Pool::with_strategy("outer", Strategy::fallback(false));
    outer.add_backend(inner.clone(), 1.0).unwrap();
    let spare = common::backend("spare", 9009);
    outer.add_backend(spare.clone(), 1.0).unwrap();

    let ctx = RequestContext::new("/");
    assert_eq!(outer.resolve(&ctx).unwrap().name(), "inner");
    assert_eq!(outer.find_by_address(a.addr).unwrap().name(), "a");

    // The nested pool goes sick once its only member does.
    a.set_healthy(false);
    assert_eq!(outer.resolve(&ctx).unwrap().name(), "spare");
}

#[test]
fn test_resolve_during_membership_churn() {
    let pool = Arc::new(Pool::with_strategy("churn", Strategy::least_connections(Default::default())));
    let stable = common::backend("stable", 9000);
    pool.add_backend(stable.clone(), 1.0).unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let readers_up = Arc::new(Barrier::new(5));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let stop = stop.clone();
            let readers_up = readers_up.clone();
            thread::spawn(move || {
                let ctx = RequestContext::new("/");
                assert!(pool.resolve(&ctx).is_some());
                let mut picks = 1usize;
                readers_up.wait();
                while !stop.load(Ordering::Relaxed) {
                    assert!(pool.resolve(&ctx).is_some());
                    picks += 1;
                }
                picks
            })
        })
        .collect();

    // Every reader has picked once before churn starts.
    readers_up.wait();
    for round in 0..200u16 {
        let extra: BackendRef = common::backend("extra", 10_000 + round);
        pool.add_backend(extra.clone(), 2.0).unwrap();
        assert!(pool.remove_backend(&extra));
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(pool.len(), 1);
}

#[test]
#[should_panic(expected = "lock order violation")]
fn test_pool_lock_under_cursor_rank_panics() {
    let cursor = RankedMutex::new(LockRank::Cursor, 0.0f64);
    let pool = Pool::new("misordered");
    let _held = cursor.lock();
    let _ = pool.add_backend(common::backend("a", 9001), 1.0);
}
