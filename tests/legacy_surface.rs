//! Protocol-v0 unary surface and page-cursor iteration.

mod common;

use bytes::Bytes;
use common::{b, TestCluster};
use prism::proxy::legacy::LegacyFacade;
use prism::storage::Filter;
use std::collections::BTreeSet;

fn facade(cluster: &TestCluster) -> LegacyFacade {
    cluster.runtime.legacy_facade()
}

#[tokio::test]
async fn unary_surface_matches_multiplexed_semantics() {
    let cluster = TestCluster::new();
    let legacy = facade(&cluster);

    let previous = legacy.put("v0", "cache", b("k"), b("v1"), None).unwrap();
    assert!(!previous.present);
    let previous = legacy.put("v0", "cache", b("k"), b("v2"), None).unwrap();
    assert_eq!(previous.into_option(), Some(b("v1")));

    assert!(legacy.contains_key("v0", "cache", b("k")).unwrap());
    assert!(legacy.contains_value("v0", "cache", b("v2")).unwrap());
    assert!(legacy
        .contains_entry("v0", "cache", b("k"), b("v2"))
        .unwrap());
    assert_eq!(legacy.size("v0", "cache").unwrap(), 1);

    let removed = legacy.remove("v0", "cache", b("k")).unwrap();
    assert_eq!(removed.into_option(), Some(b("v2")));
    assert!(legacy.is_empty("v0", "cache").unwrap());
}

#[tokio::test]
async fn unary_and_multiplexed_surfaces_share_state() {
    let cluster = TestCluster::new();
    let legacy = facade(&cluster);
    let mut conn = cluster.connect_scoped("shared").await;

    let channel = conn.ensure_cache("mixed").await;
    conn.put(channel, "from-v1", "x").await;

    let seen = legacy.get("shared", "mixed", b("from-v1")).unwrap();
    assert_eq!(seen.into_option(), Some(b("x")));

    legacy
        .put("shared", "mixed", b("from-v0"), b("y"), None)
        .unwrap();
    let seen = conn.get(channel, "from-v0").await;
    assert_eq!(seen.into_option(), Some(b("y")));
}

#[tokio::test]
async fn unary_queries_and_agents() {
    let cluster = TestCluster::new();
    let legacy = facade(&cluster);
    for i in 0..4 {
        legacy
            .put("v0", "q", b(&format!("key-{i}")), b("same"), None)
            .unwrap();
    }

    let keys = legacy
        .query_keys("v0", "q", Some(Filter::ValueEquals { value: b("same") }))
        .unwrap();
    assert_eq!(keys.len(), 4);

    let entries = legacy
        .get_all("v0", "q", vec![b("key-0"), b("key-9")])
        .unwrap();
    assert_eq!(entries.len(), 1);

    let count = legacy
        .aggregate("v0", "q", b("count"), vec![], Some(Filter::All))
        .unwrap();
    assert_eq!(count.value.as_ref(), 4u64.to_be_bytes());

    let results = legacy
        .invoke(
            "v0",
            "q",
            b("get"),
            vec![b("key-1"), b("missing")],
            None,
        )
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn key_set_paging_covers_2000_keys_without_duplicates() {
    let cluster = TestCluster::new();
    let legacy = facade(&cluster);
    let mut expected = BTreeSet::new();
    for i in 0..2000 {
        let key = format!("key-{i:06}");
        legacy
            .put("v0", "large", b(&key), b("value"), None)
            .unwrap();
        expected.insert(b(&key));
    }

    let mut cookie = Bytes::new();
    let mut seen: BTreeSet<Bytes> = BTreeSet::new();
    let mut pages = 0;
    loop {
        let page = legacy.next_key_set_page("v0", "large", &cookie).unwrap();
        assert!(!page.is_empty(), "every page carries its cookie entry");
        assert!(page[0].key.is_empty());
        cookie = page[0].cookie.clone();
        for entry in &page[1..] {
            assert!(
                seen.insert(entry.key.clone()),
                "key {:?} served twice",
                entry.key
            );
        }
        pages += 1;
        assert!(pages <= 2001, "paging failed to terminate");
        if cookie.is_empty() {
            break;
        }
    }
    assert_eq!(seen, expected);
    assert!(pages > 1, "transfer threshold never forced a page cut");
}

#[tokio::test]
async fn entry_set_paging_returns_values_with_keys() {
    let cluster = TestCluster::new();
    let legacy = facade(&cluster);
    for i in 0..10 {
        legacy
            .put(
                "v0",
                "entries",
                b(&format!("key-{i}")),
                b(&format!("value-{i}")),
                None,
            )
            .unwrap();
    }

    let mut cookie = Bytes::new();
    let mut collected = Vec::new();
    loop {
        let page = legacy
            .next_entry_set_page("v0", "entries", &cookie)
            .unwrap();
        cookie = page[0].cookie.clone();
        collected.extend(page[1..].iter().cloned());
        if cookie.is_empty() {
            break;
        }
    }
    assert_eq!(collected.len(), 10);
    assert_eq!(collected[0].key, b("key-0"));
    assert_eq!(collected[0].value, b("value-0"));
}

#[tokio::test]
async fn paging_an_empty_cache_terminates_immediately() {
    let cluster = TestCluster::new();
    let legacy = facade(&cluster);
    let page = legacy.next_key_set_page("v0", "void", b"").unwrap();
    assert_eq!(page.len(), 1);
    assert!(page[0].cookie.is_empty());
}

#[tokio::test]
async fn keys_inserted_mid_iteration_appear_at_most_once() {
    let cluster = TestCluster::new();
    let legacy = facade(&cluster);
    for i in 0..200 {
        legacy
            .put("v0", "moving", b(&format!("key-{i:04}")), b("value"), None)
            .unwrap();
    }

    let mut cookie = Bytes::new();
    let mut seen: BTreeSet<Bytes> = BTreeSet::new();
    let mut inserted_mid_loop = false;
    loop {
        let page = legacy.next_key_set_page("v0", "moving", &cookie).unwrap();
        cookie = page[0].cookie.clone();
        for entry in &page[1..] {
            assert!(seen.insert(entry.key.clone()), "duplicate key observed");
        }
        if !inserted_mid_loop {
            // Mutate between pages: one key behind the cursor, one ahead.
            legacy
                .put("v0", "moving", b("key-0000-behind"), b("late"), None)
                .unwrap();
            legacy
                .put("v0", "moving", b("zzz-ahead"), b("late"), None)
                .unwrap();
            inserted_mid_loop = true;
        }
        if cookie.is_empty() {
            break;
        }
    }
    // All originals observed exactly once; late keys at most once.
    assert!(seen.len() >= 200);
    assert!(seen.len() <= 202);
}
