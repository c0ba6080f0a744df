//! Cache sub-protocol operations: point ops, bulk ops, queries, agents,
//! indices, and expiry.

mod common;

use bytes::Bytes;
use common::{b, TestCluster};
use prism::proxy::protocol::{BinaryEntry, CacheOp, OptionalValue, TypedResponse};
use prism::storage::Filter;
use std::time::Duration;

#[tokio::test]
async fn empty_cache_scenario_round_trip() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("test-cache").await;

    let previous = conn.put(channel, "key-1", "value-1").await;
    assert!(!previous.present);

    let current = conn.get(channel, "key-1").await;
    assert_eq!(current, OptionalValue::of(b("value-1")));

    assert_eq!(conn.size(channel).await, 1);

    let id = conn.cache_request(channel, CacheOp::Clear);
    conn.expect_complete(id).await;

    let id = conn.cache_request(channel, CacheOp::IsEmpty);
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Flag { value: true }]
    );
}

#[tokio::test]
async fn empty_value_is_distinguished_from_absent() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("nulls").await;

    conn.put(channel, "present-empty", "").await;
    let seen = conn.get(channel, "present-empty").await;
    assert!(seen.present);
    assert!(seen.value.is_empty());

    let missing = conn.get(channel, "never-written").await;
    assert!(!missing.present);
    assert!(missing.value.is_empty());
}

#[tokio::test]
async fn conditional_mutations() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("conditional").await;

    let id = conn.cache_request(
        channel,
        CacheOp::PutIfAbsent {
            key: b("k"),
            value: b("first"),
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Value(OptionalValue::absent())]
    );

    let id = conn.cache_request(
        channel,
        CacheOp::PutIfAbsent {
            key: b("k"),
            value: b("second"),
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Value(OptionalValue::of(b("first")))]
    );

    let id = conn.cache_request(
        channel,
        CacheOp::ReplaceMapping {
            key: b("k"),
            from: b("wrong"),
            to: b("x"),
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Flag { value: false }]
    );

    let id = conn.cache_request(
        channel,
        CacheOp::ReplaceMapping {
            key: b("k"),
            from: b("first"),
            to: b("updated"),
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Flag { value: true }]
    );

    let id = conn.cache_request(
        channel,
        CacheOp::RemoveMapping {
            key: b("k"),
            value: b("updated"),
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Flag { value: true }]
    );
    assert!(!conn.get(channel, "k").await.present);
}

#[tokio::test]
async fn replace_only_touches_existing_entries() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("replace").await;

    let id = conn.cache_request(
        channel,
        CacheOp::Replace {
            key: b("ghost"),
            value: b("x"),
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Value(OptionalValue::absent())]
    );
    assert!(!conn.get(channel, "ghost").await.present);

    conn.put(channel, "real", "old").await;
    let id = conn.cache_request(
        channel,
        CacheOp::Replace {
            key: b("real"),
            value: b("new"),
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Value(OptionalValue::of(b("old")))]
    );
}

#[tokio::test]
async fn contains_family() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("contains").await;
    conn.put(channel, "k", "v").await;

    for (op, expect) in [
        (CacheOp::ContainsKey { key: b("k") }, true),
        (CacheOp::ContainsKey { key: b("x") }, false),
        (CacheOp::ContainsValue { value: b("v") }, true),
        (CacheOp::ContainsValue { value: b("w") }, false),
        (
            CacheOp::ContainsEntry {
                key: b("k"),
                value: b("v"),
            },
            true,
        ),
        (
            CacheOp::ContainsEntry {
                key: b("k"),
                value: b("w"),
            },
            false,
        ),
    ] {
        let id = conn.cache_request(channel, op);
        assert_eq!(
            conn.expect_complete(id).await,
            vec![TypedResponse::Flag { value: expect }]
        );
    }
}

#[tokio::test]
async fn get_all_streams_only_found_entries() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("bulk").await;
    conn.put(channel, "a", "1").await;
    conn.put(channel, "c", "3").await;

    let id = conn.cache_request(
        channel,
        CacheOp::GetAll {
            keys: vec![b("a"), b("b"), b("c")],
        },
    );
    let messages = conn.expect_complete(id).await;
    assert_eq!(messages.len(), 2);
    assert!(messages.contains(&TypedResponse::Entry(BinaryEntry::new(b("a"), b("1")))));
    assert!(messages.contains(&TypedResponse::Entry(BinaryEntry::new(b("c"), b("3")))));
}

#[tokio::test]
async fn put_all_is_silent_until_complete() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("bulk-put").await;

    let id = conn.cache_request(
        channel,
        CacheOp::PutAll {
            entries: vec![
                BinaryEntry::new(b("a"), b("1")),
                BinaryEntry::new(b("b"), b("2")),
            ],
            ttl_millis: None,
        },
    );
    assert!(conn.expect_complete(id).await.is_empty());
    assert_eq!(conn.size(channel).await, 2);
}

#[tokio::test]
async fn queries_filter_and_order() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("query").await;
    conn.put(channel, "b-key", "hit").await;
    conn.put(channel, "a-key", "hit").await;
    conn.put(channel, "c-key", "miss").await;

    let id = conn.cache_request(
        channel,
        CacheOp::QueryKeys {
            filter: Some(Filter::ValueEquals { value: b("hit") }),
            comparator: Some(b("key-order")),
        },
    );
    let keys: Vec<Bytes> = conn
        .expect_complete(id)
        .await
        .into_iter()
        .map(|message| match message {
            TypedResponse::Key { key } => key,
            other => panic!("unexpected message {other:?}"),
        })
        .collect();
    assert_eq!(keys, vec![b("a-key"), b("b-key")]);

    let id = conn.cache_request(
        channel,
        CacheOp::QueryEntries {
            filter: None,
            comparator: None,
        },
    );
    assert_eq!(conn.expect_complete(id).await.len(), 3);

    let id = conn.cache_request(
        channel,
        CacheOp::QueryValues {
            filter: Some(Filter::InKeySet {
                keys: vec![b("c-key")],
            }),
            comparator: None,
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Value(OptionalValue::of(b("miss")))]
    );
}

#[tokio::test]
async fn index_management_is_idempotent() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("indexed").await;

    let id = conn.cache_request(
        channel,
        CacheOp::Index {
            add: true,
            extractor: b("field"),
            sorted: true,
            comparator: None,
        },
    );
    conn.expect_complete(id).await;

    // Removing twice: the second removal of a gone index is still a success.
    for _ in 0..2 {
        let id = conn.cache_request(
            channel,
            CacheOp::Index {
                add: false,
                extractor: b("field"),
                sorted: false,
                comparator: None,
            },
        );
        conn.expect_complete(id).await;
    }

    let id = conn.cache_request(
        channel,
        CacheOp::Index {
            add: true,
            extractor: Bytes::new(),
            sorted: false,
            comparator: None,
        },
    );
    let error = conn.expect_error(id).await;
    assert!(error.message.contains("extractor"));
}

#[tokio::test]
async fn invoke_validation_and_zero_result_cases() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("invoke").await;
    conn.put(channel, "k", "v").await;

    // Missing agent: a validation error, not an empty Complete.
    let id = conn.cache_request(
        channel,
        CacheOp::Invoke {
            agent: Bytes::new(),
            keys: vec![b("k")],
            filter: None,
        },
    );
    let error = conn.expect_error(id).await;
    assert!(error.message.contains("agent"));

    // Agent against a missing key: legitimately zero messages.
    let id = conn.cache_request(
        channel,
        CacheOp::Invoke {
            agent: b("get"),
            keys: vec![b("missing")],
            filter: None,
        },
    );
    assert!(conn.expect_complete(id).await.is_empty());

    // Agent against a present key: one entry result.
    let id = conn.cache_request(
        channel,
        CacheOp::Invoke {
            agent: b("get"),
            keys: vec![b("k")],
            filter: None,
        },
    );
    assert_eq!(
        conn.expect_complete(id).await,
        vec![TypedResponse::Entry(BinaryEntry::new(b("k"), b("v")))]
    );

    // Filter-shaped invocation processes every matching entry.
    let id = conn.cache_request(
        channel,
        CacheOp::Invoke {
            agent: b("remove"),
            keys: vec![],
            filter: Some(Filter::All),
        },
    );
    assert_eq!(conn.expect_complete(id).await.len(), 1);
    assert_eq!(conn.size(channel).await, 0);
}

#[tokio::test]
async fn aggregate_returns_exactly_one_message() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("aggregate").await;
    conn.put(channel, "a", "1").await;
    conn.put(channel, "b", "2").await;

    let id = conn.cache_request(
        channel,
        CacheOp::Aggregate {
            agent: b("count"),
            keys: vec![],
            filter: Some(Filter::All),
        },
    );
    let messages = conn.expect_complete(id).await;
    match messages.as_slice() {
        [TypedResponse::Value(value)] => {
            assert_eq!(value.value.as_ref(), 2u64.to_be_bytes());
        }
        other => panic!("unexpected aggregate result: {other:?}"),
    }

    // Collaborator rejection surfaces as a per-request error with a cause.
    let id = conn.cache_request(
        channel,
        CacheOp::Aggregate {
            agent: b("median"),
            keys: vec![],
            filter: None,
        },
    );
    let error = conn.expect_error(id).await;
    assert!(error.cause.is_some());
    assert_eq!(conn.size(channel).await, 2);
}

#[tokio::test]
async fn ttl_entries_expire() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("ttl").await;

    let id = conn.cache_request(
        channel,
        CacheOp::Put {
            key: b("ephemeral"),
            value: b("v"),
            ttl_millis: Some(50),
        },
    );
    conn.expect_complete(id).await;
    assert!(conn.get(channel, "ephemeral").await.present);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(!conn.get(channel, "ephemeral").await.present);
    assert_eq!(conn.size(channel).await, 0);
}

#[tokio::test]
async fn negotiated_format_rejects_bad_payloads_per_request() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect_with_format("test", "json").await;
    let channel = conn.ensure_cache("json-values").await;

    let id = conn.cache_request(
        channel,
        CacheOp::Put {
            key: b("k"),
            value: b("not json"),
            ttl_millis: None,
        },
    );
    let error = conn.expect_error(id).await;
    assert!(error.message.contains("decode"));

    // The connection survives and accepts well-formed payloads.
    let id = conn.cache_request(
        channel,
        CacheOp::Put {
            key: b("k"),
            value: b(r#"{"n":1}"#),
            ttl_millis: None,
        },
    );
    conn.expect_complete(id).await;
    assert_eq!(conn.size(channel).await, 1);
}

#[tokio::test]
async fn truncate_is_idempotent() {
    let cluster = TestCluster::new();
    let mut conn = cluster.connect().await;
    let channel = conn.ensure_cache("truncate").await;
    conn.put(channel, "k", "v").await;

    for _ in 0..2 {
        let id = conn.cache_request(channel, CacheOp::Truncate);
        conn.expect_complete(id).await;
    }
    assert_eq!(conn.size(channel).await, 0);
}
