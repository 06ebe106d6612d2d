use std::collections::HashSet;
use std::sync::Arc;

use meridian_cache::Cache;
use meridian_core::{ShardId, TenantId, Timestamp, Value};
use meridian_gateway::{Gateway, GatewayRequest, Hints};
use meridian_queue::{DurabilityMode, EventQueue, RetryPolicy};
use meridian_routing::{InMemoryPolicyStorage, RoutingStore};
use meridian_shard::{ShardConfig, ShardRuntime};
use tempfile::TempDir;

fn gateway_with_one_shard() -> (TempDir, Gateway) {
    let dir = TempDir::new().unwrap();
    let store = meridian_storage::Store::open(
        "shard_0",
        dir.path().join("shard_0.db"),
        16 << 20,
        1_000,
    )
    .unwrap();
    store
        .execute(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, tenant_id TEXT)",
            &[],
        )
        .unwrap();
    let queue = Arc::new(EventQueue::new(
        Arc::new(Cache::new()),
        RetryPolicy::default(),
        DurabilityMode::Cache,
    ));
    let shard_id = ShardId::from("shard_0");
    let runtime = Arc::new(ShardRuntime::new(
        shard_id.clone(),
        ShardConfig::default(),
        store,
        queue,
    ));

    let mut known = HashSet::new();
    known.insert(shard_id.clone());
    let routing = Arc::new(RoutingStore::new(Arc::new(InMemoryPolicyStorage::default()), known));
    let mut tenants = std::collections::HashMap::new();
    tenants.insert(TenantId::from("acme"), shard_id.clone());
    routing
        .publish(tenants, vec![], "initial policy", Timestamp::now())
        .unwrap();

    let cache = Arc::new(Cache::new());
    let gateway = Gateway::new(routing, cache, 64);
    gateway.register_shard(shard_id, runtime);
    (dir, gateway)
}

fn req(tenant: &str, sql: &str, params: Vec<Value>) -> GatewayRequest {
    GatewayRequest {
        tenant_id: TenantId::from(tenant),
        sql: sql.to_string(),
        params,
        hints: Hints::default(),
        transaction_id: None,
        session_id: None,
    }
}

#[test]
fn hot_read_is_served_from_cache_on_second_call() {
    let (_dir, gateway) = gateway_with_one_shard();
    gateway
        .execute(req(
            "acme",
            "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)",
            vec![Value::Int(1), Value::Text("Ada".into()), Value::Text("acme".into())],
        ))
        .unwrap();

    let first = gateway
        .execute(req(
            "acme",
            "/*+ bounded=60000 */ SELECT id, name FROM users WHERE tenant_id = ?1",
            vec![Value::Text("acme".into())],
        ))
        .unwrap();
    assert!(!first.meta.from_cache);
    assert_eq!(first.rows.len(), 1);

    let second = gateway
        .execute(req(
            "acme",
            "/*+ bounded=60000 */ SELECT id, name FROM users WHERE tenant_id = ?1",
            vec![Value::Text("acme".into())],
        ))
        .unwrap();
    assert!(second.meta.from_cache);
    assert_eq!(second.rows, first.rows);
}

#[test]
fn strong_read_always_bypasses_cache() {
    let (_dir, gateway) = gateway_with_one_shard();
    gateway
        .execute(req(
            "acme",
            "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)",
            vec![Value::Int(1), Value::Text("Ada".into()), Value::Text("acme".into())],
        ))
        .unwrap();

    for _ in 0..2 {
        let response = gateway
            .execute(req(
                "acme",
                "/*+ strong */ SELECT id, name FROM users WHERE tenant_id = ?1",
                vec![Value::Text("acme".into())],
            ))
            .unwrap();
        assert!(!response.meta.from_cache);
    }
}

#[test]
fn write_after_cache_fill_is_invalidated_within_one_drain_cycle() {
    let (_dir, gateway) = gateway_with_one_shard();
    gateway
        .execute(req(
            "acme",
            "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)",
            vec![Value::Int(1), Value::Text("Ada".into()), Value::Text("acme".into())],
        ))
        .unwrap();
    let cached = gateway
        .execute(req(
            "acme",
            "/*+ bounded=60000 */ SELECT id, name FROM users WHERE tenant_id = ?1",
            vec![Value::Text("acme".into())],
        ))
        .unwrap();
    assert_eq!(cached.rows.len(), 1);

    gateway
        .execute(req(
            "acme",
            "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)",
            vec![Value::Int(2), Value::Text("Grace".into()), Value::Text("acme".into())],
        ))
        .unwrap();

    // the shard's queue workers drain asynchronously; poll for the
    // invalidate event to land instead of assuming a fixed delay.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    let mut rows_seen = 1;
    while std::time::Instant::now() < deadline {
        let response = gateway
            .execute(req(
                "acme",
                "/*+ bounded=60000 */ SELECT id, name FROM users WHERE tenant_id = ?1",
                vec![Value::Text("acme".into())],
            ))
            .unwrap();
        rows_seen = response.rows.len();
        if rows_seen == 2 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert_eq!(rows_seen, 2, "bounded read never observed the second insert after invalidation");
}

#[test]
fn cache_ttl_ms_and_bounded_ms_hints_shrink_the_acceptable_staleness_window() {
    let (_dir, gateway) = gateway_with_one_shard();
    gateway
        .execute(req(
            "acme",
            "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)",
            vec![Value::Int(1), Value::Text("Ada".into()), Value::Text("acme".into())],
        ))
        .unwrap();

    // cache_ttl_ms shrinks the request's fresh window far below the
    // table policy's default (30s); bounded_ms then caps how far past
    // that window a bounded read will still accept the entry.
    let tight_request = GatewayRequest {
        tenant_id: TenantId::from("acme"),
        sql: "SELECT id, name FROM users WHERE tenant_id = ?1".to_string(),
        params: vec![Value::Text("acme".into())],
        hints: Hints {
            consistency: Some(meridian_cache::ConsistencyMode::Bounded),
            cache_ttl_ms: Some(1),
            bounded_ms: Some(5),
            ..Hints::default()
        },
        transaction_id: None,
        session_id: None,
    };
    let populated = gateway.execute(tight_request.clone()).unwrap();
    assert!(!populated.meta.from_cache);

    // past both the 1ms fresh window and the 5ms staleness budget, a
    // bounded read must fall through to the shard instead of keeping
    // the entry resident until the table policy's 30s ttl/swr.
    std::thread::sleep(std::time::Duration::from_millis(20));
    let after_budget = gateway.execute(tight_request).unwrap();
    assert!(!after_budget.meta.from_cache);
}

#[test]
fn shard_key_hint_disambiguates_the_cache_entry() {
    let (_dir, gateway) = gateway_with_one_shard();
    gateway
        .execute(req(
            "acme",
            "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)",
            vec![Value::Int(1), Value::Text("Ada".into()), Value::Text("acme".into())],
        ))
        .unwrap();

    let by_key = |shard_key: &str| GatewayRequest {
        tenant_id: TenantId::from("acme"),
        sql: "SELECT id, name FROM users WHERE tenant_id = ?1".to_string(),
        params: vec![Value::Text("acme".into())],
        hints: Hints {
            consistency: Some(meridian_cache::ConsistencyMode::Bounded),
            shard_key: Some(shard_key.to_string()),
            ..Hints::default()
        },
        transaction_id: None,
        session_id: None,
    };

    let first = gateway.execute(by_key("view-a")).unwrap();
    assert!(!first.meta.from_cache);
    // same shard_key: served from cache.
    let second = gateway.execute(by_key("view-a")).unwrap();
    assert!(second.meta.from_cache);
    // different shard_key: distinct cache entry, misses.
    let third = gateway.execute(by_key("view-b")).unwrap();
    assert!(!third.meta.from_cache);
}

#[test]
fn transaction_commits_all_statements_atomically() {
    let (_dir, gateway) = gateway_with_one_shard();
    let tenant = TenantId::from("acme");
    let (session_id, tx_id) = gateway.begin_transaction(&tenant, None).unwrap();

    gateway
        .execute(GatewayRequest {
            tenant_id: tenant.clone(),
            sql: "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)".to_string(),
            params: vec![Value::Int(1), Value::Text("Ada".into()), Value::Text("acme".into())],
            hints: Hints::default(),
            transaction_id: Some(tx_id),
            session_id: Some(session_id.clone()),
        })
        .unwrap();
    gateway
        .execute(GatewayRequest {
            tenant_id: tenant.clone(),
            sql: "INSERT INTO users (id, name, tenant_id) VALUES (?1, ?2, ?3)".to_string(),
            params: vec![Value::Int(2), Value::Text("Grace".into()), Value::Text("acme".into())],
            hints: Hints::default(),
            transaction_id: Some(tx_id),
            session_id: Some(session_id.clone()),
        })
        .unwrap();

    gateway.commit_transaction(&session_id, &tenant, tx_id).unwrap();

    let response = gateway
        .execute(req(
            "acme",
            "/*+ strong */ SELECT id FROM users WHERE tenant_id = ?1",
            vec![Value::Text("acme".into())],
        ))
        .unwrap();
    assert_eq!(response.rows.len(), 2);
}
