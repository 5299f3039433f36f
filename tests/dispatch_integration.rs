//! Dispatch pipeline integration tests.
//!
//! These drive the full router with in-memory backends: SQLite for the
//! persistent store, the in-process volatile store for counters, and a
//! table-driven geo provider so country behavior is deterministic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use shunt::config::RateLimitConfig;
use shunt::geoip::{GeoProvider, GeoResolver, Location};
use shunt::limits::RateLimiter;
use shunt::models::{Link, Target};
use shunt::storage::{SqliteStorage, Storage};
use shunt::volatile::{keys, MemoryStore, VolatileStore};

/// Geo provider with a fixed address table: 8.8.8.8 is in the US,
/// 9.9.9.9 in Germany, everything else unresolvable.
struct TableGeoProvider;

#[async_trait]
impl GeoProvider for TableGeoProvider {
    async fn lookup(&self, ip: &str) -> Result<Location> {
        let (code, name) = match ip {
            "8.8.8.8" => ("US", "United States"),
            "9.9.9.9" => ("DE", "Germany"),
            _ => anyhow::bail!("no record for {ip}"),
        };
        Ok(Location {
            ip: ip.to_string(),
            country_code: code.to_string(),
            country_name: name.to_string(),
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "table"
    }
}

struct TestStack {
    router: Router,
    storage: Arc<dyn Storage>,
    volatile: Arc<MemoryStore>,
}

async fn build_stack() -> TestStack {
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new("sqlite::memory:", 1).await.unwrap());
    storage.init().await.unwrap();

    let volatile = Arc::new(MemoryStore::new());
    let geo = Arc::new(GeoResolver::with_provider(Arc::new(TableGeoProvider), 64));

    let volatile_dyn: Arc<dyn VolatileStore> = volatile.clone();
    let router = shunt::dispatch::create_dispatch_router(
        Arc::clone(&storage),
        volatile_dyn,
        geo,
        RateLimitConfig::default(),
    )
    .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 41000))));

    TestStack {
        router,
        storage,
        volatile,
    }
}

fn link(link_id: &str, total_cap: i64, backup_url: Option<&str>) -> Link {
    Link {
        id: 0,
        link_id: link_id.to_string(),
        business_unit: "bu01".to_string(),
        network: "search".to_string(),
        total_cap,
        current_hits: 0,
        backup_url: backup_url.map(str::to_string),
        is_active: true,
        targets: Vec::new(),
    }
}

fn target(url: &str, weight: i64, countries: &str) -> Target {
    Target {
        id: 0,
        link_id: 0,
        url: url.to_string(),
        weight,
        cap: 0,
        current_hits: 0,
        countries: countries.to_string(),
        param_mapping: String::new(),
        static_params: String::new(),
        is_active: true,
    }
}

async fn seed(storage: &Arc<dyn Storage>, link: Link, targets: Vec<Target>) -> i64 {
    let link_pk = storage.create_link(&link).await.unwrap();
    for mut t in targets {
        t.link_id = link_pk;
        storage.create_target(&t).await.unwrap();
    }
    link_pk
}

async fn get(router: &Router, uri: &str, client_ip: &str) -> axum::response::Response {
    let request = Request::builder()
        .uri(uri)
        .header("x-real-ip", client_ip)
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get("location")
        .expect("expected a Location header")
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_check_responds() {
    let stack = build_stack().await;
    let response = stack
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn happy_path_rewrites_parameters() {
    let stack = build_stack().await;
    let mut t = target("https://t1.example/landing", 100, r#"["US","CA"]"#);
    t.param_mapping = r#"{"kw":"q"}"#.to_string();
    t.static_params = r#"{"ref":"test"}"#.to_string();
    seed(&stack.storage, link("abc123", 0, None), vec![t]).await;

    let response = get(&stack.router, "/v1/bu01/abc123?kw=golang&extra=v", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let destination = location(&response);
    assert!(destination.starts_with("https://t1.example/landing?"));
    assert!(destination.contains("q=golang"));
    assert!(destination.contains("extra=v"));
    assert!(destination.contains("ref=test"));
    assert!(!destination.contains("kw="));
}

#[tokio::test]
async fn unknown_link_returns_404() {
    let stack = build_stack().await;
    let response = get(&stack.router, "/v1/bu01/nosuch", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn inactive_link_reads_as_missing() {
    let stack = build_stack().await;
    let mut l = link("abc123", 0, None);
    l.is_active = false;
    seed(&stack.storage, l, vec![target("https://t1.example/", 10, "")]).await;

    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn business_unit_mismatch_returns_404() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    let response = get(&stack.router, "/v1/bu99/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn country_filter_falls_back_to_backup_url() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 0, Some("https://backup.example/")),
        vec![target("https://us-only.example/", 10, r#"["US"]"#)],
    )
    .await;

    // 9.9.9.9 resolves to DE, which the only target does not allow.
    let response = get(&stack.router, "/v1/bu01/abc123", "9.9.9.9").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://backup.example/");
}

#[tokio::test]
async fn country_filter_without_backup_returns_503() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://us-only.example/", 10, r#"["US"]"#)],
    )
    .await;

    let response = get(&stack.router, "/v1/bu01/abc123", "9.9.9.9").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn unresolvable_country_still_passes_unrestricted_targets() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://open.example/", 10, "[]")],
    )
    .await;

    // 4.4.4.4 has no geo record; the country degrades to UNKNOWN.
    let response = get(&stack.router, "/v1/bu01/abc123", "4.4.4.4").await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn per_ip_link_window_trips_on_the_eleventh_request() {
    let stack = build_stack().await;
    let link_pk = seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    for _ in 0..10 {
        let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_string(response).await;
    assert!(body.contains("link access limit exceeded"), "body: {body}");

    // Only the ten dispatched visits may leave log rows.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let logs = stack
        .storage
        .access_logs_for_link(link_pk, 100)
        .await
        .unwrap();
    assert_eq!(logs.len(), 10);
}

#[tokio::test]
async fn other_ips_are_unaffected_by_a_tripped_window() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    for _ in 0..11 {
        get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    }
    let response = get(&stack.router, "/v1/bu01/abc123", "9.9.9.9").await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn global_cap_redirects_to_backup_once_exhausted() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 5, Some("https://backup.example/")),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    // Below the cap the pool serves normally.
    for _ in 0..4 {
        stack.volatile.incr(&keys::global_cap("abc123")).await.unwrap();
    }
    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response).starts_with("https://t1.example/"));

    // Push the counter to the cap; the next request falls back.
    stack.volatile.incr(&keys::global_cap("abc123")).await.unwrap();
    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://backup.example/");
}

#[tokio::test]
async fn global_cap_without_backup_returns_429() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 2, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    for _ in 0..2 {
        stack.volatile.incr(&keys::global_cap("abc123")).await.unwrap();
    }
    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn zero_cap_never_trips() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    for _ in 0..50 {
        stack.volatile.incr(&keys::global_cap("abc123")).await.unwrap();
    }
    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn blocked_ip_is_rejected_before_any_accounting() {
    let stack = build_stack().await;
    let link_pk = seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    let limiter: RateLimiter = RateLimiter::new(stack.volatile.clone());
    limiter
        .block_ip("8.8.8.8", "abuse report", Duration::from_secs(3600))
        .await
        .unwrap();

    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_string(response).await;
    assert!(body.contains("IP blocked"), "body: {body}");
    assert!(body.contains("abuse report"), "body: {body}");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let logs = stack
        .storage
        .access_logs_for_link(link_pk, 100)
        .await
        .unwrap();
    assert!(logs.is_empty());
    let link = stack.storage.get_link("abc123").await.unwrap().unwrap();
    assert_eq!(link.current_hits, 0);

    // Unblocking restores service.
    limiter.unblock_ip("8.8.8.8").await.unwrap();
    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn dispatch_accounts_hits_and_access_logs() {
    let stack = build_stack().await;
    let link_pk = seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    let request = Request::builder()
        .uri("/v1/bu01/abc123")
        .header("x-real-ip", "8.8.8.8")
        .header("user-agent", "integration-test")
        .header("referer", "https://ref.example/")
        .body(Body::empty())
        .unwrap();
    let response = stack.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let link = stack.storage.get_link("abc123").await.unwrap().unwrap();
    assert_eq!(link.current_hits, 1);
    assert_eq!(link.targets[0].current_hits, 1);

    let logs = stack
        .storage
        .access_logs_for_link(link_pk, 10)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].ip, "8.8.8.8");
    assert_eq!(logs[0].country, "US");
    assert_eq!(logs[0].user_agent, "integration-test");
    assert_eq!(logs[0].referer, "https://ref.example/");

    // The cap counter moved too.
    let raw = stack
        .volatile
        .get(&keys::global_cap("abc123"))
        .await
        .unwrap();
    assert_eq!(raw.as_deref(), Some("1"));
}

#[tokio::test]
async fn capped_targets_are_excluded_from_the_pool() {
    let stack = build_stack().await;
    let mut full = target("https://full.example/", 100, "");
    full.cap = 3;
    full.current_hits = 3;
    seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![full, target("https://open.example/", 1, "")],
    )
    .await;

    for _ in 0..5 {
        let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).starts_with("https://open.example/"));
    }
}

#[tokio::test]
async fn snapshot_cache_serves_after_the_first_resolve() {
    let stack = build_stack().await;
    seed(
        &stack.storage,
        link("abc123", 0, None),
        vec![target("https://t1.example/", 10, "")],
    )
    .await;

    let response = get(&stack.router, "/v1/bu01/abc123", "8.8.8.8").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let cached = stack
        .volatile
        .get(&keys::link_snapshot("abc123"))
        .await
        .unwrap();
    let snapshot: Link = serde_json::from_str(&cached.unwrap()).unwrap();
    assert_eq!(snapshot.link_id, "abc123");
    assert_eq!(snapshot.targets.len(), 1);
}
