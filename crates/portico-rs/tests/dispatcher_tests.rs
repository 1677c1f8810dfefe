//! End-to-end dispatcher tests against live local backends.

use actix_web::body::to_bytes;
use actix_web::error::ResponseError as _;
use actix_web::http::StatusCode;
use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use actix_web::{web, App, HttpResponse, HttpServer};
use portico_rs::models::config::{CircuitBreakerSettings, GatewayConfig, RouteConfig};
use portico_rs::models::tenant::TenantOverlay;
use portico_rs::services::dispatcher::RequestDispatcher;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Spawns a local backend answering every path with a fixed status/body.
/// Returns its base URL and a hit counter.
async fn spawn_backend(status: u16, body: &'static str) -> (String, Arc<AtomicUsize>) {
    spawn_backend_with_delay(status, body, 0).await
}

async fn spawn_backend_with_delay(
    status: u16,
    body: &'static str,
    delay_ms: u64,
) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let server = HttpServer::new(move || {
        let counter = Arc::clone(&counter);
        App::new().default_service(web::to(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
                HttpResponse::build(StatusCode::from_u16(status).unwrap()).body(body)
            }
        }))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    (format!("http://{}", addr), hits)
}

fn single_route_config(url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.backend_services.insert("api".into(), url.into());
    config.routes.insert("/api/*".into(), "api".into());
    config
}

async fn body_of(resp: HttpResponse) -> String {
    let bytes = to_bytes(resp.into_body()).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[actix_web::test]
async fn basic_proxy_forwards_and_returns_backend_body() {
    let (url, hits) = spawn_backend(200, "ok").await;
    let dispatcher = RequestDispatcher::new(single_route_config(&url)).unwrap();

    let req = TestRequest::get().uri("/api/ping").to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_of(resp).await, "ok");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn tenant_gate_rejects_missing_header_without_outbound_call() {
    let (url, hits) = spawn_backend(200, "ok").await;
    let mut config = single_route_config(&url);
    config.require_tenant_id = true;

    let dispatcher = RequestDispatcher::new(config).unwrap();
    let req = TestRequest::get().uri("/api/x").to_http_request();
    let err = dispatcher
        .handle_request(req, Bytes::new())
        .await
        .unwrap_err();

    assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // With the header present the request goes through.
    let req = TestRequest::get()
        .uri("/api/x")
        .insert_header(("X-Tenant-ID", "t-a"))
        .to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn disabled_flag_routes_to_alternative_backend() {
    let (v2_url, v2_hits) = spawn_backend(200, "v2").await;
    let (v1_url, v1_hits) = spawn_backend(200, "v1").await;

    let mut config = GatewayConfig::default();
    config.backend_services.insert("v2".into(), v2_url);
    config.backend_services.insert("v1".into(), v1_url);
    config.routes.insert("/api/new".into(), "v2".into());
    config.route_configs.insert(
        "/api/new".into(),
        RouteConfig {
            feature_flag_id: Some("enable-v2".into()),
            alternative_backend: Some("v1".into()),
            ..RouteConfig::default()
        },
    );
    config.feature_flags.enabled = true;
    config.feature_flags.flags.insert("enable-v2".into(), false);

    let dispatcher = RequestDispatcher::new(config).unwrap();
    let req = TestRequest::get().uri("/api/new").to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_of(resp).await, "v1");
    assert_eq!(v1_hits.load(Ordering::SeqCst), 1);
    assert_eq!(v2_hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn backend_level_flag_substitutes_backend() {
    let (new_url, new_hits) = spawn_backend(200, "new").await;
    let (legacy_url, legacy_hits) = spawn_backend(200, "legacy").await;

    let mut config = GatewayConfig::default();
    config.backend_services.insert("new".into(), new_url);
    config.backend_services.insert("legacy".into(), legacy_url);
    config.routes.insert("/svc/*".into(), "new".into());
    config.backend_configs.insert(
        "new".into(),
        portico_rs::models::config::BackendConfig {
            feature_flag_id: Some("use-new".into()),
            alternative_backend: Some("legacy".into()),
            ..portico_rs::models::config::BackendConfig::default()
        },
    );
    config.feature_flags.enabled = true;
    config.feature_flags.flags.insert("use-new".into(), false);

    let dispatcher = RequestDispatcher::new(config).unwrap();
    let req = TestRequest::get().uri("/svc/x").to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();

    assert_eq!(body_of(resp).await, "legacy");
    assert_eq!(legacy_hits.load(Ordering::SeqCst), 1);
    assert_eq!(new_hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn round_robin_distributes_evenly() {
    let (a_url, a_hits) = spawn_backend(200, "a").await;
    let (b_url, b_hits) = spawn_backend(200, "b").await;

    let mut config = GatewayConfig::default();
    config.backend_services.insert("a".into(), a_url);
    config.backend_services.insert("b".into(), b_url);
    config.routes.insert("/lb/*".into(), "a, b".into());

    let dispatcher = RequestDispatcher::new(config).unwrap();
    for _ in 0..10 {
        let req = TestRequest::get().uri("/lb/x").to_http_request();
        let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    assert_eq!(a_hits.load(Ordering::SeqCst), 5);
    assert_eq!(b_hits.load(Ordering::SeqCst), 5);
}

#[actix_web::test]
async fn circuit_opens_after_threshold_and_short_circuits() {
    let (url, hits) = spawn_backend(500, "boom").await;

    let mut config = single_route_config(&url);
    config.circuit_breaker = CircuitBreakerSettings {
        failure_threshold: 2,
        open_timeout: 60_000,
        ..CircuitBreakerSettings::default()
    };

    let dispatcher = RequestDispatcher::new(config).unwrap();

    // Two upstream 500s are observed verbatim and counted as failures.
    for _ in 0..2 {
        let req = TestRequest::get().uri("/api/x").to_http_request();
        let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // Third request short-circuits: 503, no outbound call.
    let req = TestRequest::get().uri("/api/x").to_http_request();
    let err = dispatcher
        .handle_request(req, Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.as_response_error().status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[actix_web::test]
async fn unmatched_path_is_404_and_default_backend_serves_catch_all() {
    let (url, hits) = spawn_backend(200, "default").await;

    let mut config = GatewayConfig::default();
    config.backend_services.insert("fallback".into(), url);

    // Without a default backend: 404.
    let dispatcher = RequestDispatcher::new(config.clone()).unwrap();
    let req = TestRequest::get().uri("/nowhere").to_http_request();
    let err = dispatcher
        .handle_request(req, Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.as_response_error().status_code(), StatusCode::NOT_FOUND);

    // With one: the catch-all proxies.
    config.default_backend = Some("fallback".into());
    let dispatcher = RequestDispatcher::new(config).unwrap();
    let req = TestRequest::get().uri("/nowhere").to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    assert_eq!(body_of(resp).await, "default");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn reserved_paths_are_never_proxied_through_default_backend() {
    let (url, hits) = spawn_backend(200, "default").await;

    let mut config = GatewayConfig::default();
    config.backend_services.insert("fallback".into(), url);
    config.default_backend = Some("fallback".into());

    let dispatcher = RequestDispatcher::new(config).unwrap();
    for path in ["/health", "/metrics", "/debug/info"] {
        let req = TestRequest::get().uri(path).to_http_request();
        let err = dispatcher
            .handle_request(req, Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.as_response_error().status_code(), StatusCode::NOT_FOUND);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[actix_web::test]
async fn tenant_url_overrides_are_isolated() {
    let (a_url, a_hits) = spawn_backend(200, "tenant-a").await;
    let (b_url, b_hits) = spawn_backend(200, "tenant-b").await;

    let mut config = GatewayConfig::default();
    config.backend_services.insert("svc".into(), String::new());
    config.default_backend = Some("svc".into());
    config.tenants.insert(
        "t-a".into(),
        TenantOverlay {
            backend_services: HashMap::from([("svc".to_string(), a_url)]),
            ..TenantOverlay::default()
        },
    );
    config.tenants.insert(
        "t-b".into(),
        TenantOverlay {
            backend_services: HashMap::from([("svc".to_string(), b_url)]),
            ..TenantOverlay::default()
        },
    );

    let dispatcher = RequestDispatcher::new(config).unwrap();

    let req = TestRequest::get()
        .uri("/")
        .insert_header(("X-Tenant-ID", "t-a"))
        .to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    assert_eq!(body_of(resp).await, "tenant-a");

    let req = TestRequest::get()
        .uri("/")
        .insert_header(("X-Tenant-ID", "t-b"))
        .to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    assert_eq!(body_of(resp).await, "tenant-b");

    assert_eq!(a_hits.load(Ordering::SeqCst), 1);
    assert_eq!(b_hits.load(Ordering::SeqCst), 1);

    // Without a tenant the backend has no URL at all.
    let req = TestRequest::get().uri("/").to_http_request();
    let err = dispatcher
        .handle_request(req, Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err.as_response_error().status_code(), StatusCode::BAD_GATEWAY);
}

#[actix_web::test]
async fn per_route_timeout_maps_to_gateway_timeout() {
    let (url, _hits) = spawn_backend_with_delay(200, "slow", 2_000).await;

    let mut config = single_route_config(&url);
    config.route_configs.insert(
        "/api/*".into(),
        RouteConfig {
            timeout: Some(1),
            ..RouteConfig::default()
        },
    );

    let dispatcher = RequestDispatcher::new(config).unwrap();
    let req = TestRequest::get().uri("/api/slow").to_http_request();
    let err = dispatcher
        .handle_request(req, Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.as_response_error().status_code(),
        StatusCode::GATEWAY_TIMEOUT
    );
}

#[actix_web::test]
async fn registered_tenant_extends_the_module() {
    let (url, hits) = spawn_backend(200, "late").await;

    let mut config = GatewayConfig::default();
    config
        .backend_services
        .insert("api".into(), "http://127.0.0.1:1".into());
    config.routes.insert("/api/*".into(), "api".into());

    let mut dispatcher = RequestDispatcher::new(config).unwrap();
    dispatcher
        .register_tenant(
            "t-late",
            TenantOverlay {
                backend_services: HashMap::from([("late-svc".to_string(), url)]),
                routes: HashMap::from([("/late/*".to_string(), "late-svc".to_string())]),
                ..TenantOverlay::default()
            },
        )
        .unwrap();

    let req = TestRequest::get()
        .uri("/late/x")
        .insert_header(("X-Tenant-ID", "t-late"))
        .to_http_request();
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    assert_eq!(body_of(resp).await, "late");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // An overlay referencing an unknown backend is rejected.
    let err = dispatcher.register_tenant(
        "t-bad",
        TenantOverlay {
            routes: HashMap::from([("/x".to_string(), "ghost".to_string())]),
            ..TenantOverlay::default()
        },
    );
    assert!(err.is_err());
}
