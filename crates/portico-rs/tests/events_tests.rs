//! Event taxonomy and ordering tests.

use actix_web::http::StatusCode;
use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use actix_web::{web, App, HttpResponse, HttpServer};
use portico_rs::models::config::{CircuitBreakerSettings, GatewayConfig};
use portico_rs::models::event::GatewayEvent;
use portico_rs::services::dispatcher::RequestDispatcher;
use portico_rs::services::events::EventObserver;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    names: Mutex<Vec<String>>,
}

impl EventObserver for Recorder {
    fn on_event(&self, event: &GatewayEvent) {
        self.names.lock().unwrap().push(event.name.clone());
    }
}

impl Recorder {
    fn names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names().iter().position(|n| n == name)
    }

    fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| *n == name).count()
    }
}

async fn spawn_backend(status: u16, body: &'static str) -> String {
    let server = HttpServer::new(move || {
        App::new().default_service(web::to(move || async move {
            HttpResponse::build(StatusCode::from_u16(status).unwrap()).body(body)
        }))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", addr)
}

fn with_recorder(config: GatewayConfig) -> (RequestDispatcher, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let dispatcher =
        RequestDispatcher::with_components(config, vec![recorder.clone()], Vec::new()).unwrap();
    (dispatcher, recorder)
}

#[actix_web::test]
async fn received_precedes_proxied_for_a_successful_request() {
    let url = spawn_backend(200, "ok").await;
    let mut config = GatewayConfig::default();
    config.backend_services.insert("api".into(), url);
    config.routes.insert("/api/*".into(), "api".into());

    let (dispatcher, recorder) = with_recorder(config);
    let req = TestRequest::get().uri("/api/ping").to_http_request();
    dispatcher.handle_request(req, Bytes::new()).await.unwrap();

    let received = recorder.position("request.received").unwrap();
    let proxied = recorder.position("request.proxied").unwrap();
    assert!(received < proxied);
    assert_eq!(recorder.count("request.failed"), 0);
}

#[actix_web::test]
async fn tenant_gate_emits_failed_and_never_proxied() {
    let url = spawn_backend(200, "ok").await;
    let mut config = GatewayConfig::default();
    config.backend_services.insert("api".into(), url);
    config.routes.insert("/api/*".into(), "api".into());
    config.require_tenant_id = true;

    let (dispatcher, recorder) = with_recorder(config);
    let req = TestRequest::get().uri("/api/ping").to_http_request();
    let _ = dispatcher.handle_request(req, Bytes::new()).await;

    let received = recorder.position("request.received").unwrap();
    let failed = recorder.position("request.failed").unwrap();
    assert!(received < failed);
    assert_eq!(recorder.count("request.proxied"), 0);
}

#[actix_web::test]
async fn load_balance_decision_lands_between_received_and_proxied() {
    let a = spawn_backend(200, "a").await;
    let b = spawn_backend(200, "b").await;
    let mut config = GatewayConfig::default();
    config.backend_services.insert("a".into(), a);
    config.backend_services.insert("b".into(), b);
    config.routes.insert("/lb/*".into(), "a,b".into());

    let (dispatcher, recorder) = with_recorder(config);
    let req = TestRequest::get().uri("/lb/x").to_http_request();
    dispatcher.handle_request(req, Bytes::new()).await.unwrap();

    let received = recorder.position("request.received").unwrap();
    let decision = recorder.position("loadbalance.decision").unwrap();
    let proxied = recorder.position("request.proxied").unwrap();
    assert!(received < decision && decision < proxied);
}

#[actix_web::test]
async fn single_id_group_emits_no_load_balance_events() {
    let url = spawn_backend(200, "ok").await;
    let mut config = GatewayConfig::default();
    config.backend_services.insert("api".into(), url);
    // Comma-delimited with one id behaves like a plain single route.
    config.routes.insert("/api/*".into(), "api,".into());

    let (dispatcher, recorder) = with_recorder(config);
    let req = TestRequest::get().uri("/api/ping").to_http_request();
    dispatcher.handle_request(req, Bytes::new()).await.unwrap();

    assert_eq!(recorder.count("loadbalance.decision"), 0);
    assert_eq!(recorder.count("loadbalance.roundrobin"), 0);
}

#[actix_web::test]
async fn round_robin_rotation_is_emitted_on_wrap() {
    let a = spawn_backend(200, "a").await;
    let b = spawn_backend(200, "b").await;
    let mut config = GatewayConfig::default();
    config.backend_services.insert("a".into(), a);
    config.backend_services.insert("b".into(), b);
    config.routes.insert("/lb/*".into(), "a,b".into());

    let (dispatcher, recorder) = with_recorder(config);
    for _ in 0..3 {
        let req = TestRequest::get().uri("/lb/x").to_http_request();
        dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    }

    // Selections land on index 0, 1, then wrap to 0: one rotation event.
    assert_eq!(recorder.count("loadbalance.decision"), 3);
    assert_eq!(recorder.count("loadbalance.roundrobin"), 1);
}

#[actix_web::test]
async fn circuit_transitions_are_emitted_in_order() {
    let url = spawn_backend(500, "boom").await;
    let mut config = GatewayConfig::default();
    config.backend_services.insert("api".into(), url);
    config.routes.insert("/api/*".into(), "api".into());
    config.circuit_breaker = CircuitBreakerSettings {
        failure_threshold: 1,
        open_timeout: 100,
        success_threshold: 1,
        ..CircuitBreakerSettings::default()
    };

    let (dispatcher, recorder) = with_recorder(config);

    // Failure opens the circuit.
    let req = TestRequest::get().uri("/api/x").to_http_request();
    dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    assert_eq!(recorder.count("circuitbreaker.open"), 1);

    // After the open timeout the next request probes (and fails again).
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let req = TestRequest::get().uri("/api/x").to_http_request();
    let _ = dispatcher.handle_request(req, Bytes::new()).await;

    let open = recorder.position("circuitbreaker.open").unwrap();
    let half_open = recorder.position("circuitbreaker.halfopen").unwrap();
    assert!(open < half_open);
    // The failed probe reopened the circuit.
    assert_eq!(recorder.count("circuitbreaker.open"), 2);
}

#[actix_web::test]
async fn lifecycle_events_wrap_the_module() {
    let url = spawn_backend(200, "ok").await;
    let mut config = GatewayConfig::default();
    config.backend_services.insert("api".into(), url);
    config.routes.insert("/api/*".into(), "api".into());

    let (dispatcher, recorder) = with_recorder(config);
    dispatcher.start();
    dispatcher.shutdown().await;

    let started = recorder.position("module.started").unwrap();
    let added = recorder.position("backend.added").unwrap();
    let proxy_started = recorder.position("proxy.started").unwrap();
    let proxy_stopped = recorder.position("proxy.stopped").unwrap();
    let stopped = recorder.position("module.stopped").unwrap();

    assert!(started < added);
    assert!(added < proxy_started);
    assert!(proxy_started < proxy_stopped);
    assert!(proxy_stopped < stopped);
}
