//! Path and header rewrite pipeline tests against an echo backend.

use actix_web::body::to_bytes;
use actix_web::http::StatusCode;
use actix_web::test::TestRequest;
use actix_web::web::Bytes;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use portico_rs::models::config::{
    BackendConfig, GatewayConfig, HeaderRewrite, HostnameHandling, PathRewrite,
};
use portico_rs::services::dispatcher::RequestDispatcher;
use std::collections::HashMap;

/// Echoes `path?query|x-added|x-secret|host` so tests can observe exactly
/// what reached the backend.
async fn spawn_echo_backend() -> String {
    let server = HttpServer::new(|| {
        App::new().default_service(web::to(|req: HttpRequest| async move {
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-")
                    .to_string()
            };
            let target = if req.query_string().is_empty() {
                req.path().to_string()
            } else {
                format!("{}?{}", req.path(), req.query_string())
            };
            HttpResponse::Ok().body(format!(
                "{}|{}|{}|{}",
                target,
                header("x-added"),
                header("x-secret"),
                header("host"),
            ))
        }))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", addr)
}

fn config_with(url: &str, backend: BackendConfig) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.backend_services.insert("api".into(), url.into());
    config.backend_configs.insert("api".into(), backend);
    config.routes.insert("/api/*".into(), "api".into());
    config
}

async fn echo_of(dispatcher: &RequestDispatcher, req: actix_web::HttpRequest) -> String {
    let resp = dispatcher.handle_request(req, Bytes::new()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body()).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[actix_web::test]
async fn strip_then_prepend_rewrites_the_path() {
    let url = spawn_echo_backend().await;
    let dispatcher = RequestDispatcher::new(config_with(
        &url,
        BackendConfig {
            path_rewriting: Some(PathRewrite {
                strip_base_path: Some("/api".into()),
                base_path_rewrite: Some("/v2".into()),
            }),
            ..BackendConfig::default()
        },
    ))
    .unwrap();

    let req = TestRequest::get().uri("/api/users/7").to_http_request();
    let echo = echo_of(&dispatcher, req).await;
    assert!(echo.starts_with("/v2/users/7|"), "echo: {}", echo);
}

#[actix_web::test]
async fn endpoint_override_beats_the_backend_rule() {
    let url = spawn_echo_backend().await;
    let mut endpoints = HashMap::new();
    endpoints.insert(
        "/api/reports/*".to_string(),
        PathRewrite {
            strip_base_path: Some("/api/reports".into()),
            base_path_rewrite: Some("/internal/reporting".into()),
        },
    );
    let dispatcher = RequestDispatcher::new(config_with(
        &url,
        BackendConfig {
            path_rewriting: Some(PathRewrite {
                strip_base_path: Some("/api".into()),
                base_path_rewrite: None,
            }),
            endpoints,
            ..BackendConfig::default()
        },
    ))
    .unwrap();

    let req = TestRequest::get().uri("/api/reports/q1").to_http_request();
    let echo = echo_of(&dispatcher, req).await;
    assert!(echo.starts_with("/internal/reporting/q1|"), "echo: {}", echo);

    let req = TestRequest::get().uri("/api/users").to_http_request();
    let echo = echo_of(&dispatcher, req).await;
    assert!(echo.starts_with("/users|"), "echo: {}", echo);
}

#[actix_web::test]
async fn query_string_is_forwarded_untouched() {
    let url = spawn_echo_backend().await;
    let dispatcher = RequestDispatcher::new(config_with(
        &url,
        BackendConfig {
            path_rewriting: Some(PathRewrite {
                strip_base_path: Some("/api".into()),
                base_path_rewrite: None,
            }),
            ..BackendConfig::default()
        },
    ))
    .unwrap();

    let req = TestRequest::get()
        .uri("/api/search?q=abc&page=2")
        .to_http_request();
    let echo = echo_of(&dispatcher, req).await;
    assert!(echo.starts_with("/search?q=abc&page=2|"), "echo: {}", echo);
}

#[actix_web::test]
async fn headers_are_removed_then_set() {
    let url = spawn_echo_backend().await;
    let dispatcher = RequestDispatcher::new(config_with(
        &url,
        BackendConfig {
            header_rewriting: Some(HeaderRewrite {
                hostname_handling: HostnameHandling::UseBackend,
                custom_hostname: None,
                set_headers: HashMap::from([("X-Added".to_string(), "gateway".to_string())]),
                remove_headers: vec!["X-Secret".to_string()],
            }),
            ..BackendConfig::default()
        },
    ))
    .unwrap();

    let req = TestRequest::get()
        .uri("/api/x")
        .insert_header(("X-Secret", "do-not-forward"))
        .to_http_request();
    let echo = echo_of(&dispatcher, req).await;

    let fields: Vec<&str> = echo.split('|').collect();
    assert_eq!(fields[1], "gateway");
    assert_eq!(fields[2], "-");
}

#[actix_web::test]
async fn custom_hostname_is_sent_verbatim() {
    let url = spawn_echo_backend().await;
    let dispatcher = RequestDispatcher::new(config_with(
        &url,
        BackendConfig {
            header_rewriting: Some(HeaderRewrite {
                hostname_handling: HostnameHandling::UseCustom,
                custom_hostname: Some("internal.example".into()),
                set_headers: HashMap::new(),
                remove_headers: vec![],
            }),
            ..BackendConfig::default()
        },
    ))
    .unwrap();

    let req = TestRequest::get().uri("/api/x").to_http_request();
    let echo = echo_of(&dispatcher, req).await;

    let fields: Vec<&str> = echo.split('|').collect();
    assert_eq!(fields[3], "internal.example");
}
