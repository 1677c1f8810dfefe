//! Portico gateway server.
//!
//! Loads and validates the configuration, assembles the gateway module,
//! and runs the actix-web server with the reserved endpoints registered
//! ahead of the proxy catch-all. SIGINT triggers a graceful shutdown:
//! in-flight requests drain, the health checker stops, and the cache is
//! cleared before the stop events are emitted.

use portico_rs::config::settings::load_settings;
use portico_rs::config::validation::ConfigValidator;
use portico_rs::logs::logger::configure_logger;
use portico_rs::routes::{debug, health, metrics, proxy};
use portico_rs::services::dispatcher::RequestDispatcher;

use actix_web::{middleware::Logger, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config = match load_settings() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    let validation = ConfigValidator::validate(&config);
    if !validation.is_valid() {
        error!("configuration validation failed:");
        for err in &validation.errors {
            error!("  - {}", err);
        }
        std::process::exit(1);
    }

    let dispatcher = match RequestDispatcher::new(config) {
        Ok(dispatcher) => Arc::new(dispatcher),
        Err(e) => {
            error!("failed to initialize gateway module: {}", e);
            std::process::exit(1);
        }
    };
    dispatcher.start();

    let host = std::env::var("PORTICO_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORTICO_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);
    info!("starting server on {}:{}", host, port);

    let app_dispatcher = Arc::clone(&dispatcher);
    let server = HttpServer::new(move || {
        let dispatcher = Arc::clone(&app_dispatcher);
        App::new()
            .app_data(actix_web::web::Data::new(Arc::clone(&dispatcher)))
            .wrap(Logger::new(r#"%a "%r" %s %b "%{User-Agent}i" %T"#))
            .wrap(actix_web::middleware::Compress::default())
            .configure(health::configure_health)
            .configure(|cfg| metrics::configure_metrics(cfg, &dispatcher))
            .configure(|cfg| debug::configure_debug(cfg, &dispatcher))
            .configure(|cfg| proxy::configure_proxy(cfg, Arc::clone(&dispatcher)))
    })
    .bind((host.as_str(), port))?
    .run();

    let handle = server.handle();
    let serve = tokio::spawn(server);

    tokio::select! {
        result = serve => {
            match result {
                Ok(Ok(())) => info!("server stopped"),
                Ok(Err(e)) => error!("server error: {}", e),
                Err(e) => error!("server task failed: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, draining");
            handle.stop(true).await;
        }
    }

    dispatcher.shutdown().await;
    Ok(())
}
