use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use axum::{routing::get, Router};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use markdown_blog::{
    config::SiteConfig,
    hot_reload::{rebuild, start_content_watcher, ws_handler},
};

#[tokio::main]
async fn main() -> ExitCode {
    // logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match SiteConfig::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("RUST_ENV is set to development: {}", config.is_development);

    let built = rebuild(config.clone()).await;
    if !config.is_development {
        return if built { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }

    // Hot-reload setup
    let (tx, _rx) = broadcast::channel(1);
    start_content_watcher(tx.clone(), config.clone());

    let output = &config.output_dir;
    let site = ServeDir::new(output).not_found_service(ServeFile::new(output.join("404.html")));
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .fallback_service(site)
        .with_state(tx);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!(%addr, "previewing {}", output.display());
    if let Err(e) = axum::serve(listener, app).await {
        error!("Preview server stopped: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
