pub mod assemble;
pub mod handlers;
pub mod types;

use crate::relay::ImageRelay;
use crate::scheduler::{BatchConfig, BatchScheduler};
use crate::upstream::GradioClient;
use crate::{Result, config::Config};
use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use handlers::AppState;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/v1/models", get(handlers::models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/images/generations", post(handlers::image_generations))
        .route("/proxy/image", get(handlers::proxy_image))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn build_state(config: Config) -> AppState {
    let backend = Arc::new(GradioClient::new(config.upstream.clone()));
    let scheduler = BatchScheduler::new(
        backend,
        BatchConfig {
            max_batch: config.generation.max_batch,
            delay_min_ms: config.generation.delay_min_ms,
            delay_max_ms: config.generation.delay_max_ms,
        },
    );
    let relay = ImageRelay::new(config.upstream.clone());

    AppState {
        config: Arc::new(config),
        scheduler: Arc::new(scheduler),
        relay: Arc::new(relay),
    }
}

pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let app = router(build_state(config));

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
