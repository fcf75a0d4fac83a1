use axum::http::{HeaderValue, Method};
use log::*;
use service::config::Config;
use service::logging::Logger;
use service::AppState;
use sse::Broker;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::new();
    Logger::init_logger(&config);

    info!("Starting up beacon in {} mode", config.runtime_env);

    let broker = Arc::new(Broker::new(config.broker_options()));
    let app_state = AppState::new(config.clone(), &broker);

    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true);

    let router = web::define_routes(app_state).layer(cors);

    let host = config.interface.as_deref().unwrap_or("127.0.0.1");
    let listen_addr = format!("{}:{}", host, config.port);
    info!(
        "Listening on {listen_addr} (stream: {}, heartbeat: {}, subscribers: {})",
        config.stream_path, config.heartbeat_path, config.subscriptions_path
    );

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
