use crate::controller::{
    health_check_controller, heartbeat_controller, stream_controller, subscriber_controller,
};
use crate::AppState;
use axum::{routing::get, Router};
use tower_http::services::ServeDir;

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path must be listed here. The documented paths
// show the default endpoint locations; deployments may move them with the
// corresponding Config flags.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Beacon Event Broker API"
        ),
        paths(
            stream_controller::stream,
            heartbeat_controller::heartbeat,
            subscriber_controller::index,
            health_check_controller::health_check,
        ),
        tags(
            (name = "beacon", description = "Server-push event broker over SSE")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(stream_routes(app_state.clone()))
        .merge(heartbeat_routes(app_state.clone()))
        .merge(subscriber_routes(app_state))
        .merge(health_routes())
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/rapidoc"))
        .fallback_service(static_routes())
}

fn stream_routes(app_state: AppState) -> Router {
    let path = app_state.config.stream_path.clone();
    Router::new()
        .route(&path, get(stream_controller::stream))
        .with_state(app_state)
}

fn heartbeat_routes(app_state: AppState) -> Router {
    let path = app_state.config.heartbeat_path.clone();
    Router::new()
        .route(
            &path,
            get(heartbeat_controller::heartbeat).post(heartbeat_controller::heartbeat),
        )
        .with_state(app_state)
}

fn subscriber_routes(app_state: AppState) -> Router {
    let path = app_state.config.subscriptions_path.clone();
    Router::new()
        .route(&path, get(subscriber_controller::index))
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

// This will serve static files that we can use as a "fallback" for when the server panics
pub fn static_routes() -> Router {
    Router::new().nest_service("/", ServeDir::new("./"))
}
