use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use service::AppState;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub(crate) struct SubscriberParams {
    /// Restrict the listing to one channel.
    channel: Option<String>,
}

/// GET list the metadata of every live subscription
#[utoipa::path(
    get,
    path = "/event-subscribers",
    params(SubscriberParams),
    responses(
        (status = 200, description = "One metadata map per live subscription")
    )
)]
pub(crate) async fn index(
    Query(params): Query<SubscriberParams>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    Json(app_state.broker.subscriptions(params.channel.as_deref()))
}
