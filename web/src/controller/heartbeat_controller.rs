use crate::error::{Error, Result, WebErrorKind};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use log::*;
use serde::Deserialize;
use service::AppState;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub(crate) struct HeartbeatParams {
    /// Id of the subscription reporting in.
    from: String,
}

/// GET/POST mark a subscription alive
#[utoipa::path(
    get,
    path = "/event-heartbeat",
    params(HeartbeatParams),
    responses(
        (status = 200, description = "Heartbeat recorded; unknown subscription ids are ignored"),
        (status = 400, description = "Bad Request")
    )
)]
pub(crate) async fn heartbeat(
    Query(params): Query<HeartbeatParams>,
    State(app_state): State<AppState>,
) -> Result<StatusCode> {
    if params.from.is_empty() {
        return Err(Error::Web(WebErrorKind::Input));
    }
    trace!("Heartbeat from subscription {}", params.from);
    app_state.broker.pulse(&params.from);
    Ok(StatusCode::OK)
}
