use axum::response::sse::Event;
use serde::Serialize;

/// Selector of the first frame on every new subscription.
pub const CMD_ON_CONNECT: &str = "cmd.onConnect";
/// Selector broadcast to a channel when a subscription joins it.
pub const CMD_ON_JOIN: &str = "cmd.onJoin";
/// Selector broadcast to a channel when a subscription leaves it.
pub const CMD_ON_LEAVE: &str = "cmd.onLeave";

/// Payload of the `cmd.onConnect` frame. Tells the client its subscription
/// id, where to send heartbeats and how often, and the identity the server
/// resolved for it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnConnect {
    pub id: String,
    pub heartbeat_url: String,
    pub heartbeat_interval_ms: u64,
    pub user_id: String,
    pub display_name: String,
    pub profile_url: String,
}

/// Build one SSE frame: `id: <id>\ndata: <selector> <json>\n\n`. The single
/// data line carries selector and payload separated by exactly one space;
/// an absent payload leaves the JSON part empty.
pub(crate) fn frame(id: u64, selector: &str, json: &str) -> Event {
    Event::default()
        .id(id.to_string())
        .data(format!("{selector} {json}"))
}
