use crate::error::{Error, Result, WebErrorKind};
use crate::extractors::remote_session::RemoteSession;
use async_stream::stream;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use log::*;
use serde::Deserialize;
use service::AppState;
use sse::message::{OnConnect, CMD_ON_CONNECT};
use sse::{Identity, Subscription};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use utoipa::IntoParams;

/// Process-wide sequence for anonymous subscriber identities. The `"-<n>"`
/// user id and `"User<n>"` display name are part of the `cmd.onConnect`
/// contract.
static ANONYMOUS_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize, IntoParams)]
pub(crate) struct StreamParams {
    /// Channel to subscribe to; omitted means the "*" bucket.
    channel: Option<String>,
}

/// GET open a long-lived SSE subscription
#[utoipa::path(
    get,
    path = "/event-stream",
    params(StreamParams),
    responses(
        (status = 200, description = "Subscription opened; the response is a long-lived text/event-stream", content_type = "text/event-stream"),
        (status = 500, description = "Internal Server Error")
    )
)]
pub(crate) async fn stream(
    session: Option<RemoteSession>,
    Query(params): Query<StreamParams>,
    State(app_state): State<AppState>,
) -> Result<impl IntoResponse> {
    let identity = resolve_identity(session);
    debug!(
        "Establishing event stream for user {} on channel {}",
        identity.user_id,
        params.channel.as_deref().unwrap_or("*")
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscription = Subscription::new(identity, params.channel.as_deref(), tx);
    app_state.broker.observer().on_created(&mut subscription);
    let subscription = Arc::new(subscription);

    // First frame: tell the client who it is and how to stay alive. Sent
    // before registration so it precedes the channel's join broadcast.
    let options = app_state.broker.options();
    let meta = subscription.meta();
    let payload = serde_json::to_value(OnConnect {
        id: subscription.id().to_string(),
        heartbeat_url: options.heartbeat_path.clone(),
        heartbeat_interval_ms: options.heartbeat_interval.as_millis() as u64,
        user_id: subscription.user_id().to_string(),
        display_name: subscription.display_name().to_string(),
        profile_url: meta.get("profileUrl").cloned().unwrap_or_default(),
    })
    .map_err(|e| {
        error!("Failed to serialize the onConnect payload: {e}");
        Error::Web(WebErrorKind::Other)
    })?;
    subscription.publish(CMD_ON_CONNECT, Some(&payload));

    app_state.broker.register(&subscription)?;

    // Park until the subscription is disposed: the broker drops the sending
    // half, the channel drains and the response completes.
    let subscription_id = subscription.id().to_string();
    let stream = stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
        debug!("Event stream completed for subscription {subscription_id}");
    };

    Ok((
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

fn resolve_identity(session: Option<RemoteSession>) -> Identity {
    match session {
        Some(session) => Identity {
            user_id: session.user_id,
            user_name: session.user_name,
            session_id: session.session_id,
            display_name: session.display_name,
            profile_url: session.profile_url,
            is_authenticated: true,
        },
        None => {
            let n = ANONYMOUS_SEQ.fetch_add(1, Ordering::SeqCst) + 1;
            Identity {
                user_id: format!("-{n}"),
                display_name: format!("User{n}"),
                ..Identity::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_identities_count_up_in_the_contract_encoding() {
        let first = resolve_identity(None);
        let second = resolve_identity(None);

        let n: u64 = first.user_id.strip_prefix('-').unwrap().parse().unwrap();
        assert_eq!(first.display_name, format!("User{n}"));
        assert!(!first.is_authenticated);
        assert!(first.session_id.is_empty());

        let m: u64 = second.user_id.strip_prefix('-').unwrap().parse().unwrap();
        assert!(m > n);
    }

    #[test]
    fn forwarded_sessions_are_authenticated() {
        let identity = resolve_identity(Some(RemoteSession {
            user_id: "u-9".to_string(),
            user_name: "user.nine".to_string(),
            display_name: "User Nine".to_string(),
            profile_url: "https://example.com/u-9".to_string(),
            session_id: "sess-9".to_string(),
        }));

        assert!(identity.is_authenticated);
        assert_eq!(identity.user_id, "u-9");
        assert_eq!(identity.user_name, "user.nine");
        assert_eq!(identity.session_id, "sess-9");
    }
}
