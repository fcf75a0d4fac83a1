use crate::message;
use axum::response::sse::Event;
use log::*;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Channel bucket for subscriptions that did not name one. A literal key,
/// not a wildcard: notifying `"*"` reaches only these subscribers.
pub const UNKNOWN_CHANNEL: &str = "*";

/// Sending half of a subscription's response stream. The receiving half is
/// drained by the stream handler that owns the HTTP response.
pub type EventSender = UnboundedSender<Result<Event, Infallible>>;

type UnsubscribeFn = Box<dyn FnOnce(Arc<Subscription>) + Send>;

/// Identity fields resolved at the HTTP boundary before a subscription exists.
/// Anonymous clients get a generated `user_id`/`display_name` and leave the
/// rest empty; empty fields are skipped during index registration.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
    pub session_id: String,
    pub display_name: String,
    pub profile_url: String,
    pub is_authenticated: bool,
}

/// One live client stream.
///
/// A subscription owns the sending half of its response channel and frames
/// every published message as an SSE event with a per-subscription, 1-based,
/// strictly increasing `id`. Publishing and disposal contend on the sender
/// lock, so no frame is ever written after disposal. A failed send means the
/// client is gone; the subscription then unsubscribes itself.
pub struct Subscription {
    id: String,
    channel: String,
    user_id: String,
    user_name: String,
    session_id: String,
    display_name: String,
    is_authenticated: bool,
    meta: RwLock<HashMap<String, String>>,
    created: Instant,
    /// Milliseconds since `created`, written by `pulse`. Monotone via
    /// `fetch_max`; racy reads against a concurrent pulse are benign.
    last_pulse_ms: AtomicU64,
    msg_id: AtomicU64,
    sender: Mutex<Option<EventSender>>,
    on_unsubscribe: Mutex<Option<UnsubscribeFn>>,
    registration: Mutex<()>,
}

impl Subscription {
    /// Build a subscription bound to `sender`. `Meta` is seeded with the
    /// `userId`, `displayName` and `profileUrl` the identity carries; the
    /// `on_created` observer may add to it before registration.
    pub fn new(identity: Identity, channel: Option<&str>, sender: EventSender) -> Self {
        let channel = match channel {
            Some(channel) if !channel.is_empty() => channel.to_string(),
            _ => UNKNOWN_CHANNEL.to_string(),
        };

        let mut meta = HashMap::new();
        meta.insert("userId".to_string(), identity.user_id.clone());
        meta.insert("displayName".to_string(), identity.display_name.clone());
        meta.insert("profileUrl".to_string(), identity.profile_url.clone());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel,
            user_id: identity.user_id,
            user_name: identity.user_name,
            session_id: identity.session_id,
            display_name: identity.display_name,
            is_authenticated: identity.is_authenticated,
            meta: RwLock::new(meta),
            created: Instant::now(),
            last_pulse_ms: AtomicU64::new(0),
            msg_id: AtomicU64::new(0),
            sender: Mutex::new(Some(sender)),
            on_unsubscribe: Mutex::new(None),
            registration: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    /// Current copy of the subscription's metadata map.
    pub fn meta(&self) -> HashMap<String, String> {
        self.meta.read().clone()
    }

    pub fn set_meta(&self, key: &str, value: &str) {
        self.meta.write().insert(key.to_string(), value.to_string());
    }

    /// Mark the subscription alive. No I/O.
    pub fn pulse(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_pulse_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub(crate) fn is_stale(&self, timeout: Duration) -> bool {
        let elapsed = self.created.elapsed().as_millis() as u64;
        let last_pulse = self.last_pulse_ms.load(Ordering::Relaxed);
        elapsed.saturating_sub(last_pulse) > timeout.as_millis() as u64
    }

    /// Frame `selector` plus the JSON payload (empty string when absent) as
    /// one SSE event and hand it to the response stream. A send failure means
    /// the client disconnected: the subscription logs, unsubscribes itself
    /// and returns normally. Never called with the sender lock held.
    pub fn publish(self: &Arc<Self>, selector: &str, payload: Option<&Value>) {
        let json = match payload {
            Some(value) => match serde_json::to_string(value) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize payload for selector {selector}: {e}");
                    return;
                }
            },
            None => String::new(),
        };

        let disconnected = {
            let sender = self.sender.lock();
            let Some(tx) = sender.as_ref() else {
                // disposed
                return;
            };
            let id = self.msg_id.fetch_add(1, Ordering::Relaxed) + 1;
            tx.send(Ok(message::frame(id, selector, &json))).is_err()
        };

        if disconnected {
            warn!("Client of subscription {} is gone, unsubscribing", self.id);
            self.unsubscribe();
        }
    }

    /// Hand the subscription back to whoever registered it. The callback slot
    /// is taken before invocation, so a recursive unsubscribe during disposal
    /// is a no-op and the subscription→registry cycle is broken here.
    pub fn unsubscribe(self: &Arc<Self>) {
        let callback = self.on_unsubscribe.lock().take();
        if let Some(callback) = callback {
            callback(Arc::clone(self));
        }
    }

    /// Close the response stream. Dropping the sender under the write lock
    /// ends the event channel, which completes the parked stream handler.
    /// Every later publish finds the sender gone and writes nothing.
    pub(crate) fn dispose(&self) {
        *self.on_unsubscribe.lock() = None;
        let sender = self.sender.lock().take();
        drop(sender);
    }

    pub(crate) fn set_on_unsubscribe(
        &self,
        callback: impl FnOnce(Arc<Subscription>) + Send + 'static,
    ) {
        *self.on_unsubscribe.lock() = Some(Box::new(callback));
    }

    /// Monitor serializing this subscription's registration and
    /// unregistration, so "in every index" and "in no index" are the only
    /// states other threads can observe.
    pub(crate) fn lock_registration(&self) -> MutexGuard<'_, ()> {
        self.registration.lock()
    }

    #[cfg(test)]
    pub(crate) fn last_pulse_millis(&self) -> u64 {
        self.last_pulse_ms.load(Ordering::Relaxed)
    }
}
