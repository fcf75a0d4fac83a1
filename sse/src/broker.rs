use crate::hooks::{NoopObserver, SubscriptionObserver};
use crate::message::{CMD_ON_JOIN, CMD_ON_LEAVE};
use crate::registry::{Index, Registry};
use crate::subscription::{Subscription, UNKNOWN_CHANNEL};
use log::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The `on_subscribe` observer rejected a registration.
    Subscribe(Box<dyn std::error::Error + Send + Sync>),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        match self {
            Error::Subscribe(source) => write!(fmt, "subscription rejected: {source}"),
        }
    }
}

/// Broker tunables, advertised paths included. Defaults match the broker's
/// published endpoint contract.
#[derive(Debug, Clone)]
pub struct Options {
    /// Endpoint path for opening an SSE subscription.
    pub stream_path: String,
    /// Endpoint path clients ping to stay alive; advertised in `cmd.onConnect`.
    pub heartbeat_path: String,
    /// Endpoint path of the subscriber metadata listing.
    pub subscriptions_path: String,
    /// Last-pulse age beyond which a subscription is reaped on the next
    /// publish that reaches it.
    pub timeout: Duration,
    /// Heartbeat cadence advertised to clients in `cmd.onConnect`.
    pub heartbeat_interval: Duration,
    /// Whether joins and leaves are broadcast to the affected channel.
    pub notify_channel_of_subscriptions: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            stream_path: "/event-stream".to_string(),
            heartbeat_path: "/event-heartbeat".to_string(),
            subscriptions_path: "/event-subscribers".to_string(),
            timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            notify_channel_of_subscriptions: true,
        }
    }
}

/// The in-memory event broker.
///
/// Holds the five-way subscription registry and fans published
/// (selector, payload) pairs out to subscribers addressed by subscription
/// id, channel, user id, user name or session id. Expiry is opportunistic:
/// a publish that runs into a subscriber whose last pulse is older than
/// `Options::timeout` still delivers that frame, then unsubscribes the
/// straggler. There is no background reaper.
pub struct Broker {
    registry: Registry,
    options: Options,
    observer: Arc<dyn SubscriptionObserver>,
}

impl Broker {
    pub fn new(options: Options) -> Self {
        Self::with_observer(options, Arc::new(NoopObserver))
    }

    pub fn with_observer(options: Options, observer: Arc<dyn SubscriptionObserver>) -> Self {
        Self {
            registry: Registry::new(),
            options,
            observer,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn observer(&self) -> &Arc<dyn SubscriptionObserver> {
        &self.observer
    }

    /// Register a subscription into all five indices.
    ///
    /// Under the subscription's registration monitor: wire up the
    /// unsubscribe handler, insert into every index its identity keys, and
    /// run the `on_subscribe` observer, whose error fails the registration
    /// and leaves the cleanup to the expiry path. After the monitor is
    /// released the join is broadcast to the subscription's channel, visible
    /// to the subscriber itself. Subscribers that named no channel sit in
    /// the `"*"` bucket and are not announced.
    pub fn register(self: &Arc<Self>, subscription: &Arc<Subscription>) -> Result<()> {
        {
            let _monitor = subscription.lock_registration();
            let broker = Arc::clone(self);
            subscription.set_on_unsubscribe(move |subscription| {
                broker.handle_unregister(&subscription);
            });
            self.registry.insert_all(subscription);
            self.observer
                .on_subscribe(subscription)
                .map_err(Error::Subscribe)?;
        }
        debug!(
            "Registered subscription {} on channel {}",
            subscription.id(),
            subscription.channel()
        );

        if self.options.notify_channel_of_subscriptions
            && subscription.channel() != UNKNOWN_CHANNEL
        {
            self.notify_meta(subscription, CMD_ON_JOIN);
        }
        Ok(())
    }

    /// Unsubscribe handler installed on every registered subscription.
    fn handle_unregister(self: &Arc<Self>, subscription: &Arc<Subscription>) {
        {
            let _monitor = subscription.lock_registration();
            self.registry.remove_all(subscription);
            self.observer.on_unsubscribe(subscription);
            subscription.dispose();
        }
        debug!("Unregistered subscription {}", subscription.id());

        if self.options.notify_channel_of_subscriptions
            && subscription.channel() != UNKNOWN_CHANNEL
        {
            self.notify_meta(subscription, CMD_ON_LEAVE);
        }
    }

    fn notify_meta(&self, subscription: &Arc<Subscription>, selector: &str) {
        match serde_json::to_value(subscription.meta()) {
            Ok(meta) => self.notify_channel(subscription.channel(), selector, Some(&meta)),
            Err(e) => error!("Failed to serialize subscription metadata: {e}"),
        }
    }

    /// Drop a subscription by id. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: &str) {
        if let Some(subscription) = self.registry.get(id) {
            subscription.unsubscribe();
        }
    }

    /// Mark a subscription alive. Unknown ids are a no-op.
    pub fn pulse(&self, id: &str) {
        if let Some(subscription) = self.registry.get(id) {
            subscription.pulse();
        }
    }

    /// Administrative lookup by subscription id.
    pub fn subscription(&self, id: &str) -> Option<Arc<Subscription>> {
        self.registry.get(id)
    }

    /// Metadata of every live subscription, optionally filtered by channel
    /// equality.
    pub fn subscriptions(&self, channel: Option<&str>) -> Vec<HashMap<String, String>> {
        self.registry.snapshot(channel)
    }

    /// Publish to every live subscription.
    pub fn notify_all(&self, selector: &str, payload: Option<&Value>) {
        for subscription in self.registry.all() {
            subscription.publish(selector, payload);
        }
    }

    /// Publish to every subscriber of `channel`.
    pub fn notify_channel(&self, channel: &str, selector: &str, payload: Option<&Value>) {
        self.notify(&self.registry.by_channel, channel, selector, payload, None);
    }

    /// Publish to every subscription of a user id, optionally restricted to
    /// one channel.
    pub fn notify_user_id(
        &self,
        user_id: &str,
        selector: &str,
        payload: Option<&Value>,
        channel: Option<&str>,
    ) {
        self.notify(&self.registry.by_user_id, user_id, selector, payload, channel);
    }

    /// Publish to every subscription of a user name, optionally restricted
    /// to one channel.
    pub fn notify_user_name(
        &self,
        user_name: &str,
        selector: &str,
        payload: Option<&Value>,
        channel: Option<&str>,
    ) {
        self.notify(
            &self.registry.by_user_name,
            user_name,
            selector,
            payload,
            channel,
        );
    }

    /// Publish to every subscription of a session, optionally restricted to
    /// one channel.
    pub fn notify_session(
        &self,
        session_id: &str,
        selector: &str,
        payload: Option<&Value>,
        channel: Option<&str>,
    ) {
        self.notify(
            &self.registry.by_session,
            session_id,
            selector,
            payload,
            channel,
        );
    }

    /// Publish to one subscription by id, optionally gated on its channel.
    pub fn notify_subscription(
        &self,
        id: &str,
        selector: &str,
        payload: Option<&Value>,
        channel: Option<&str>,
    ) {
        self.notify(&self.registry.by_sub_id, id, selector, payload, channel);
    }

    /// Fan one (selector, payload) out to the subscribers under `key`,
    /// then harvest the stale ones.
    ///
    /// A subscriber past the pulse timeout still receives this frame; it is
    /// unsubscribed after the iteration. Publishing takes only each
    /// subscription's own write lock, so one slow subscriber cannot hold up
    /// the rest of the fan-out.
    fn notify(
        &self,
        index: &Index,
        key: &str,
        selector: &str,
        payload: Option<&Value>,
        channel: Option<&str>,
    ) {
        let Some(array) = index.get(key) else {
            return;
        };

        let mut expired = Vec::new();
        for subscription in array.live() {
            if channel.is_some_and(|c| subscription.channel() != c) {
                continue;
            }
            if subscription.is_stale(self.options.timeout) {
                expired.push(Arc::clone(&subscription));
            }
            subscription.publish(selector, payload);
        }

        for subscription in expired {
            info!(
                "Reaping silent subscription {} on channel {}",
                subscription.id(),
                subscription.channel()
            );
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CMD_ON_CONNECT;
    use crate::subscription::Identity;
    use axum::response::sse::{Event, Sse};
    use axum::response::IntoResponse;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type FrameReceiver = mpsc::UnboundedReceiver<std::result::Result<Event, Infallible>>;

    fn quiet_broker(timeout: Duration) -> Arc<Broker> {
        Arc::new(Broker::new(Options {
            timeout,
            notify_channel_of_subscriptions: false,
            ..Options::default()
        }))
    }

    fn subscribe(
        broker: &Arc<Broker>,
        channel: &str,
        user_id: &str,
    ) -> (Arc<Subscription>, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: user_id.to_string(),
            user_name: format!("{user_id}.login"),
            session_id: format!("{user_id}.session"),
            display_name: user_id.to_string(),
            profile_url: String::new(),
            is_authenticated: true,
        };
        let subscription = Arc::new(Subscription::new(identity, Some(channel), tx));
        broker.register(&subscription).unwrap();
        (subscription, rx)
    }

    async fn collect_frames(rx: FrameReceiver) -> String {
        let response = Sse::new(UnboundedReceiverStream::new(rx)).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    /// Selector and parsed payload of each `data:` line in a frame dump.
    fn parse_frames(frames: &str) -> Vec<(String, Value)> {
        frames
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| {
                let (selector, json) = data.split_once(' ').unwrap();
                let payload = if json.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(json).unwrap()
                };
                (selector.to_string(), payload)
            })
            .collect()
    }

    #[tokio::test]
    async fn channel_fanout_reaches_only_matching_subscribers() {
        let broker = quiet_broker(Duration::from_secs(30));
        let (a, a_rx) = subscribe(&broker, "home", "a");
        let (b, b_rx) = subscribe(&broker, "home", "b");
        let (c, c_rx) = subscribe(&broker, "work", "c");

        broker.notify_channel("home", "chat.msg", Some(&json!({"t":"hi"})));
        for subscription in [&a, &b, &c] {
            subscription.unsubscribe();
        }

        let expected = "id: 1\ndata: chat.msg {\"t\":\"hi\"}\n\n";
        assert_eq!(collect_frames(a_rx).await, expected);
        assert_eq!(collect_frames(b_rx).await, expected);
        assert_eq!(collect_frames(c_rx).await, "");
    }

    #[tokio::test]
    async fn connect_frame_precedes_the_join_broadcast() {
        let broker = Arc::new(Broker::new(Options {
            notify_channel_of_subscriptions: true,
            ..Options::default()
        }));
        // the boundary publishes onConnect before handing the
        // subscription to the broker
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: "u-1".to_string(),
            display_name: "User One".to_string(),
            ..Identity::default()
        };
        let subscription = Arc::new(Subscription::new(identity, Some("home"), tx));
        subscription.publish(CMD_ON_CONNECT, Some(&json!({"id": subscription.id()})));
        broker.register(&subscription).unwrap();

        subscription.unsubscribe();
        let frames = collect_frames(rx).await;
        let parsed = parse_frames(&frames);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, CMD_ON_CONNECT);
        assert_eq!(parsed[1].0, CMD_ON_JOIN);
        assert_eq!(parsed[1].1["userId"], "u-1");
        assert_eq!(parsed[1].1["displayName"], "User One");
        assert!(frames.starts_with("id: 1\n"));
    }

    #[tokio::test]
    async fn leaving_broadcasts_to_the_remaining_channel() {
        let broker = Arc::new(Broker::new(Options::default()));
        let (tx_a, a_rx) = mpsc::unbounded_channel();
        let a = Arc::new(Subscription::new(
            Identity {
                user_id: "a".to_string(),
                display_name: "a".to_string(),
                ..Identity::default()
            },
            Some("home"),
            tx_a,
        ));
        broker.register(&a).unwrap();
        let (tx_b, _b_rx) = mpsc::unbounded_channel();
        let b = Arc::new(Subscription::new(
            Identity {
                user_id: "b".to_string(),
                display_name: "b".to_string(),
                ..Identity::default()
            },
            Some("home"),
            tx_b,
        ));
        broker.register(&b).unwrap();

        b.unsubscribe();
        a.unsubscribe();

        let parsed = parse_frames(&collect_frames(a_rx).await);
        let selectors: Vec<&str> = parsed.iter().map(|(s, _)| s.as_str()).collect();
        // own join, b's join, b's leave
        assert_eq!(selectors, [CMD_ON_JOIN, CMD_ON_JOIN, CMD_ON_LEAVE]);
        assert_eq!(parsed[2].1["userId"], "b");
    }

    #[tokio::test]
    async fn channelless_subscriptions_are_never_announced() {
        let broker = Arc::new(Broker::new(Options::default()));
        let (tx_a, a_rx) = mpsc::unbounded_channel();
        let a = Arc::new(Subscription::new(
            Identity {
                user_id: "a".to_string(),
                display_name: "a".to_string(),
                ..Identity::default()
            },
            None,
            tx_a,
        ));
        broker.register(&a).unwrap();

        // a second subscriber in the "*" bucket joins and leaves silently
        let (tx_b, _b_rx) = mpsc::unbounded_channel();
        let b = Arc::new(Subscription::new(
            Identity {
                user_id: "b".to_string(),
                display_name: "b".to_string(),
                ..Identity::default()
            },
            Some(""),
            tx_b,
        ));
        broker.register(&b).unwrap();
        b.unsubscribe();

        // the bucket is still addressable as a literal channel name
        broker.notify_channel(UNKNOWN_CHANNEL, "chat.msg", Some(&json!({"t":"hi"})));
        a.unsubscribe();

        let frames = collect_frames(a_rx).await;
        assert_eq!(frames, "id: 1\ndata: chat.msg {\"t\":\"hi\"}\n\n");
    }

    #[tokio::test]
    async fn heartbeats_keep_a_subscription_alive() {
        let broker = quiet_broker(Duration::from_millis(30));
        let (a, a_rx) = subscribe(&broker, "home", "a");
        let id = a.id().to_string();

        for round in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            broker.pulse(&id);
            if round % 2 == 1 {
                broker.notify_channel("home", "tick.tock", None);
            }
        }

        assert!(broker.subscription(&id).is_some());
        a.unsubscribe();
        let parsed = parse_frames(&collect_frames(a_rx).await);
        assert_eq!(parsed.len(), 5);
    }

    #[tokio::test]
    async fn silent_subscriptions_get_one_final_frame_then_reaped() {
        let broker = quiet_broker(Duration::from_millis(10));
        let (a, a_rx) = subscribe(&broker, "home", "a");
        let id = a.id().to_string();

        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.notify_channel("home", "chat.msg", Some(&json!({"t":"bye"})));

        assert!(broker.subscription(&id).is_none());
        assert!(broker.subscriptions(Some("home")).is_empty());

        let frames = collect_frames(a_rx).await;
        assert_eq!(frames, "id: 1\ndata: chat.msg {\"t\":\"bye\"}\n\n");
    }

    #[tokio::test]
    async fn a_broken_client_is_removed_from_every_index_on_publish() {
        let broker = quiet_broker(Duration::from_secs(30));
        let (a, a_rx) = subscribe(&broker, "home", "a");
        drop(a_rx);

        broker.notify_channel("home", "chat.msg", None);

        assert!(broker.subscription(a.id()).is_none());
        assert!(broker.subscriptions(None).is_empty());
        for (index, key) in [
            (&broker.registry.by_channel, "home"),
            (&broker.registry.by_user_id, "a"),
            (&broker.registry.by_user_name, "a.login"),
            (&broker.registry.by_session, "a.session"),
        ] {
            let live = index.get(key).map(|array| array.live_count()).unwrap_or(0);
            assert_eq!(live, 0, "stale entry left under {key}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_thousand_concurrent_registrations_all_count() {
        let broker = quiet_broker(Duration::from_secs(30));
        let mut handles = Vec::new();
        for i in 0..1000 {
            let broker = Arc::clone(&broker);
            handles.push(tokio::spawn(async move {
                let (subscription, rx) = subscribe(&broker, "load", &format!("u{i}"));
                drop(subscription);
                rx
            }));
        }
        let mut receivers = Vec::new();
        for handle in handles {
            receivers.push(handle.await.unwrap());
        }

        assert_eq!(broker.subscriptions(Some("load")).len(), 1000);
        let array = broker.registry.by_channel.get("load").unwrap();
        assert_eq!(array.live_count(), 1000);
        drop(receivers);
    }

    #[tokio::test]
    async fn user_notifications_respect_the_channel_filter() {
        let broker = quiet_broker(Duration::from_secs(30));
        let (home, home_rx) = subscribe(&broker, "home", "u1");
        let (work, work_rx) = subscribe(&broker, "work", "u1");

        broker.notify_user_id("u1", "ping.user", None, Some("home"));
        broker.notify_session("u1.session", "ping.session", None, None);
        home.unsubscribe();
        work.unsubscribe();

        let home_frames = parse_frames(&collect_frames(home_rx).await);
        let work_frames = parse_frames(&collect_frames(work_rx).await);
        assert_eq!(
            home_frames.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
            ["ping.user", "ping.session"]
        );
        assert_eq!(
            work_frames.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
            ["ping.session"]
        );
    }

    #[tokio::test]
    async fn notify_all_reaches_every_channel() {
        let broker = quiet_broker(Duration::from_secs(30));
        let (a, a_rx) = subscribe(&broker, "home", "a");
        let (b, b_rx) = subscribe(&broker, "work", "b");

        broker.notify_all("cmd.shutdown", None);
        a.unsubscribe();
        b.unsubscribe();

        for rx in [a_rx, b_rx] {
            let parsed = parse_frames(&collect_frames(rx).await);
            assert_eq!(parsed[0].0, "cmd.shutdown");
        }
    }

    #[tokio::test]
    async fn unknown_keys_and_ids_are_silent_noops() {
        let broker = quiet_broker(Duration::from_secs(30));
        broker.notify_channel("nowhere", "chat.msg", None);
        broker.notify_subscription("missing", "chat.msg", None, None);
        broker.pulse("missing");
        broker.unsubscribe("missing");
        assert!(broker.subscriptions(None).is_empty());
    }

    struct CountingObserver {
        subscribed: AtomicUsize,
        unsubscribed: AtomicUsize,
        reject: bool,
    }

    impl SubscriptionObserver for CountingObserver {
        fn on_subscribe(&self, _subscription: &Arc<Subscription>) -> crate::hooks::HookResult {
            if self.reject {
                return Err("not today".into());
            }
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_unsubscribe(&self, _subscription: &Arc<Subscription>) {
            self.unsubscribed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn observer_sees_the_full_lifecycle() {
        let observer = Arc::new(CountingObserver {
            subscribed: AtomicUsize::new(0),
            unsubscribed: AtomicUsize::new(0),
            reject: false,
        });
        let broker = Arc::new(Broker::with_observer(
            Options {
                notify_channel_of_subscriptions: false,
                ..Options::default()
            },
            Arc::clone(&observer) as Arc<dyn SubscriptionObserver>,
        ));

        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = Arc::new(Subscription::new(Identity::default(), Some("home"), tx));
        broker.register(&subscription).unwrap();
        subscription.unsubscribe();

        assert_eq!(observer.subscribed.load(Ordering::SeqCst), 1);
        assert_eq!(observer.unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_rejecting_observer_fails_the_registration() {
        let observer = Arc::new(CountingObserver {
            subscribed: AtomicUsize::new(0),
            unsubscribed: AtomicUsize::new(0),
            reject: true,
        });
        let broker = Arc::new(Broker::with_observer(
            Options::default(),
            observer as Arc<dyn SubscriptionObserver>,
        ));

        let (tx, _rx) = mpsc::unbounded_channel();
        let subscription = Arc::new(Subscription::new(Identity::default(), Some("home"), tx));
        let result = broker.register(&subscription);
        assert!(matches!(result, Err(Error::Subscribe(_))));
    }
}
