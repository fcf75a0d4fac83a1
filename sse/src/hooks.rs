use crate::subscription::Subscription;
use std::sync::Arc;

/// Outcome of the `on_subscribe` hook; an error fails the registration.
pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Extension seam around the subscription lifecycle. All methods default to
/// no-ops so observers implement only what they care about.
///
/// `on_subscribe` and `on_unsubscribe` run inside the broker's registration
/// sections, with the subscription's registration monitor held; keep them
/// short and off I/O.
pub trait SubscriptionObserver: Send + Sync {
    /// Runs after the stream handler builds a subscription and before it is
    /// registered. The observer may still mutate the metadata map here.
    fn on_created(&self, _subscription: &mut Subscription) {}

    /// Runs once the subscription is present in every index. Returning an
    /// error fails the registration; the stale index entries are harvested
    /// by the expiry path.
    fn on_subscribe(&self, _subscription: &Arc<Subscription>) -> HookResult {
        Ok(())
    }

    /// Runs once the subscription has left every index, before its response
    /// stream closes.
    fn on_unsubscribe(&self, _subscription: &Arc<Subscription>) {}
}

pub(crate) struct NoopObserver;

impl SubscriptionObserver for NoopObserver {}
