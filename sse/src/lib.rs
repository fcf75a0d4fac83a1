//! Server-push event broker over Server-Sent Events (SSE).
//!
//! This crate is the in-memory core of the broker: the subscription
//! registry, the fan-out and expiry machinery, and the framing and
//! lifecycle of a single subscription. The HTTP boundary (routing,
//! session resolution, the admin listing) lives in the `web` crate.
//!
//! # Architecture
//!
//! - **One subscription per client stream**: each long-lived request owns a
//!   [`Subscription`] bound to the sending half of its response channel.
//! - **Five-way registry**: every subscription is indexed by subscription
//!   id, channel, user id, user name and session id, so publishers can
//!   address subscribers along any of those dimensions.
//! - **Grow-only slot arrays**: each index key maps to a dense array of
//!   subscriber slots that publishers traverse without a shared lock;
//!   removal tombstones a slot and full arrays are replaced by larger
//!   copies. Fan-out stays cheap against rare register/unregister traffic.
//! - **Opportunistic expiry**: clients ping a heartbeat endpoint to stay
//!   alive; a publish that reaches a subscriber whose last pulse is older
//!   than the configured timeout still delivers that frame, then reaps the
//!   straggler. There is no background reaper thread.
//! - **Ephemeral messages**: nothing is stored. A subscriber that is gone
//!   misses the event.
//!
//! # Message flow
//!
//! 1. The stream handler builds a [`Subscription`] and hands it to
//!    [`Broker::register`], which indexes it and (when configured)
//!    broadcasts `cmd.onJoin` to its channel.
//! 2. A publisher calls one of the `notify_*` methods; the broker looks the
//!    key up in the matching index and publishes one SSE frame per
//!    subscriber, each carrying a per-subscription strictly increasing id.
//! 3. A client that disconnects surfaces as a send failure inside the next
//!    publish to it; the subscription unsubscribes itself, leaves every
//!    index and its parked request completes.
//!
//! # Modules
//!
//! - `subscription`: one client stream and its identity, pulse and framing
//! - `registry`: the five concurrent key → slot-array indices
//! - `broker`: fan-out, expiry, registration and the broker options
//! - `message`: well-known selectors and the `cmd.onConnect` payload
//! - `hooks`: the observer seam around the subscription lifecycle

pub mod broker;
pub mod hooks;
pub mod message;
mod registry;
pub mod subscription;

pub use broker::{Broker, Error, Options, Result};
pub use hooks::{HookResult, SubscriptionObserver};
pub use subscription::{EventSender, Identity, Subscription, UNKNOWN_CHANNEL};
