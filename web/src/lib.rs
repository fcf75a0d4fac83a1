//! HTTP boundary of the event broker.
//!
//! This crate contains only the Axum surface: the router, the stream /
//! heartbeat / subscriber-listing controllers and the forwarded-identity
//! extractor. The broker core (registry, fan-out, expiry) lives in the
//! `sse` crate.

pub(crate) mod controller;
pub mod error;
pub(crate) mod extractors;
pub mod router;

pub use router::define_routes;
pub use service::AppState;
