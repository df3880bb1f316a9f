//! # Event Bus
//!
//! An in-process publish/subscribe event service with prioritized delivery,
//! vetoes, fault isolation and per-key recency caches.
//!
//! ## Overview
//!
//! Provides an [`EventService`] that routes publications to subscribers
//! registered by event type, by exact topic or by topic pattern. Subscribers of
//! one publication run one after another in priority order; veto listeners run
//! before them and can cancel the publication as a whole.
//!
//! ## Features
//!
//! * **Polymorphic types**: a subscriber of a supertype receives its subtypes,
//!   including parameterized descriptors with wildcard bounds ([`TypeDescriptor`]).
//! * **Topics and patterns**: exact topic and regex subscribers merge into one
//!   priority-ordered sequence.
//! * **Vetoes**: any veto cancels delivery; a panicking veto never blocks it.
//! * **Fault isolation**: handler errors and panics are counted, logged and
//!   re-published as [`DeliveryFault`] events.
//! * **Reference strength**: weak entries follow the caller's `Arc`, strong
//!   entries live until unsubscribed, probed entries ask a liveness callback.
//! * **Recency cache**: bounded most-recent-first history per topic or type.
//! * **Confined dispatch**: all delivery of one service on a single thread.
//! * **Telemetry**: publication status listeners and per-invocation timing.
//!
//! # Example
//!
//! ```rust
//! use relay_event_bus::{Delivery, EventService, Subscription, SubscriptionKey, handler};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! # fn main() -> Result<(), relay_event_bus::EventBusError> {
//! let bus = EventService::new();
//! bus.set_default_cache_size(5);
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let vanilla = handler(move |delivery: &Delivery<'_>| {
//!     assert_eq!(delivery.topic(), Some("IceCream.Vanilla"));
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//! let any_flavor = handler(|_: &Delivery<'_>| Err::<(), _>("melted"));
//!
//! bus.subscribe("IceCream.Vanilla", &vanilla)?;
//! let pattern = SubscriptionKey::pattern("IceCream.*")?;
//! bus.subscribe_with(pattern, Subscription::weak(&any_flavor).priority(-1))?;
//!
//! let outcome = bus.publish_topic("IceCream.Vanilla", "two scoops")?;
//! let report = outcome.report().copied().unwrap_or_default();
//! assert_eq!((report.delivered, report.faults), (2, 1));
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! assert_eq!(bus.get_cached_items("IceCream.Vanilla").len(), 1);
//! # Ok(())
//! # }
//! ```

mod bus;
mod cache;
mod config;
mod descriptor;
mod dispatch;
mod error;
mod handler;
mod key;
mod locator;
mod plan;
mod registry;

pub use bus::{EventService, EventServiceBuilder};
pub use config::{EventServiceConfig, load_config};
pub use descriptor::{Event, TypeArg, TypeDescriptor};
pub use dispatch::{
    DEFAULT_DISPATCH_THREAD, DeliveryFault, DeliveryReport, DispatchMode, InvocationKind,
    Publication, PublicationStatus, PublishOutcome, StatusListener, SubscriberTiming,
};
pub use error::{EventBusError, EventBusErrorExt};
pub use handler::{
    Delivery, EventHandler, HandlerError, HandlerId, HandlerOutcome, LivenessProbe, Payload,
    ReferenceStrength, Subscription, VetoListener, VetoSubscription, handler, veto,
};
pub use key::{Route, SubscriptionKey, TopicPattern};
pub use locator::{CONFINED_EVENT_BUS, EVENT_BUS, ServiceLocator};
pub use plan::{PlannedSubscription, Registration, RegistrationPlan, Subscribes};
