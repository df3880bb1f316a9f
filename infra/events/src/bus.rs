use crate::cache::RecencyCache;
use crate::descriptor::{Event, TypeDescriptor};
use crate::dispatch::{
    ConfinedQueue, DEFAULT_DISPATCH_THREAD, DeliveryFault, DeliveryReport, DispatchMode,
    InvocationKind, Publication, PublicationStatus, PublishOutcome, StatusListener, Stopwatch,
    panic_message,
};
use crate::error::EventBusError;
use crate::handler::{
    EventHandler, HandlerId, Payload, Subscription, VetoListener, VetoSubscription,
};
use crate::key::{Route, SubscriptionKey, TopicPattern};
use crate::registry::{self, Candidate, Registry};
use parking_lot::RwLock;
use std::any::Any;
use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Everything a publication resolves against, behind one lock.
///
/// Callbacks never run while this lock is held, so subscribers may call back
/// into the service.
#[derive(Debug, Default)]
struct State {
    subscribers: Registry<dyn EventHandler>,
    vetoes: Registry<dyn VetoListener>,
    cache: RecencyCache,
    time_threshold: Option<Duration>,
}

/// A publication together with the subscribers it resolved to.
///
/// Vetoes and subscribers are read under one lock, so a listener that
/// subscribes while judging a publication does not receive that publication.
struct Pending {
    publication: Publication,
    subscribers: Vec<Candidate<dyn EventHandler>>,
    threshold: Option<Duration>,
}

struct Inner {
    state: RwLock<State>,
    listeners: RwLock<Vec<Arc<dyn StatusListener>>>,
    mode: DispatchMode,
    queue: OnceLock<ConfinedQueue<Pending>>,
    stopped: AtomicBool,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("state", &self.state)
            .field("listeners", &self.listeners.read().len())
            .field("mode", &self.mode)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

/// An in-process publish/subscribe event service.
///
/// Subscribers register against a [`SubscriptionKey`] (a type, an exact
/// topic or a topic pattern) with a priority and a reference strength. A
/// publication resolves every matching subscriber into one sequence ordered by
/// priority (lower first), then registration order, and invokes them one by
/// one. Veto listeners run first and may cancel the publication as a whole.
/// A failing subscriber never prevents the others from running.
///
/// Cloning is cheap and yields a handle to the same service.
///
/// # Example
///
/// ```rust
/// use relay_event_bus::{Event, EventService, handler};
///
/// struct UserCreated { id: u64 }
/// impl Event for UserCreated {}
///
/// # fn main() -> Result<(), relay_event_bus::EventBusError> {
/// let bus = EventService::new();
/// let audit = handler(|delivery: &relay_event_bus::Delivery<'_>| {
///     assert_eq!(delivery.downcast_ref::<UserCreated>().map(|e| e.id), Some(42));
/// });
///
/// bus.subscribe(relay_event_bus::SubscriptionKey::of::<UserCreated>(), &audit)?;
/// let outcome = bus.publish(UserCreated { id: 42 })?;
/// assert_eq!(outcome.report().map(|r| r.delivered), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EventService {
    inner: Arc<Inner>,
}

impl Default for EventService {
    fn default() -> Self {
        Self::new()
    }
}

impl EventService {
    /// Creates an inline service with caching disabled.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner::new(DispatchMode::Inline, State::default())) }
    }

    #[must_use]
    pub fn builder() -> EventServiceBuilder {
        EventServiceBuilder::default()
    }

    #[must_use]
    pub fn mode(&self) -> DispatchMode {
        self.inner.mode
    }

    // --- subscribers -------------------------------------------------------

    /// Subscribes `handler` weakly with priority 0: the entry goes away once
    /// the caller drops its last `Arc`.
    ///
    /// Returns `false` if the handler is already subscribed to `key`.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn subscribe<H: EventHandler>(
        &self,
        key: impl Into<SubscriptionKey>,
        handler: &Arc<H>,
    ) -> Result<bool, EventBusError> {
        self.subscribe_with(key, Subscription::weak(handler))
    }

    /// Subscribes `handler` strongly with priority 0; the service keeps it
    /// alive until [`EventService::unsubscribe`].
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn subscribe_strongly<H: EventHandler>(
        &self,
        key: impl Into<SubscriptionKey>,
        handler: Arc<H>,
    ) -> Result<bool, EventBusError> {
        self.subscribe_with(key, Subscription::strong(handler))
    }

    /// Subscribes a prepared entry (custom priority, strength or probe).
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn subscribe_with(
        &self,
        key: impl Into<SubscriptionKey>,
        subscription: Subscription,
    ) -> Result<bool, EventBusError> {
        let key = key.into();
        key.validate()?;
        let Subscription { held, id, priority } = subscription;
        let strength = held.strength();
        let added = self.inner.state.write().subscribers.insert(key.clone(), id, held, priority);
        debug!(%key, priority, ?strength, added, "Subscribe");
        Ok(added)
    }

    /// Returns `false` if the handler was not subscribed to `key`.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn unsubscribe<H: ?Sized>(
        &self,
        key: impl Into<SubscriptionKey>,
        handler: &Arc<H>,
    ) -> Result<bool, EventBusError> {
        self.unsubscribe_id(key, HandlerId::of(handler))
    }

    /// Same as [`EventService::unsubscribe`], by identity.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn unsubscribe_id(
        &self,
        key: impl Into<SubscriptionKey>,
        id: HandlerId,
    ) -> Result<bool, EventBusError> {
        let key = key.into();
        key.validate()?;
        let removed = self.inner.state.write().subscribers.remove(&key, id);
        debug!(%key, removed, "Unsubscribe");
        Ok(removed)
    }

    /// Live subscribers a publication on `route` would reach, in delivery order.
    #[must_use]
    pub fn get_subscribers(&self, route: impl Into<Route>) -> Vec<Arc<dyn EventHandler>> {
        let route = route.into();
        self.inner.live_subscribers(|key| key.matches(&route))
    }

    /// Live subscribers registered under exactly `key`, in priority order.
    #[must_use]
    pub fn get_subscribers_to(
        &self,
        key: impl Into<SubscriptionKey>,
    ) -> Vec<Arc<dyn EventHandler>> {
        let key = key.into();
        self.inner.live_subscribers(|candidate| *candidate == key)
    }

    // --- veto listeners ----------------------------------------------------

    /// Weak veto listener with priority 0.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn subscribe_veto_listener<V: VetoListener>(
        &self,
        key: impl Into<SubscriptionKey>,
        listener: &Arc<V>,
    ) -> Result<bool, EventBusError> {
        self.subscribe_veto_with(key, VetoSubscription::weak(listener))
    }

    /// Strong veto listener with priority 0.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn subscribe_veto_listener_strongly<V: VetoListener>(
        &self,
        key: impl Into<SubscriptionKey>,
        listener: Arc<V>,
    ) -> Result<bool, EventBusError> {
        self.subscribe_veto_with(key, VetoSubscription::strong(listener))
    }

    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn subscribe_veto_with(
        &self,
        key: impl Into<SubscriptionKey>,
        subscription: VetoSubscription,
    ) -> Result<bool, EventBusError> {
        let key = key.into();
        key.validate()?;
        let VetoSubscription { held, id, priority } = subscription;
        let added = self.inner.state.write().vetoes.insert(key.clone(), id, held, priority);
        debug!(%key, priority, added, "Subscribe veto listener");
        Ok(added)
    }

    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn unsubscribe_veto_listener<V: ?Sized>(
        &self,
        key: impl Into<SubscriptionKey>,
        listener: &Arc<V>,
    ) -> Result<bool, EventBusError> {
        self.unsubscribe_veto_id(key, HandlerId::of(listener))
    }

    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn unsubscribe_veto_id(
        &self,
        key: impl Into<SubscriptionKey>,
        id: HandlerId,
    ) -> Result<bool, EventBusError> {
        let key = key.into();
        key.validate()?;
        let removed = self.inner.state.write().vetoes.remove(&key, id);
        debug!(%key, removed, "Unsubscribe veto listener");
        Ok(removed)
    }

    #[must_use]
    pub fn get_veto_subscribers(&self, route: impl Into<Route>) -> Vec<Arc<dyn VetoListener>> {
        let route = route.into();
        self.inner.live_vetoes(|key| key.matches(&route))
    }

    #[must_use]
    pub fn get_veto_subscribers_to(
        &self,
        key: impl Into<SubscriptionKey>,
    ) -> Vec<Arc<dyn VetoListener>> {
        let key = key.into();
        self.inner.live_vetoes(|candidate| *candidate == key)
    }

    /// Drops every subscriber and veto listener. Caches are kept.
    pub fn clear_all_subscribers(&self) {
        let mut state = self.inner.state.write();
        let subscribers = state.subscribers.clear();
        let vetoes = state.vetoes.clear();
        debug!(subscribers, vetoes, "Cleared all subscribers");
    }

    // --- publishing --------------------------------------------------------

    /// Publishes by runtime type, as described by [`Event::event_type`].
    ///
    /// # Errors
    /// [`EventBusError::ServiceStopped`] after [`EventService::shutdown`].
    pub fn publish<E: Event>(&self, event: E) -> Result<PublishOutcome, EventBusError> {
        self.publish_arc(Arc::new(event))
    }

    /// Publishes a shared event without copying it.
    ///
    /// # Errors
    /// [`EventBusError::ServiceStopped`] after [`EventService::shutdown`].
    pub fn publish_arc<E: Event>(&self, event: Arc<E>) -> Result<PublishOutcome, EventBusError> {
        let route = Route::Type(event.event_type());
        self.inner.submit(route, event, false)
    }

    /// Publishes a payload under an explicit descriptor, for hierarchies
    /// described by name rather than by Rust type.
    ///
    /// # Errors
    /// [`EventBusError::ServiceStopped`] after [`EventService::shutdown`].
    pub fn publish_as(
        &self,
        event_type: TypeDescriptor,
        payload: Payload,
    ) -> Result<PublishOutcome, EventBusError> {
        self.inner.submit(Route::Type(event_type), payload, false)
    }

    /// Publishes on a topic.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic and
    /// [`EventBusError::ServiceStopped`] after [`EventService::shutdown`].
    pub fn publish_topic<P: Any + Send + Sync>(
        &self,
        topic: &str,
        payload: P,
    ) -> Result<PublishOutcome, EventBusError> {
        self.publish_topic_arc(topic, Arc::new(payload))
    }

    /// # Errors
    /// See [`EventService::publish_topic`].
    pub fn publish_topic_arc(
        &self,
        topic: &str,
        payload: Payload,
    ) -> Result<PublishOutcome, EventBusError> {
        self.inner.submit(Route::from(topic), payload, false)
    }

    /// Blocks until every publication queued so far is delivered.
    /// A no-op for inline services and on the dispatch thread itself.
    ///
    /// # Panics
    /// When a confined service is flushed from within an async runtime.
    pub fn flush(&self) {
        if let Some(queue) = self.inner.queue.get() {
            queue.flush();
        }
    }

    /// Stops accepting publications. A confined service delivers what is
    /// already queued and joins its dispatch thread.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(queue) = self.inner.queue.get() {
            queue.close();
        }
        debug!(mode = ?self.inner.mode, "Event service stopped");
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    // --- status and timing -------------------------------------------------

    /// Registers a lifecycle observer; returns the id to remove it with.
    pub fn add_status_listener<L: StatusListener>(&self, listener: Arc<L>) -> HandlerId {
        let id = HandlerId::of(&listener);
        let mut listeners = self.inner.listeners.write();
        if !listeners.iter().any(|existing| HandlerId::of(existing) == id) {
            listeners.push(listener);
        }
        id
    }

    pub fn remove_status_listener(&self, id: HandlerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|existing| HandlerId::of(existing) != id);
        listeners.len() != before
    }

    /// Per-invocation time budget. While set, every subscriber and veto
    /// invocation is measured and published as a
    /// [`SubscriberTiming`](crate::SubscriberTiming) event. `None` disables timing.
    pub fn set_time_threshold(&self, threshold: Option<Duration>) {
        self.inner.state.write().time_threshold = threshold;
    }

    #[must_use]
    pub fn time_threshold(&self) -> Option<Duration> {
        self.inner.state.read().time_threshold
    }

    // --- cache -------------------------------------------------------------

    pub fn set_default_cache_size(&self, size: usize) {
        self.inner.state.write().cache.set_default_capacity(size);
    }

    #[must_use]
    pub fn default_cache_size(&self) -> usize {
        self.inner.state.read().cache.default_capacity()
    }

    /// Overrides the cache size for a topic, a pattern or a type (and its subtypes).
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic.
    pub fn set_cache_size(
        &self,
        key: impl Into<SubscriptionKey>,
        size: usize,
    ) -> Result<(), EventBusError> {
        let key = key.into();
        key.validate()?;
        self.inner.state.write().cache.set_capacity(key, size);
        Ok(())
    }

    /// Effective cache size for `route`.
    #[must_use]
    pub fn cache_size(&self, route: impl Into<Route>) -> usize {
        self.inner.state.read().cache.capacity(&route.into())
    }

    /// Cached payloads, most recent first.
    #[must_use]
    pub fn get_cached_items(&self, route: impl Into<Route>) -> Vec<Payload> {
        self.inner.state.read().cache.get(&route.into())
    }

    #[must_use]
    pub fn get_last_item(&self, route: impl Into<Route>) -> Option<Payload> {
        self.inner.state.read().cache.last(&route.into())
    }

    /// Cached events of type `E`, most recent first.
    #[must_use]
    pub fn cached<E: Event>(&self) -> Vec<Arc<E>> {
        self.get_cached_items(Route::of::<E>())
            .into_iter()
            .filter_map(|item| item.downcast::<E>().ok())
            .collect()
    }

    #[must_use]
    pub fn last<E: Event>(&self) -> Option<Arc<E>> {
        self.get_last_item(Route::of::<E>()).and_then(|item| item.downcast::<E>().ok())
    }

    pub fn clear_cache(&self, route: impl Into<Route>) {
        self.inner.state.write().cache.clear(&route.into());
    }

    /// Clears the cache of every topic `pattern` matches.
    ///
    /// # Errors
    /// See [`TopicPattern::new`].
    pub fn clear_cache_matching(&self, pattern: &str) -> Result<(), EventBusError> {
        let pattern = TopicPattern::new(pattern)?;
        self.inner.state.write().cache.clear_matching(&pattern);
        Ok(())
    }

    pub fn clear_all_caches(&self) {
        self.inner.state.write().cache.clear_all();
    }
}

impl Inner {
    fn new(mode: DispatchMode, state: State) -> Self {
        Self {
            state: RwLock::new(state),
            listeners: RwLock::new(Vec::new()),
            mode,
            queue: OnceLock::new(),
            stopped: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        }
    }

    fn live_subscribers(
        &self,
        filter: impl FnMut(&SubscriptionKey) -> bool,
    ) -> Vec<Arc<dyn EventHandler>> {
        let candidates = self.state.read().subscribers.candidates(filter);
        let (live, stale) = registry::resolve(candidates);
        if !stale.is_empty() {
            self.state.write().subscribers.prune(&stale);
        }
        live.into_iter().map(|entry| entry.target).collect()
    }

    fn live_vetoes(
        &self,
        filter: impl FnMut(&SubscriptionKey) -> bool,
    ) -> Vec<Arc<dyn VetoListener>> {
        let candidates = self.state.read().vetoes.candidates(filter);
        let (live, stale) = registry::resolve(candidates);
        if !stale.is_empty() {
            self.state.write().vetoes.prune(&stale);
        }
        live.into_iter().map(|entry| entry.target).collect()
    }

    fn submit(
        &self,
        route: Route,
        payload: Payload,
        telemetry: bool,
    ) -> Result<PublishOutcome, EventBusError> {
        route.validate()?;
        if self.stopped.load(Ordering::Acquire) {
            return Err(EventBusError::ServiceStopped {
                message: "publish after shutdown".into(),
                context: Some(route.to_string().into()),
            });
        }

        let publication = Publication {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            route,
            payload,
            telemetry,
        };
        self.notify(&publication, PublicationStatus::Initiated);

        let (vetoes, subscribers, threshold) = {
            let state = self.state.read();
            let matches = |key: &SubscriptionKey| key.matches(&publication.route);
            (
                state.vetoes.candidates(matches),
                state.subscribers.candidates(matches),
                state.time_threshold,
            )
        };

        if self.vetoed(&publication, vetoes, threshold) {
            debug!(route = %publication.route, id = publication.id, "Publication vetoed");
            self.notify(&publication, PublicationStatus::Vetoed);
            return Ok(PublishOutcome::Vetoed);
        }

        self.notify(&publication, PublicationStatus::Queued);
        let pending = Pending { publication, subscribers, threshold };
        match self.mode {
            DispatchMode::Inline => Ok(PublishOutcome::Completed(self.deliver(pending))),
            DispatchMode::Confined => {
                let queue = self.queue.get().ok_or_else(|| EventBusError::Internal {
                    message: "confined service has no dispatch queue".into(),
                    context: None,
                })?;
                queue.enqueue(pending)?;
                Ok(PublishOutcome::Queued)
            },
        }
    }

    /// Runs veto listeners in priority order on the publishing thread and
    /// stops at the first veto. A panicking listener counts as "no veto".
    fn vetoed(
        &self,
        publication: &Publication,
        candidates: Vec<Candidate<dyn VetoListener>>,
        threshold: Option<Duration>,
    ) -> bool {
        if candidates.is_empty() {
            return false;
        }
        let (live, stale) = registry::resolve(candidates);

        let delivery = publication.delivery();
        let mut vetoed = false;
        for entry in &live {
            let watch = Stopwatch::start();
            let verdict = catch_unwind(AssertUnwindSafe(|| entry.target.should_veto(&delivery)));
            self.record_timing(
                publication,
                watch,
                || entry.target.name(),
                InvocationKind::Veto,
                threshold,
            );
            match verdict {
                Ok(true) => {
                    trace!(listener = %entry.target.name(), "Veto");
                    vetoed = true;
                    break;
                },
                Ok(false) => {},
                Err(panic) => {
                    warn!(
                        listener = %entry.target.name(),
                        route = %publication.route,
                        "Veto listener panicked, treating as no veto: {}",
                        panic_message(panic.as_ref())
                    );
                },
            }
        }

        if !stale.is_empty() {
            self.state.write().vetoes.prune(&stale);
        }
        vetoed
    }

    /// Invokes every matching subscriber in order, isolating faults, then
    /// records the payload in the recency cache.
    fn deliver(&self, pending: Pending) -> DeliveryReport {
        let Pending { publication, subscribers, threshold } = pending;
        let publication = &publication;
        self.notify(publication, PublicationStatus::Publishing);
        let (live, stale) = registry::resolve(subscribers);
        trace!(
            route = %publication.route,
            id = publication.id,
            subscribers = live.len(),
            "Publishing"
        );

        let delivery = publication.delivery();
        let mut faults = 0;
        for entry in &live {
            let watch = Stopwatch::start();
            let outcome = match catch_unwind(AssertUnwindSafe(|| entry.target.handle(&delivery))) {
                Ok(result) => result.map_err(|error| error.to_string()),
                Err(panic) => Err(panic_message(panic.as_ref())),
            };
            self.record_timing(
                publication,
                watch,
                || entry.target.name(),
                InvocationKind::Subscriber,
                threshold,
            );

            let faulted = outcome.is_err();
            if let Err(message) = outcome {
                faults += 1;
                self.report_fault(publication, entry.target.name(), message);
            }
            let status = PublicationStatus::Delivered { subscriber: entry.id, faulted };
            self.notify(publication, status);
        }

        {
            let mut state = self.state.write();
            state.cache.record(&publication.route, Arc::clone(&publication.payload));
            if !stale.is_empty() {
                state.subscribers.prune(&stale);
            }
        }

        self.notify(publication, PublicationStatus::Completed);
        DeliveryReport { publication_id: publication.id, delivered: live.len(), faults }
    }

    fn report_fault(
        &self,
        publication: &Publication,
        subscriber: Cow<'static, str>,
        message: String,
    ) {
        warn!(
            %subscriber,
            route = %publication.route,
            id = publication.id,
            "Subscriber fault: {message}"
        );
        if publication.telemetry {
            return;
        }
        let fault = DeliveryFault {
            publication_id: publication.id,
            route: publication.route.clone(),
            subscriber,
            message,
        };
        self.publish_telemetry(fault);
    }

    fn record_timing(
        &self,
        publication: &Publication,
        watch: Stopwatch,
        subscriber: impl FnOnce() -> Cow<'static, str>,
        kind: InvocationKind,
        threshold: Option<Duration>,
    ) {
        let Some(limit) = threshold else {
            return;
        };
        if publication.telemetry {
            return;
        }
        let timing = watch.finish(publication, subscriber(), kind, limit);
        if timing.exceeded {
            warn!(
                subscriber = %timing.subscriber,
                route = %publication.route,
                elapsed_ms = timing.elapsed.as_millis(),
                limit_ms = limit.as_millis(),
                "Invocation exceeded time threshold"
            );
        }
        self.publish_telemetry(timing);
    }

    fn publish_telemetry<E: Event>(&self, event: E) {
        let route = Route::Type(event.event_type());
        if let Err(error) = self.submit(route, Arc::new(event), true) {
            trace!("Telemetry dropped: {error}");
        }
    }

    fn notify(&self, publication: &Publication, status: PublicationStatus) {
        let listeners = {
            let listeners = self.listeners.read();
            if listeners.is_empty() {
                return;
            }
            listeners.clone()
        };
        for listener in listeners {
            if let Err(panic) =
                catch_unwind(AssertUnwindSafe(|| listener.on_status(publication, status)))
            {
                warn!(?status, "Status listener panicked: {}", panic_message(panic.as_ref()));
            }
        }
    }
}

/// Programmatic construction of an [`EventService`].
///
/// ```rust
/// use relay_event_bus::{DispatchMode, EventService};
///
/// # fn main() -> Result<(), relay_event_bus::EventBusError> {
/// let bus = EventService::builder()
///     .default_cache_size(10)
///     .cache_size("audit", 100)
///     .dispatch(DispatchMode::Confined)
///     .build()?;
/// assert_eq!(bus.cache_size("audit"), 100);
/// bus.shutdown();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct EventServiceBuilder {
    default_cache_size: usize,
    cache_sizes: Vec<(SubscriptionKey, usize)>,
    time_threshold: Option<Duration>,
    mode: DispatchMode,
    thread_name: Option<String>,
}

impl EventServiceBuilder {
    #[must_use]
    pub const fn default_cache_size(mut self, size: usize) -> Self {
        self.default_cache_size = size;
        self
    }

    #[must_use]
    pub fn cache_size(mut self, key: impl Into<SubscriptionKey>, size: usize) -> Self {
        self.cache_sizes.push((key.into(), size));
        self
    }

    #[must_use]
    pub const fn time_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.time_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn dispatch(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Name of the confined dispatch thread.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// # Errors
    /// [`EventBusError::InvalidKey`] for an empty topic among the cache sizes,
    /// [`EventBusError::Spawn`] if the confined dispatch thread cannot start.
    pub fn build(self) -> Result<EventService, EventBusError> {
        let mut cache = RecencyCache::new(self.default_cache_size);
        for (key, size) in self.cache_sizes {
            key.validate()?;
            cache.set_capacity(key, size);
        }
        let state = State { cache, time_threshold: self.time_threshold, ..State::default() };
        let inner = Arc::new(Inner::new(self.mode, state));

        if self.mode == DispatchMode::Confined {
            let name = self.thread_name.as_deref().unwrap_or(DEFAULT_DISPATCH_THREAD);
            let weak = Arc::downgrade(&inner);
            let queue = ConfinedQueue::spawn(name, move |pending: Pending| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(pending);
                }
            })?;
            if inner.queue.set(queue).is_err() {
                return Err("dispatch queue initialized twice".into());
            }
        }

        Ok(EventService { inner })
    }
}
