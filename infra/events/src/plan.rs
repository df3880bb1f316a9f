use crate::bus::EventService;
use crate::descriptor::Event;
use crate::error::EventBusError;
use crate::handler::{
    Delivery, EventHandler, HandlerError, HandlerId, HandlerOutcome, ReferenceStrength,
    Subscription, VetoListener, VetoSubscription,
};
use crate::key::SubscriptionKey;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

type Method<T> = Arc<dyn Fn(&T, &Delivery<'_>) -> Result<(), HandlerError> + Send + Sync>;
type VetoMethod<T> = Arc<dyn Fn(&T, &Delivery<'_>) -> bool + Send + Sync>;

/// Objects that describe their own subscriber and veto methods.
///
/// [`EventService::register`] calls [`Subscribes::describe`] once per object
/// and feeds every planned method through the regular subscribe calls.
///
/// ```rust
/// use relay_event_bus::{Delivery, Event, EventService, RegistrationPlan, Subscribes};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct OrderPlaced(u32);
/// impl Event for OrderPlaced {}
///
/// #[derive(Default)]
/// struct Ledger { total: AtomicUsize }
///
/// impl Ledger {
///     fn on_order(&self, order: &OrderPlaced) {
///         self.total.fetch_add(order.0 as usize, Ordering::SeqCst);
///     }
///     fn reject_refunds(&self, delivery: &Delivery<'_>) -> bool {
///         delivery.topic() == Some("refunds.disabled")
///     }
/// }
///
/// impl Subscribes for Ledger {
///     fn describe(plan: &mut RegistrationPlan<Self>) {
///         plan.on_event(Self::on_order).priority(-10).named("on_order");
///         plan.veto("refunds.disabled", Self::reject_refunds);
///     }
/// }
///
/// # fn main() -> Result<(), relay_event_bus::EventBusError> {
/// let bus = EventService::new();
/// let ledger = Arc::new(Ledger::default());
/// let registration = bus.register(&ledger)?;
///
/// bus.publish(OrderPlaced(5))?;
/// assert_eq!(ledger.total.load(Ordering::SeqCst), 5);
/// assert_eq!(bus.unregister(&registration), 2);
/// # Ok(())
/// # }
/// ```
pub trait Subscribes: Send + Sync + Sized + 'static {
    fn describe(plan: &mut RegistrationPlan<Self>);
}

/// Options of one planned method.
#[derive(Debug, Clone, Default)]
pub struct PlannedSubscription {
    priority: i32,
    strength: ReferenceStrength,
    name: Option<Cow<'static, str>>,
}

impl PlannedSubscription {
    /// Lower runs earlier; default 0.
    pub const fn priority(&mut self, priority: i32) -> &mut Self {
        self.priority = priority;
        self
    }

    /// Keep the object alive for as long as the registration stands.
    /// By default the registration follows the caller's ownership of the object.
    pub const fn strongly(&mut self) -> &mut Self {
        self.strength = ReferenceStrength::Strong;
        self
    }

    /// Name used in logs and telemetry, appended to the object's type name.
    pub fn named(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.name = Some(name.into());
        self
    }
}

enum Callback<T> {
    Handler(Method<T>),
    Veto(VetoMethod<T>),
}

struct Planned<T> {
    key: Result<SubscriptionKey, EventBusError>,
    callback: Callback<T>,
    options: PlannedSubscription,
}

/// The subscriber and veto methods of one object type.
pub struct RegistrationPlan<T> {
    entries: Vec<Planned<T>>,
}

impl<T> fmt::Debug for RegistrationPlan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationPlan").field("entries", &self.entries.len()).finish()
    }
}

impl<T: Subscribes> RegistrationPlan<T> {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(
        &mut self,
        key: Result<SubscriptionKey, EventBusError>,
        callback: Callback<T>,
    ) -> &mut PlannedSubscription {
        self.entries.push(Planned { key, callback, options: PlannedSubscription::default() });
        let index = self.entries.len() - 1;
        &mut self.entries[index].options
    }

    /// Plans `method` under any key.
    pub fn on<F, R>(
        &mut self,
        key: impl Into<SubscriptionKey>,
        method: F,
    ) -> &mut PlannedSubscription
    where
        F: Fn(&T, &Delivery<'_>) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let method: Method<T> = Arc::new(move |target: &T, delivery: &Delivery<'_>| {
            method(target, delivery).into_outcome()
        });
        self.push(Ok(key.into()), Callback::Handler(method))
    }

    /// Plans a typed method for events of exactly type `E`.
    pub fn on_event<E, F, R>(&mut self, method: F) -> &mut PlannedSubscription
    where
        E: Event,
        F: Fn(&T, &E) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let method: Method<T> = Arc::new(move |target: &T, delivery: &Delivery<'_>| {
            let Some(event) = delivery.downcast_ref::<E>() else {
                return Ok(());
            };
            method(target, event).into_outcome()
        });
        self.push(Ok(SubscriptionKey::exactly::<E>()), Callback::Handler(method))
    }

    /// Plans `method` for every topic `pattern` matches. An invalid pattern
    /// fails the registration.
    pub fn on_pattern<F, R>(&mut self, pattern: &str, method: F) -> &mut PlannedSubscription
    where
        F: Fn(&T, &Delivery<'_>) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let method: Method<T> = Arc::new(move |target: &T, delivery: &Delivery<'_>| {
            method(target, delivery).into_outcome()
        });
        self.push(SubscriptionKey::pattern(pattern), Callback::Handler(method))
    }

    /// Plans a veto method.
    pub fn veto<F>(
        &mut self,
        key: impl Into<SubscriptionKey>,
        method: F,
    ) -> &mut PlannedSubscription
    where
        F: Fn(&T, &Delivery<'_>) -> bool + Send + Sync + 'static,
    {
        self.push(Ok(key.into()), Callback::Veto(Arc::new(method)))
    }
}

enum Target<T> {
    Strong(Arc<T>),
    Weak(Weak<T>),
}

impl<T> Target<T> {
    fn new(object: &Arc<T>, strength: ReferenceStrength) -> Self {
        match strength {
            ReferenceStrength::Strong => Self::Strong(Arc::clone(object)),
            ReferenceStrength::Weak => Self::Weak(Arc::downgrade(object)),
        }
    }

    fn get(&self) -> Option<Arc<T>> {
        match self {
            Self::Strong(object) => Some(Arc::clone(object)),
            Self::Weak(object) => object.upgrade(),
        }
    }
}

struct Bound<T, M> {
    target: Target<T>,
    method: M,
    name: Cow<'static, str>,
}

impl<T: Send + Sync + 'static> EventHandler for Bound<T, Method<T>> {
    fn handle(&self, delivery: &Delivery<'_>) -> Result<(), HandlerError> {
        self.target.get().map_or(Ok(()), |object| (self.method)(&object, delivery))
    }

    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }
}

impl<T: Send + Sync + 'static> VetoListener for Bound<T, VetoMethod<T>> {
    fn should_veto(&self, delivery: &Delivery<'_>) -> bool {
        self.target.get().is_some_and(|object| (self.method)(&object, delivery))
    }

    fn name(&self) -> Cow<'static, str> {
        self.name.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Subscriber,
    Veto,
}

/// Everything one [`EventService::register`] call subscribed.
#[derive(Debug, Clone)]
#[must_use = "dropping a Registration leaves the object subscribed"]
pub struct Registration {
    entries: Vec<(SubscriptionKey, HandlerId, Kind)>,
}

impl Registration {
    /// Number of subscriptions made, veto listeners included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys the object was subscribed to, in plan order.
    pub fn keys(&self) -> impl Iterator<Item = &SubscriptionKey> {
        self.entries.iter().map(|(key, _, _)| key)
    }
}

impl EventService {
    /// Subscribes every method `T` describes for `object`.
    ///
    /// Weak entries (the default) stay registered only while the caller keeps
    /// `object` alive; they are pruned on the first publication after that.
    /// Each planned method is identified by the object and its place in the
    /// plan, so registering the same object again adds nothing.
    ///
    /// # Errors
    /// [`EventBusError::InvalidKey`] or [`EventBusError::InvalidPattern`] if any
    /// planned key is unusable; nothing is subscribed in that case.
    pub fn register<T: Subscribes>(&self, object: &Arc<T>) -> Result<Registration, EventBusError> {
        let mut plan = RegistrationPlan::<T>::new();
        T::describe(&mut plan);

        let mut planned = Vec::with_capacity(plan.entries.len());
        for entry in plan.entries {
            let key = entry.key?;
            key.validate()?;
            planned.push((key, entry.callback, entry.options));
        }

        let type_name = std::any::type_name::<T>();
        let mut entries = Vec::with_capacity(planned.len());
        for (index, (key, callback, options)) in planned.into_iter().enumerate() {
            let name: Cow<'static, str> = match &options.name {
                Some(name) => format!("{type_name}::{name}").into(),
                None => format!("{type_name}#{index}").into(),
            };
            let target = Target::new(object, options.strength);
            let id = HandlerId::method_of(object, index);
            let kind = match callback {
                Callback::Handler(method) => {
                    let bound = Arc::new(Bound { target, method, name });
                    let subscription = match options.strength {
                        ReferenceStrength::Strong => Subscription::strong(bound),
                        ReferenceStrength::Weak => Subscription::probed(bound, alive(object)),
                    };
                    let subscription = subscription.identified(id).priority(options.priority);
                    self.subscribe_with(key.clone(), subscription)?;
                    Kind::Subscriber
                },
                Callback::Veto(method) => {
                    let bound = Arc::new(Bound { target, method, name });
                    let subscription = match options.strength {
                        ReferenceStrength::Strong => VetoSubscription::strong(bound),
                        ReferenceStrength::Weak => VetoSubscription::probed(bound, alive(object)),
                    };
                    let subscription = subscription.identified(id).priority(options.priority);
                    self.subscribe_veto_with(key.clone(), subscription)?;
                    Kind::Veto
                },
            };
            entries.push((key, id, kind));
        }

        debug!(object = type_name, subscriptions = entries.len(), "Registered");
        Ok(Registration { entries })
    }

    /// Removes everything `registration` subscribed; returns how many entries
    /// were still present.
    pub fn unregister(&self, registration: &Registration) -> usize {
        registration
            .entries
            .iter()
            .map(|(key, id, kind)| match kind {
                Kind::Subscriber => self.unsubscribe_id(key.clone(), *id),
                Kind::Veto => self.unsubscribe_veto_id(key.clone(), *id),
            })
            .filter(|removed| matches!(removed, Ok(true)))
            .count()
    }
}

/// Liveness probe of a weakly registered object.
fn alive<T: Send + Sync + 'static>(object: &Arc<T>) -> impl Fn() -> bool + Send + Sync + 'static {
    let owner = Arc::downgrade(object);
    move || owner.strong_count() > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Tick(u32);
    impl Event for Tick {}

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn on_tick(&self, tick: &Tick) {
            self.seen.lock().push(format!("tick:{}", tick.0));
        }

        fn on_alert(&self, delivery: &Delivery<'_>) -> Result<(), String> {
            let topic = delivery.topic().ok_or("no topic")?;
            self.seen.lock().push(format!("alert:{topic}"));
            Ok(())
        }

        fn early(&self, _: &Delivery<'_>) {
            self.seen.lock().push("early".to_owned());
        }

        fn block_muted(&self, delivery: &Delivery<'_>) -> bool {
            delivery.topic() == Some("alerts.muted")
        }
    }

    impl Subscribes for Recorder {
        fn describe(plan: &mut RegistrationPlan<Self>) {
            plan.on_event(Self::on_tick);
            plan.on_pattern("alerts\\..*", Self::on_alert).named("on_alert");
            plan.on("alerts.disk", Self::early).priority(-5);
            plan.veto("alerts.muted", Self::block_muted);
        }
    }

    struct Broken;

    impl Subscribes for Broken {
        fn describe(plan: &mut RegistrationPlan<Self>) {
            plan.on("fine", |_: &Self, _: &Delivery<'_>| ());
            plan.on_pattern("(", |_: &Self, _: &Delivery<'_>| ());
        }
    }

    #[test]
    fn test_register_routes_methods() {
        let bus = EventService::new();
        let recorder = Arc::new(Recorder::default());
        let registration = bus.register(&recorder).unwrap();
        assert_eq!(registration.len(), 4);

        bus.publish(Tick(3)).unwrap();
        bus.publish_topic("alerts.disk", ()).unwrap();
        assert!(bus.publish_topic("alerts.muted", ()).unwrap().is_vetoed());

        assert_eq!(*recorder.seen.lock(), vec!["tick:3", "early", "alert:alerts.disk"]);

        let names: Vec<String> =
            bus.get_subscribers("alerts.disk").iter().map(|s| s.name().into_owned()).collect();
        assert!(names[1].ends_with("Recorder::on_alert"));

        assert_eq!(bus.unregister(&registration), 4);
        assert_eq!(bus.unregister(&registration), 0);
        bus.publish(Tick(4)).unwrap();
        assert_eq!(recorder.seen.lock().len(), 3);
    }

    #[test]
    fn test_registering_twice_adds_nothing() {
        let bus = EventService::new();
        let recorder = Arc::new(Recorder::default());
        let first = bus.register(&recorder).unwrap();
        let second = bus.register(&recorder).unwrap();
        assert_eq!(second.len(), first.len());

        let outcome = bus.publish(Tick(1)).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(1));
        assert_eq!(*recorder.seen.lock(), vec!["tick:1"]);
        assert_eq!(bus.get_subscribers_to(SubscriptionKey::exactly::<Tick>()).len(), 1);
        assert_eq!(bus.get_veto_subscribers_to("alerts.muted").len(), 1);

        assert_eq!(bus.unregister(&second), 4);
        assert_eq!(bus.unregister(&first), 0);
    }

    #[test]
    fn test_weak_registration_follows_the_object() {
        let bus = EventService::new();
        let recorder = Arc::new(Recorder::default());
        let _registration = bus.register(&recorder).unwrap();
        assert_eq!(bus.get_subscribers_to(SubscriptionKey::exactly::<Tick>()).len(), 1);

        drop(recorder);
        assert!(bus.get_subscribers_to(SubscriptionKey::exactly::<Tick>()).is_empty());
        assert!(bus.get_veto_subscribers("alerts.muted").is_empty());
    }

    #[test]
    fn test_strong_registration_keeps_the_object() {
        struct Counter(Mutex<u32>);
        impl Subscribes for Counter {
            fn describe(plan: &mut RegistrationPlan<Self>) {
                plan.on_event(|this: &Self, _: &Tick| *this.0.lock() += 1).strongly();
            }
        }

        let bus = EventService::new();
        let counter = Arc::new(Counter(Mutex::new(0)));
        let registration = bus.register(&counter).unwrap();
        let observer = Arc::downgrade(&counter);
        drop(counter);

        bus.publish(Tick(1)).unwrap();
        assert_eq!(observer.upgrade().map(|c| *c.0.lock()), Some(1));

        bus.unregister(&registration);
        assert!(observer.upgrade().is_none());
    }

    #[test]
    fn test_invalid_plan_subscribes_nothing() {
        let bus = EventService::new();
        let broken = Arc::new(Broken);
        assert!(matches!(bus.register(&broken), Err(EventBusError::InvalidPattern { .. })));
        assert!(bus.get_subscribers_to("fine").is_empty());
    }
}
