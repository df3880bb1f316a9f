use crate::descriptor::TypeDescriptor;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

/// Shared, type-erased payload of a publication.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Error a handler may return to report a fault.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Liveness check consulted before a probed entry is invoked.
pub type LivenessProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// What a subscriber or veto listener sees for one publication.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub(crate) topic: Option<&'a str>,
    pub(crate) event_type: Option<&'a TypeDescriptor>,
    pub(crate) payload: &'a Payload,
}

impl<'a> Delivery<'a> {
    /// Topic of a topic publication.
    #[must_use]
    pub const fn topic(&self) -> Option<&'a str> {
        self.topic
    }

    /// Runtime type descriptor of a type publication.
    #[must_use]
    pub const fn event_type(&self) -> Option<&'a TypeDescriptor> {
        self.event_type
    }

    #[must_use]
    pub const fn payload(&self) -> &'a Payload {
        self.payload
    }

    /// Downcasts the payload to its concrete type.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&'a T> {
        self.payload.downcast_ref::<T>()
    }
}

/// A subscriber callback.
///
/// Returning `Err` (or panicking) counts as a fault for this subscriber only;
/// the remaining subscribers of the publication still run.
///
/// Closures taking `&Delivery` and returning `()` or `Result<(), E>` implement
/// this trait; [`handler`] helps type inference for them.
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one publication.
    ///
    /// # Errors
    /// Any error is recorded as a subscriber fault.
    fn handle(&self, delivery: &Delivery<'_>) -> Result<(), HandlerError>;

    /// Name used in logs and telemetry.
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

/// Return values accepted from closure handlers.
pub trait HandlerOutcome {
    /// Normalizes the closure result.
    ///
    /// # Errors
    /// Propagates the handler's own error.
    fn into_outcome(self) -> Result<(), HandlerError>;
}

impl HandlerOutcome for () {
    fn into_outcome(self) -> Result<(), HandlerError> {
        Ok(())
    }
}

impl<E: Into<HandlerError>> HandlerOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), HandlerError> {
        self.map_err(Into::into)
    }
}

impl<F, R> EventHandler for F
where
    F: Fn(&Delivery<'_>) -> R + Send + Sync + 'static,
    R: HandlerOutcome,
{
    fn handle(&self, delivery: &Delivery<'_>) -> Result<(), HandlerError> {
        self(delivery).into_outcome()
    }
}

/// A pre-delivery check; returning `true` cancels the whole publication.
///
/// A panicking check is treated as "no veto".
pub trait VetoListener: Send + Sync + 'static {
    fn should_veto(&self, delivery: &Delivery<'_>) -> bool;

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }
}

impl<F> VetoListener for F
where
    F: Fn(&Delivery<'_>) -> bool + Send + Sync + 'static,
{
    fn should_veto(&self, delivery: &Delivery<'_>) -> bool {
        self(delivery)
    }
}

/// Wraps a closure as a shareable [`EventHandler`].
pub fn handler<F, R>(f: F) -> Arc<F>
where
    F: Fn(&Delivery<'_>) -> R + Send + Sync + 'static,
    R: HandlerOutcome,
{
    Arc::new(f)
}

/// Wraps a closure as a shareable [`VetoListener`].
pub fn veto<F>(f: F) -> Arc<F>
where
    F: Fn(&Delivery<'_>) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of a registered callback: the address of its shared allocation,
/// or for a registered method, the address of the object plus the method's
/// position in its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId {
    addr: usize,
    method: Option<usize>,
}

impl HandlerId {
    #[must_use]
    pub fn of<T: ?Sized>(target: &Arc<T>) -> Self {
        Self { addr: Arc::as_ptr(target).cast::<()>().addr(), method: None }
    }

    fn of_weak<T: ?Sized>(target: &Weak<T>) -> Self {
        Self { addr: Weak::as_ptr(target).cast::<()>().addr(), method: None }
    }

    pub(crate) fn method_of<T: ?Sized>(object: &Arc<T>, index: usize) -> Self {
        Self { method: Some(index), ..Self::of(object) }
    }
}

/// Whether a subscription keeps its callback alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReferenceStrength {
    /// Follows the caller's ownership: the entry dies with the caller's last `Arc`.
    #[default]
    Weak,
    /// Kept alive until explicitly unsubscribed.
    Strong,
}

/// How the registry holds a callback.
pub(crate) enum Held<T: ?Sized> {
    Strong(Arc<T>),
    Weak(Weak<T>),
    Probed { target: Arc<T>, probe: LivenessProbe },
}

impl<T: ?Sized> Held<T> {
    pub(crate) fn id(&self) -> HandlerId {
        match self {
            Self::Strong(target) | Self::Probed { target, .. } => HandlerId::of(target),
            Self::Weak(target) => HandlerId::of_weak(target),
        }
    }

    pub(crate) const fn strength(&self) -> ReferenceStrength {
        match self {
            Self::Weak(_) | Self::Probed { .. } => ReferenceStrength::Weak,
            Self::Strong(_) => ReferenceStrength::Strong,
        }
    }

    /// Cheap check that does not run probes.
    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::Weak(target) => target.strong_count() > 0,
            Self::Strong(_) | Self::Probed { .. } => true,
        }
    }

    /// Returns the callback if its owner is still around.
    pub(crate) fn resolve(&self) -> Option<Arc<T>> {
        match self {
            Self::Strong(target) => Some(Arc::clone(target)),
            Self::Weak(target) => target.upgrade(),
            Self::Probed { target, probe } => {
                let alive = catch_unwind(AssertUnwindSafe(|| probe())).unwrap_or(false);
                alive.then(|| Arc::clone(target))
            },
        }
    }
}

impl<T: ?Sized> Clone for Held<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Strong(target) => Self::Strong(Arc::clone(target)),
            Self::Weak(target) => Self::Weak(Weak::clone(target)),
            Self::Probed { target, probe } => {
                Self::Probed { target: Arc::clone(target), probe: Arc::clone(probe) }
            },
        }
    }
}

impl<T: ?Sized> fmt::Debug for Held<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Strong(_) => "Strong",
            Self::Weak(_) => "Weak",
            Self::Probed { .. } => "Probed",
        };
        f.debug_tuple(kind).field(&self.id()).finish()
    }
}

macro_rules! subscription_builder {
    ($(#[$doc:meta])* $name:ident, $target:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub(crate) held: Held<dyn $target>,
            pub(crate) id: HandlerId,
            pub(crate) priority: i32,
        }

        impl $name {
            /// Ownership-following entry; the caller keeps the `Arc` alive.
            pub fn weak<H: $target>(target: &Arc<H>) -> Self {
                let target = Arc::clone(target) as Arc<dyn $target>;
                Self::from_held(Held::Weak(Arc::downgrade(&target)))
            }

            /// Durable entry; lives until unsubscribed.
            pub fn strong<H: $target>(target: Arc<H>) -> Self {
                Self::from_held(Held::Strong(target as Arc<dyn $target>))
            }

            /// Entry kept while `probe` answers `true`; pruned on the first `false`.
            pub fn probed<H, P>(target: Arc<H>, probe: P) -> Self
            where
                H: $target,
                P: Fn() -> bool + Send + Sync + 'static,
            {
                let target = target as Arc<dyn $target>;
                Self::from_held(Held::Probed { target, probe: Arc::new(probe) })
            }

            fn from_held(held: Held<dyn $target>) -> Self {
                let id = held.id();
                Self { held, id, priority: 0 }
            }

            /// Registers under `id` instead of the callback's own address.
            pub(crate) const fn identified(mut self, id: HandlerId) -> Self {
                self.id = id;
                self
            }

            /// Lower runs earlier; default 0.
            #[must_use]
            pub const fn priority(mut self, priority: i32) -> Self {
                self.priority = priority;
                self
            }

            #[must_use]
            pub const fn strength(&self) -> ReferenceStrength {
                self.held.strength()
            }

            #[must_use]
            pub const fn id(&self) -> HandlerId {
                self.id
            }
        }
    };
}

subscription_builder!(
    /// A subscriber entry ready to register.
    ///
    /// ```rust
    /// use relay_event_bus::{Subscription, handler};
    ///
    /// let audit = handler(|_| ());
    /// let entry = Subscription::weak(&audit).priority(-10);
    /// ```
    Subscription,
    EventHandler
);

subscription_builder!(
    /// A veto listener entry ready to register.
    VetoSubscription,
    VetoListener
);
