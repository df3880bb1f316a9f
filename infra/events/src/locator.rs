use crate::bus::EventService;
use crate::dispatch::DispatchMode;
use crate::error::EventBusError;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::sync::LazyLock;
use tracing::debug;

/// Well-known name of the default inline service.
pub const EVENT_BUS: &str = "EventBus";

/// Well-known name of the default confined service.
pub const CONFINED_EVENT_BUS: &str = "ConfinedEventBus";

static SERVICES: LazyLock<RwLock<FxHashMap<String, EventService>>> =
    LazyLock::new(|| RwLock::new(FxHashMap::default()));

/// Process-wide map from name to [`EventService`].
///
/// Prefer passing a service to the code that needs it; the locator is for
/// code that cannot be handed one. Well-known names are created on first
/// lookup, any other name must be [`set`](ServiceLocator::set) first.
#[derive(Debug, Clone, Copy)]
pub struct ServiceLocator;

impl ServiceLocator {
    /// The default inline service.
    ///
    /// # Errors
    /// Never for this name in practice; see [`ServiceLocator::get`].
    pub fn event_bus() -> Result<EventService, EventBusError> {
        Self::get(EVENT_BUS)
    }

    /// The default confined service.
    ///
    /// # Errors
    /// [`EventBusError::Spawn`] if its dispatch thread cannot start.
    pub fn confined_event_bus() -> Result<EventService, EventBusError> {
        Self::get(CONFINED_EVENT_BUS)
    }

    /// Looks up `name`, creating the well-known services lazily.
    ///
    /// # Errors
    /// [`EventBusError::NotFound`] for an unbound name that is not well-known.
    pub fn get(name: &str) -> Result<EventService, EventBusError> {
        if let Some(service) = SERVICES.read().get(name) {
            return Ok(service.clone());
        }

        let mode = match name {
            EVENT_BUS => DispatchMode::Inline,
            CONFINED_EVENT_BUS => DispatchMode::Confined,
            _ => {
                return Err(EventBusError::NotFound {
                    message: name.to_owned().into(),
                    context: Some("service locator".into()),
                });
            },
        };

        let mut services = SERVICES.write();
        if let Some(service) = services.get(name) {
            return Ok(service.clone());
        }
        let service = EventService::builder().dispatch(mode).build()?;
        services.insert(name.to_owned(), service.clone());
        debug!(name, ?mode, "Created well-known event service");
        Ok(service)
    }

    /// Binds `name` once.
    ///
    /// # Errors
    /// [`EventBusError::AlreadyBound`] if a service is already bound to `name`,
    /// including a lazily created well-known one.
    pub fn set(name: &str, service: EventService) -> Result<(), EventBusError> {
        let mut services = SERVICES.write();
        if services.contains_key(name) {
            return Err(EventBusError::AlreadyBound {
                message: name.to_owned().into(),
                context: Some("service locator".into()),
            });
        }
        services.insert(name.to_owned(), service);
        debug!(name, "Bound event service");
        Ok(())
    }

    #[must_use]
    pub fn contains(name: &str) -> bool {
        SERVICES.read().contains_key(name)
    }

    /// Unbinds everything. Meant for resetting state between isolated tests;
    /// services still held elsewhere keep working.
    pub fn clear_all() {
        let count = {
            let mut services = SERVICES.write();
            let count = services.len();
            services.clear();
            count
        };
        debug!(count, "Cleared service locator");
    }
}
