use parking_lot::Mutex;
use relay_event_bus::{
    Delivery, Event, EventHandler, Publication, PublicationStatus, StatusListener, TypeArg,
    TypeDescriptor, handler,
};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestEvent(pub usize);

impl Event for TestEvent {}

pub struct Food;
pub struct IceCream;

/// `Vanilla <: IceCream <: Food`.
#[derive(Debug, PartialEq, Eq)]
pub struct Vanilla(pub u32);

impl Event for Vanilla {
    fn event_type(&self) -> TypeDescriptor {
        vanilla_type()
    }
}

#[derive(Debug)]
pub struct Brick;

impl Event for Brick {}

pub fn vanilla_type() -> TypeDescriptor {
    TypeDescriptor::of::<Vanilla>().with_supertype(
        TypeDescriptor::of::<IceCream>().with_supertype(TypeDescriptor::of::<Food>()),
    )
}

pub fn list_of(arg: TypeArg) -> TypeDescriptor {
    TypeDescriptor::named("List").with_arg(arg)
}

/// Ordered record of what ran.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries.lock().iter().filter(|e| *e == entry).count()
    }
}

/// A handler that writes `label` to `journal`.
pub fn recorder(journal: &Arc<Journal>, label: &str) -> Arc<impl EventHandler> {
    let journal = Arc::clone(journal);
    let label = label.to_owned();
    handler(move |_: &Delivery<'_>| journal.record(label.clone()))
}

/// A handler that writes `label` to `journal` and then fails.
pub fn failing(journal: &Arc<Journal>, label: &str) -> Arc<impl EventHandler> {
    let journal = Arc::clone(journal);
    let label = label.to_owned();
    handler(move |_: &Delivery<'_>| {
        journal.record(label.clone());
        Err::<(), _>(format!("{label} failed"))
    })
}

/// A handler that writes `label` to `journal` and then panics.
pub fn panicking(journal: &Arc<Journal>, label: &str) -> Arc<impl EventHandler> {
    let journal = Arc::clone(journal);
    let label = label.to_owned();
    handler(move |_: &Delivery<'_>| -> () {
        journal.record(label.clone());
        panic!("{label} panicked");
    })
}

/// Status listener keeping the statuses of non-telemetry publications.
#[derive(Debug, Default)]
pub struct StatusLog {
    statuses: Mutex<Vec<(u64, PublicationStatus)>>,
}

impl StatusLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn statuses(&self) -> Vec<PublicationStatus> {
        self.statuses.lock().iter().map(|(_, status)| *status).collect()
    }

    pub fn publications(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.statuses.lock().iter().map(|(id, _)| *id).collect();
        ids.dedup();
        ids
    }
}

impl StatusListener for StatusLog {
    fn on_status(&self, publication: &Publication, status: PublicationStatus) {
        if !publication.is_telemetry() {
            self.statuses.lock().push((publication.id(), status));
        }
    }
}
