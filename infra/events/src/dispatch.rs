use crate::descriptor::Event;
use crate::error::EventBusError;
use crate::handler::{Delivery, HandlerId, Payload};
use crate::key::Route;
use parking_lot::Mutex;
use serde::Deserialize;
use std::borrow::Cow;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Default name of the confined dispatch thread.
pub const DEFAULT_DISPATCH_THREAD: &str = "relay-dispatch";

/// Where subscriber callbacks run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// On the publishing thread, before `publish` returns.
    #[default]
    Inline,
    /// On one dedicated thread per service, FIFO by enqueue time.
    /// `publish` returns as soon as the publication is queued.
    Confined,
}

/// One call to `publish`, as seen by status listeners.
#[derive(Debug, Clone)]
pub struct Publication {
    pub(crate) id: u64,
    pub(crate) route: Route,
    pub(crate) payload: Payload,
    pub(crate) telemetry: bool,
}

impl Publication {
    /// Per-service sequence number.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub const fn route(&self) -> &Route {
        &self.route
    }

    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Internal fault and timing records are published with this flag set;
    /// they are neither timed nor re-reported on fault.
    #[must_use]
    pub const fn is_telemetry(&self) -> bool {
        self.telemetry
    }

    pub(crate) fn delivery(&self) -> Delivery<'_> {
        Delivery {
            topic: self.route.topic(),
            event_type: self.route.event_type(),
            payload: &self.payload,
        }
    }
}

/// Lifecycle of a publication.
///
/// A delivered publication goes `Initiated, Queued, Publishing`, one
/// `Delivered` per invoked subscriber, then `Completed`. A vetoed one goes
/// `Initiated, Vetoed` and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationStatus {
    Initiated,
    Queued,
    Publishing,
    Delivered { subscriber: HandlerId, faulted: bool },
    Completed,
    Vetoed,
}

/// Observer of publication lifecycle transitions.
///
/// Listeners run synchronously at each transition; a panicking listener is
/// logged and skipped.
pub trait StatusListener: Send + Sync + 'static {
    fn on_status(&self, publication: &Publication, status: PublicationStatus);
}

impl<F> StatusListener for F
where
    F: Fn(&Publication, PublicationStatus) + Send + Sync + 'static,
{
    fn on_status(&self, publication: &Publication, status: PublicationStatus) {
        self(publication, status);
    }
}

/// Result of an inline delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub publication_id: u64,
    /// Subscribers invoked, faulted ones included.
    pub delivered: usize,
    pub faults: usize,
}

/// What `publish` did with a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Delivered inline.
    Completed(DeliveryReport),
    /// A veto listener cancelled it; nobody was invoked.
    Vetoed,
    /// Handed to the confined dispatch thread.
    Queued,
}

impl PublishOutcome {
    #[must_use]
    pub const fn report(&self) -> Option<&DeliveryReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Vetoed | Self::Queued => None,
        }
    }

    #[must_use]
    pub const fn is_vetoed(&self) -> bool {
        matches!(self, Self::Vetoed)
    }
}

/// Published by type whenever a subscriber returns an error or panics.
#[derive(Debug, Clone)]
pub struct DeliveryFault {
    pub publication_id: u64,
    pub route: Route,
    pub subscriber: Cow<'static, str>,
    pub message: String,
}

impl Event for DeliveryFault {}

/// Which kind of callback a timing record measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Subscriber,
    Veto,
}

/// Published by type for every timed invocation while a time threshold is set.
#[derive(Debug, Clone)]
pub struct SubscriberTiming {
    pub publication_id: u64,
    pub route: Route,
    pub subscriber: Cow<'static, str>,
    pub kind: InvocationKind,
    pub started: SystemTime,
    pub ended: SystemTime,
    pub elapsed: Duration,
    pub limit: Duration,
    pub exceeded: bool,
}

impl Event for SubscriberTiming {}

/// Wall-clock start of one invocation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stopwatch {
    started: SystemTime,
    at: Instant,
}

impl Stopwatch {
    pub(crate) fn start() -> Self {
        Self { started: SystemTime::now(), at: Instant::now() }
    }

    pub(crate) fn finish(
        self,
        publication: &Publication,
        subscriber: Cow<'static, str>,
        kind: InvocationKind,
        limit: Duration,
    ) -> SubscriberTiming {
        let elapsed = self.at.elapsed();
        SubscriberTiming {
            publication_id: publication.id,
            route: publication.route.clone(),
            subscriber,
            kind,
            started: self.started,
            ended: self.started + elapsed,
            elapsed,
            limit,
            exceeded: elapsed > limit,
        }
    }
}

/// Best-effort text of a caught panic.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with a non-string payload".to_owned())
}

#[derive(Debug)]
enum Job<T> {
    Deliver(T),
    Flush(oneshot::Sender<()>),
}

/// FIFO hand-off to the single dispatch thread of a confined service.
#[derive(Debug)]
pub(crate) struct ConfinedQueue<T> {
    sender: Mutex<Option<mpsc::UnboundedSender<Job<T>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread: ThreadId,
}

impl<T: Send + 'static> ConfinedQueue<T> {
    /// Spawns the dispatch thread; `deliver` runs there for every queued item.
    pub(crate) fn spawn<F>(name: &str, deliver: F) -> Result<Self, EventBusError>
    where
        F: Fn(T) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job<T>>();
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                trace!("Dispatch thread started");
                while let Some(job) = receiver.blocking_recv() {
                    match job {
                        Job::Deliver(item) => deliver(item),
                        Job::Flush(ack) => {
                            let _ = ack.send(());
                        },
                    }
                }
                trace!("Dispatch thread finished");
            })
            .map_err(|source| EventBusError::Spawn {
                source,
                context: Some(format!("thread '{name}'").into()),
            })?;

        debug!(thread = name, "Confined dispatch started");
        let thread = worker.thread().id();
        Ok(Self { sender: Mutex::new(Some(sender)), worker: Mutex::new(Some(worker)), thread })
    }

    pub(crate) fn enqueue(&self, item: T) -> Result<(), EventBusError> {
        let sender = self.sender.lock();
        let stopped = || EventBusError::ServiceStopped {
            message: "dispatch thread is gone".into(),
            context: None,
        };
        sender.as_ref().ok_or_else(stopped)?.send(Job::Deliver(item)).map_err(|_| stopped())
    }

    pub(crate) fn is_dispatch_thread(&self) -> bool {
        self.thread == thread::current().id()
    }

    /// Blocks until everything queued before this call has been delivered.
    /// Returns immediately on the dispatch thread itself.
    ///
    /// # Panics
    /// When called from within an asynchronous execution context.
    pub(crate) fn flush(&self) {
        if self.is_dispatch_thread() {
            return;
        }
        let (ack, done) = oneshot::channel();
        let sent =
            self.sender.lock().as_ref().is_some_and(|sender| sender.send(Job::Flush(ack)).is_ok());
        if sent {
            let _ = done.blocking_recv();
        }
    }

    /// Stops accepting work, lets the thread drain what is queued and joins it.
    pub(crate) fn close(&self) {
        drop(self.sender.lock().take());
        if self.is_dispatch_thread() {
            return;
        }
        if let Some(worker) = self.worker.lock().take()
            && worker.join().is_err()
        {
            tracing::warn!("Dispatch thread terminated with a panic");
        }
    }
}
