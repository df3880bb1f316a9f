use anyhow::Context;
use relay_event_bus::{
    Delivery, DeliveryFault, Event, EventService, EventServiceConfig, RegistrationPlan,
    SubscriptionKey, Subscribes, handler, load_config,
};
use relay_logger::{Logger, LoggerSettings};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Stem of the configuration file read when no path is given.
const DEFAULT_CONFIG: &str = "relay";
const CONFIG_EXTENSIONS: [&str; 7] = ["toml", "json", "yaml", "yml", "ini", "ron", "json5"];

/// Layout of `relay.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ShellConfig {
    logger: LoggerSettings,
    events: EventServiceConfig,
}

#[derive(Debug)]
struct OrderPlaced {
    id: u64,
    amount: u64,
}

impl Event for OrderPlaced {}

#[derive(Debug)]
struct Ledger {
    total: AtomicU64,
    review_limit: u64,
}

impl Ledger {
    const fn new(review_limit: u64) -> Self {
        Self { total: AtomicU64::new(0), review_limit }
    }

    fn on_order(&self, order: &OrderPlaced) {
        let total = self.total.fetch_add(order.amount, Ordering::SeqCst) + order.amount;
        info!(order = order.id, total, "Order booked");
    }

    fn hold_large_orders(&self, delivery: &Delivery<'_>) -> bool {
        delivery.downcast_ref::<OrderPlaced>().is_some_and(|order| order.amount > self.review_limit)
    }
}

impl Subscribes for Ledger {
    fn describe(plan: &mut RegistrationPlan<Self>) {
        plan.on_event(Self::on_order).named("on_order");
        plan.veto(SubscriptionKey::of::<OrderPlaced>(), Self::hold_large_orders)
            .named("hold_large_orders");
    }
}

/// Reads `path` when one is given, else `relay.*` from `dir`. Defaults apply
/// only when there is no such file at all.
fn read_config(path: Option<String>, dir: &Path) -> anyhow::Result<ShellConfig> {
    if let Some(path) = path {
        return load_config(Some(&path))
            .with_context(|| format!("Critical: Configuration {path} is malformed"));
    }

    let stem = dir.join(DEFAULT_CONFIG);
    if CONFIG_EXTENSIONS.iter().any(|ext| stem.with_extension(ext).is_file()) {
        return load_config(Some(&stem)).context("Critical: Configuration is malformed");
    }
    Ok(ShellConfig::default())
}

fn main() -> anyhow::Result<()> {
    let config = read_config(std::env::args().nth(1), Path::new("."))?;
    let _logger = Logger::from_settings(env!("CARGO_PKG_NAME"), &config.logger)?;

    let bus = EventService::from_config(&config.events)?;
    info!(mode = ?bus.mode(), "Event service ready");

    let faults = handler(|delivery: &Delivery<'_>| {
        if let Some(fault) = delivery.downcast_ref::<DeliveryFault>() {
            warn!(subscriber = %fault.subscriber, "Delivery fault: {}", fault.message);
        }
    });
    bus.subscribe(SubscriptionKey::of::<DeliveryFault>(), &faults)?;

    let ledger = Arc::new(Ledger::new(1_000));
    let registration = bus.register(&ledger)?;

    for (id, amount) in [(1, 250), (2, 4_000), (3, 90)] {
        let outcome = bus.publish(OrderPlaced { id, amount })?;
        if outcome.is_vetoed() {
            info!(order = id, amount, "Order held for review");
        }
    }
    bus.flush();

    info!(total = ledger.total.load(Ordering::SeqCst), "Ledger closed");
    let removed = bus.unregister(&registration);
    info!(removed, "Ledger unregistered");
    bus.shutdown();

    Ok(())
}
