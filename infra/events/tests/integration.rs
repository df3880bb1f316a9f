pub mod fixtures;

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use relay_event_bus::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_priority_order_with_ties() {
        let bus = EventService::new();
        let journal = Journal::new();

        // Registration order deliberately differs from delivery order.
        let plan = [
            ("zero-a", 0),
            ("hundred", 100),
            ("minus-hundred-a", -100),
            ("zero-b", 0),
            ("minus-ten", -10),
            ("fifty", 50),
            ("minus-hundred-b", -100),
            ("zero-c", 0),
            ("ten", 10),
            ("minus-thirty", -30),
            ("zero-d", 0),
        ];
        let handlers: Vec<_> = plan
            .iter()
            .map(|(label, priority)| {
                let handler = recorder(&journal, label);
                bus.subscribe_with("orders", Subscription::weak(&handler).priority(*priority))
                    .unwrap();
                handler
            })
            .collect();

        bus.publish_topic("orders", TestEvent(1)).unwrap();

        assert_eq!(
            journal.entries(),
            vec![
                "minus-hundred-a",
                "minus-hundred-b",
                "minus-thirty",
                "minus-ten",
                "zero-a",
                "zero-b",
                "zero-c",
                "zero-d",
                "ten",
                "fifty",
                "hundred",
            ]
        );
        assert_eq!(bus.get_subscribers("orders").len(), handlers.len());
    }

    #[test]
    fn test_veto_blocks_all_delivery() {
        let bus = EventService::new();
        let journal = Journal::new();
        let first = recorder(&journal, "first");
        let second = recorder(&journal, "second");
        bus.subscribe("orders", &first).unwrap();
        bus.subscribe("orders", &second).unwrap();

        let allow = veto(|_| false);
        bus.subscribe_veto_listener("orders", &allow).unwrap();
        let outcome = bus.publish_topic("orders", TestEvent(1)).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(2));
        assert_eq!(journal.entries(), vec!["first", "second"]);

        let block_large = veto(|delivery| {
            delivery.downcast_ref::<TestEvent>().is_some_and(|event| event.0 > 10)
        });
        bus.subscribe_veto_listener("orders", &block_large).unwrap();

        let outcome = bus.publish_topic("orders", TestEvent(11)).unwrap();
        assert!(outcome.is_vetoed());
        assert_eq!(journal.entries().len(), 2);

        bus.publish_topic("orders", TestEvent(3)).unwrap();
        assert_eq!(journal.entries().len(), 4);

        assert!(bus.unsubscribe_veto_listener("orders", &block_large).unwrap());
        assert!(!bus.unsubscribe_veto_listener("orders", &block_large).unwrap());
        assert!(!bus.publish_topic("orders", TestEvent(11)).unwrap().is_vetoed());
    }

    #[test]
    fn test_pattern_veto_applies_to_matching_topics() {
        let bus = EventService::new();
        let journal = Journal::new();
        let audit = recorder(&journal, "audit");
        bus.subscribe("audit.login", &audit).unwrap();
        bus.subscribe("billing", &audit).unwrap();

        let audit_pattern = SubscriptionKey::pattern("audit\\..*").unwrap();
        bus.subscribe_veto_listener_strongly(audit_pattern, veto(|_| true)).unwrap();

        assert!(bus.publish_topic("audit.login", ()).unwrap().is_vetoed());
        assert!(!bus.publish_topic("billing", ()).unwrap().is_vetoed());
        assert_eq!(journal.entries(), vec!["audit"]);
    }

    #[test]
    fn test_panicking_veto_counts_as_no_veto() {
        let bus = EventService::new();
        let journal = Journal::new();
        let subscriber = recorder(&journal, "delivered");
        bus.subscribe(SubscriptionKey::of::<TestEvent>(), &subscriber).unwrap();

        let broken = veto(|_| -> bool { panic!("broken guard") });
        bus.subscribe_veto_listener(SubscriptionKey::of::<TestEvent>(), &broken).unwrap();

        let outcome = bus.publish(TestEvent(1)).unwrap();
        assert!(!outcome.is_vetoed());
        assert_eq!(journal.entries(), vec!["delivered"]);
    }

    #[test]
    fn test_subscribers_are_resolved_with_the_vetoes() {
        let bus = EventService::new();
        let journal = Journal::new();
        let late = recorder(&journal, "late");

        let registering_bus = bus.clone();
        let joiner = Arc::clone(&late);
        let register_late = veto(move |_| {
            registering_bus.subscribe_strongly("orders", Arc::clone(&joiner)).unwrap();
            false
        });
        bus.subscribe_veto_listener("orders", &register_late).unwrap();

        let outcome = bus.publish_topic("orders", ()).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(0));
        assert!(journal.entries().is_empty());

        let outcome = bus.publish_topic("orders", ()).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(1));
        assert_eq!(journal.entries(), vec!["late"]);
    }

    #[test]
    fn test_weak_veto_listener_follows_its_owner() {
        let bus = EventService::new();
        let journal = Journal::new();
        let subscriber = recorder(&journal, "delivered");
        bus.subscribe("orders", &subscriber).unwrap();

        let guard = veto(|_| true);
        bus.subscribe_veto_listener("orders", &guard).unwrap();
        assert!(bus.publish_topic("orders", ()).unwrap().is_vetoed());
        assert_eq!(bus.get_veto_subscribers_to("orders").len(), 1);

        drop(guard);
        assert!(!bus.publish_topic("orders", ()).unwrap().is_vetoed());
        assert_eq!(journal.entries(), vec!["delivered"]);
        assert!(bus.get_veto_subscribers_to("orders").is_empty());
    }

    #[test]
    fn test_subscriber_faults_are_isolated() {
        let bus = EventService::new();
        let journal = Journal::new();
        let ok_1 = recorder(&journal, "ok-1");
        let err = failing(&journal, "err");
        let panic = panicking(&journal, "panic");
        let ok_2 = recorder(&journal, "ok-2");
        let key = SubscriptionKey::of::<TestEvent>();
        bus.subscribe(key.clone(), &ok_1).unwrap();
        bus.subscribe(key.clone(), &err).unwrap();
        bus.subscribe(key.clone(), &panic).unwrap();
        bus.subscribe(key, &ok_2).unwrap();

        let faults = Journal::new();
        let fault_sink = Arc::clone(&faults);
        let on_fault = handler(move |delivery: &Delivery<'_>| {
            if let Some(fault) = delivery.downcast_ref::<DeliveryFault>() {
                fault_sink.record(fault.message.clone());
            }
        });
        bus.subscribe(SubscriptionKey::of::<DeliveryFault>(), &on_fault).unwrap();

        for round in 1..=2 {
            let report = bus.publish(TestEvent(round)).unwrap().report().copied().unwrap();
            assert_eq!(report.delivered, 4);
            assert_eq!(report.faults, 2);
        }
        assert_eq!(
            journal.entries(),
            vec!["ok-1", "err", "panic", "ok-2", "ok-1", "err", "panic", "ok-2"]
        );
        assert_eq!(faults.entries()[..2], ["err failed", "panic panicked"]);
    }

    #[test]
    fn test_faulting_fault_subscriber_does_not_recurse() {
        let bus = EventService::new();
        let journal = Journal::new();
        let bad = failing(&journal, "bad");
        let bad_fault_sink = failing(&journal, "fault-sink");
        bus.subscribe("orders", &bad).unwrap();
        bus.subscribe(SubscriptionKey::of::<DeliveryFault>(), &bad_fault_sink).unwrap();

        bus.publish_topic("orders", ()).unwrap();
        assert_eq!(journal.entries(), vec!["bad", "fault-sink"]);
    }

    #[test]
    fn test_polymorphic_type_dispatch() {
        let bus = EventService::new();
        let journal = Journal::new();
        let food = recorder(&journal, "food");
        let ice_cream = recorder(&journal, "ice-cream");
        let exact_ice_cream = recorder(&journal, "exact-ice-cream");
        let vanilla = recorder(&journal, "vanilla");

        bus.subscribe(SubscriptionKey::of::<Food>(), &food).unwrap();
        bus.subscribe(SubscriptionKey::of::<IceCream>(), &ice_cream).unwrap();
        bus.subscribe(SubscriptionKey::exactly::<IceCream>(), &exact_ice_cream).unwrap();
        bus.subscribe(SubscriptionKey::of::<Vanilla>(), &vanilla).unwrap();

        bus.publish(Vanilla(1)).unwrap();
        assert_eq!(journal.entries(), vec!["food", "ice-cream", "vanilla"]);

        let outcome = bus.publish(Brick).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(0));
        assert_eq!(journal.entries().len(), 3);

        assert_eq!(bus.get_subscribers(vanilla_type()).len(), 3);
        assert_eq!(bus.get_subscribers(Route::of::<IceCream>()).len(), 2);
    }

    #[test]
    fn test_wildcard_type_arguments() {
        let bus = EventService::new();
        let journal = Journal::new();
        let any_list = recorder(&journal, "list<?>");
        let ice_cream_list = recorder(&journal, "list<? extends ice-cream>");
        let food_list = recorder(&journal, "list<food>");

        bus.subscribe(list_of(TypeArg::Any), &any_list).unwrap();
        let extends_ice_cream = list_of(TypeArg::Extends(TypeDescriptor::of::<IceCream>()));
        bus.subscribe(extends_ice_cream, &ice_cream_list).unwrap();
        bus.subscribe(list_of(TypeArg::Exact(TypeDescriptor::of::<Food>())), &food_list).unwrap();

        let vanillas: Payload = Arc::new(vec![Vanilla(1), Vanilla(2)]);
        bus.publish_as(list_of(TypeArg::Exact(vanilla_type())), vanillas).unwrap();
        assert_eq!(journal.entries(), vec!["list<?>", "list<? extends ice-cream>"]);
    }

    #[test]
    fn test_topic_and_pattern_merge() {
        let bus = EventService::new();
        let journal = Journal::new();
        let exact = recorder(&journal, "exact");
        let pattern = recorder(&journal, "pattern");

        bus.subscribe_with("IceCream.Vanilla", Subscription::weak(&exact).priority(5)).unwrap();
        bus.subscribe_with(
            SubscriptionKey::pattern("IceCream.*").unwrap(),
            Subscription::weak(&pattern).priority(-5),
        )
        .unwrap();

        bus.publish_topic("IceCream.Vanilla", "scoop").unwrap();
        assert_eq!(journal.entries(), vec!["pattern", "exact"]);

        bus.publish_topic("MyIceCream.Vanilla", "scoop").unwrap();
        assert_eq!(journal.entries().len(), 2);

        bus.publish_topic("IceCream.Chocolate", "scoop").unwrap();
        assert_eq!(journal.entries(), vec!["pattern", "exact", "pattern"]);
    }

    #[test]
    fn test_weak_subscription_cleanup() {
        let bus = EventService::new();
        let journal = Journal::new();
        let weak = recorder(&journal, "weak");
        let strong = recorder(&journal, "strong");
        bus.subscribe("orders", &weak).unwrap();
        bus.subscribe_strongly("orders", Arc::clone(&strong)).unwrap();

        drop(weak);
        drop(strong);

        let report = bus.publish_topic("orders", ()).unwrap().report().copied().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.faults, 0);
        assert_eq!(journal.entries(), vec!["strong"]);

        bus.publish_topic("orders", ()).unwrap();
        assert_eq!(journal.count("strong"), 2);
        assert_eq!(bus.get_subscribers_to("orders").len(), 1);
    }

    #[test]
    fn test_probed_subscription_is_pruned() {
        let bus = EventService::new();
        let journal = Journal::new();
        let alive = Arc::new(AtomicUsize::new(1));
        let flag = Arc::clone(&alive);
        let probe = move || flag.load(Ordering::SeqCst) == 1;
        bus.subscribe_with("orders", Subscription::probed(recorder(&journal, "probed"), probe))
            .unwrap();

        bus.publish_topic("orders", ()).unwrap();
        alive.store(0, Ordering::SeqCst);
        bus.publish_topic("orders", ()).unwrap();
        alive.store(1, Ordering::SeqCst);
        bus.publish_topic("orders", ()).unwrap();

        assert_eq!(journal.count("probed"), 1);
        assert!(bus.get_subscribers_to("orders").is_empty());
    }

    #[test]
    fn test_duplicate_subscribe_is_idempotent() {
        let bus = EventService::new();
        let journal = Journal::new();
        let once = recorder(&journal, "once");

        assert!(bus.subscribe("orders", &once).unwrap());
        assert!(!bus.subscribe("orders", &once).unwrap());
        assert!(!bus.subscribe_strongly("orders", Arc::clone(&once)).unwrap());
        assert!(bus.subscribe("billing", &once).unwrap());

        bus.publish_topic("orders", ()).unwrap();
        assert_eq!(journal.count("once"), 1);

        assert!(bus.unsubscribe("orders", &once).unwrap());
        assert!(!bus.unsubscribe("orders", &once).unwrap());
        bus.publish_topic("orders", ()).unwrap();
        assert_eq!(journal.count("once"), 1);
    }

    #[test]
    fn test_publication_status_sequence() {
        let bus = EventService::new();
        let journal = Journal::new();
        let log = StatusLog::new();
        let listener = bus.add_status_listener(Arc::clone(&log));

        let first = recorder(&journal, "first");
        let second = failing(&journal, "second");
        bus.subscribe("orders", &first).unwrap();
        bus.subscribe("orders", &second).unwrap();

        bus.publish_topic("orders", ()).unwrap();
        assert_eq!(
            log.statuses(),
            vec![
                PublicationStatus::Initiated,
                PublicationStatus::Queued,
                PublicationStatus::Publishing,
                PublicationStatus::Delivered { subscriber: HandlerId::of(&first), faulted: false },
                PublicationStatus::Delivered { subscriber: HandlerId::of(&second), faulted: true },
                PublicationStatus::Completed,
            ]
        );

        let blocker = veto(|_| true);
        bus.subscribe_veto_listener("vetoed", &blocker).unwrap();
        bus.subscribe("vetoed", &first).unwrap();

        let before = log.statuses().len();
        bus.publish_topic("vetoed", ()).unwrap();
        assert_eq!(
            log.statuses()[before..],
            [PublicationStatus::Initiated, PublicationStatus::Vetoed]
        );
        assert_eq!(log.publications().len(), 2);

        assert!(bus.remove_status_listener(listener));
        bus.publish_topic("orders", ()).unwrap();
        assert_eq!(log.publications().len(), 2);
    }

    #[test]
    fn test_panicking_status_listener_is_contained() {
        let bus = EventService::new();
        let journal = Journal::new();
        let subscriber = recorder(&journal, "delivered");
        bus.subscribe("orders", &subscriber).unwrap();

        bus.add_status_listener(Arc::new(|_: &Publication, status: PublicationStatus| {
            assert!(status != PublicationStatus::Publishing, "listener gave up");
        }));
        let log = StatusLog::new();
        bus.add_status_listener(Arc::clone(&log));

        let outcome = bus.publish_topic("orders", ()).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(1));
        assert_eq!(journal.entries(), vec!["delivered"]);
        assert_eq!(
            log.statuses(),
            vec![
                PublicationStatus::Initiated,
                PublicationStatus::Queued,
                PublicationStatus::Publishing,
                PublicationStatus::Delivered {
                    subscriber: HandlerId::of(&subscriber),
                    faulted: false
                },
                PublicationStatus::Completed,
            ]
        );
    }

    #[test]
    fn test_empty_publication_still_completes() {
        let bus = EventService::new();
        let log = StatusLog::new();
        bus.add_status_listener(Arc::clone(&log));

        let outcome = bus.publish_topic("nobody.listens", ()).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(0));
        assert_eq!(
            log.statuses(),
            vec![
                PublicationStatus::Initiated,
                PublicationStatus::Queued,
                PublicationStatus::Publishing,
                PublicationStatus::Completed,
            ]
        );
    }

    #[test]
    fn test_contract_violations_are_reported() {
        let bus = EventService::new();
        let journal = Journal::new();
        let subscriber = recorder(&journal, "s");

        assert!(matches!(bus.subscribe("", &subscriber), Err(EventBusError::InvalidKey { .. })));
        assert!(matches!(
            bus.subscribe_veto_listener("", &veto(|_| true)),
            Err(EventBusError::InvalidKey { .. })
        ));
        assert!(matches!(bus.publish_topic("", ()), Err(EventBusError::InvalidKey { .. })));
        assert!(matches!(SubscriptionKey::pattern(""), Err(EventBusError::InvalidKey { .. })));
        assert!(matches!(
            SubscriptionKey::pattern("[unterminated"),
            Err(EventBusError::InvalidPattern { .. })
        ));
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_clear_all_subscribers() {
        let bus = EventService::new();
        let journal = Journal::new();
        bus.subscribe_strongly("orders", recorder(&journal, "gone")).unwrap();
        bus.subscribe_veto_listener_strongly("orders", veto(|_| true)).unwrap();
        bus.set_default_cache_size(1);
        bus.publish_topic("orders", ()).unwrap();

        bus.clear_all_subscribers();
        assert!(bus.get_subscribers("orders").is_empty());
        assert!(bus.get_veto_subscribers("orders").is_empty());

        let outcome = bus.publish_topic("orders", ()).unwrap();
        assert_eq!(outcome.report().map(|r| r.delivered), Some(0));
        assert!(journal.entries().is_empty());
        assert_eq!(bus.get_cached_items("orders").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_publishers() {
        let bus = EventService::new();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        let subscriber = handler(move |_: &Delivery<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(SubscriptionKey::of::<TestEvent>(), &subscriber).unwrap();

        let bus1 = bus.clone();
        let handle1 = tokio::spawn(async move {
            for i in 0..50 {
                bus1.publish(TestEvent(i)).unwrap();
            }
        });

        let bus2 = bus.clone();
        let handle2 = tokio::spawn(async move {
            for i in 50..100 {
                bus2.publish(TestEvent(i)).unwrap();
            }
        });

        handle1.await.unwrap();
        handle2.await.unwrap();

        assert_eq!(received.load(Ordering::SeqCst), 100, "Should receive all events");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_subscription_changes() {
        let bus = EventService::new();
        let tasks: Vec<_> = (0..4)
            .map(|task| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    let topic = format!("topic.{task}");
                    for _ in 0..25 {
                        let subscriber = handler(|_: &Delivery<'_>| ());
                        bus.subscribe(topic.as_str(), &subscriber).unwrap();
                        bus.publish_topic(&topic, ()).unwrap();
                        bus.unsubscribe(topic.as_str(), &subscriber).unwrap();
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        for task in 0..4 {
            assert!(bus.get_subscribers(format!("topic.{task}")).is_empty());
        }
    }
}
