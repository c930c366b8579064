//! Handler fault isolation, error reporting and invalid usage.

use std::sync::Arc;

use anyhow::bail;
use eventflow_core::{
    impl_event, BusError, DeadEvent, ErrorContext, EventBus, EventType, InvocationError,
    MethodSpec, MethodTable, Subscriber, SubscriberExceptionEvent, SubscriberIndex,
};
use eventflow_testing::{ErrorLog, Recorder};

#[derive(Debug)]
struct Ping;
impl_event!(Ping);

struct Failing;

impl Subscriber for Failing {
    fn declare(methods: &mut MethodTable<Self>) {
        methods
            .on("fail", |_: &Failing, _: &Ping| bail!("disk full"))
            .priority(10);
    }
}

struct Panicking;

impl Subscriber for Panicking {
    fn declare(methods: &mut MethodTable<Self>) {
        methods
            .on("explode", |_: &Panicking, _: &Ping| -> anyhow::Result<()> {
                panic!("handler exploded")
            })
            .priority(10);
    }
}

#[derive(Default)]
struct Healthy(Recorder<()>);

impl Subscriber for Healthy {
    fn declare(methods: &mut MethodTable<Self>) {
        methods.on("ok", |h: &Healthy, _: &Ping| {
            h.0.record(());
            Ok(())
        });
    }
}

fn bus_with(log: &ErrorLog) -> EventBus {
    EventBus::builder()
        .error_handler(log.clone())
        .build()
        .expect("bus")
}

#[test]
fn handler_error_is_reported_with_context_and_dispatch_continues() {
    let log = ErrorLog::new();
    let bus = bus_with(&log);
    let healthy = Arc::new(Healthy::default());
    bus.register(&Arc::new(Failing)).expect("register");
    bus.register(&healthy).expect("register");

    bus.post(Ping).expect("failures never reach the publisher");

    assert_eq!(healthy.0.len(), 1);
    let records = log.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.label, "handler_failed");
    assert!(record.message.contains("disk full"));
    assert!(record.subscriber.ends_with("Failing"));
    assert_eq!(record.method, "fail");
    assert_eq!(record.event, EventType::of::<Ping>().name());
    assert!(record.has_descriptor);
}

#[test]
fn panics_are_contained() {
    let log = ErrorLog::new();
    let bus = bus_with(&log);
    let healthy = Arc::new(Healthy::default());
    bus.register(&Arc::new(Panicking)).expect("register");
    bus.register(&healthy).expect("register");

    bus.post(Ping).expect("post");
    bus.post(Ping).expect("post again");

    assert_eq!(healthy.0.len(), 2);
    let records = log.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.label == "handler_panicked"));
    assert!(records[0].message.contains("handler exploded"));
}

#[test]
fn missing_invoker_is_a_mechanism_failure() {
    struct Unbound;

    impl Subscriber for Unbound {
        fn declare(methods: &mut MethodTable<Self>) {
            methods.push(MethodSpec::unbound::<Ping>("bare"));
        }
    }

    let log = ErrorLog::new();
    let bus = bus_with(&log);
    bus.register(&Arc::new(Unbound)).expect("register");

    bus.post(Ping).expect("post");

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].label, "invocation_mechanism");
    assert!(records[0].message.contains("no invoker bound"));
    assert_eq!(records[0].method, "bare");
}

#[test]
fn failing_error_handler_does_not_stop_dispatch() {
    let log = ErrorLog::failing();
    let bus = bus_with(&log);
    let healthy = Arc::new(Healthy::default());
    bus.register(&Arc::new(Failing)).expect("register");
    bus.register(&Arc::new(Panicking)).expect("register");
    bus.register(&healthy).expect("register");

    bus.post(Ping).expect("post");

    assert_eq!(log.records().len(), 2);
    assert_eq!(healthy.0.len(), 1);
}

#[test]
fn panicking_error_handler_is_contained() {
    let bus = EventBus::builder()
        .error_handler(
            |_: &InvocationError, _: &ErrorContext| -> anyhow::Result<()> {
                panic!("error handler exploded")
            },
        )
        .build()
        .expect("bus");
    let healthy = Arc::new(Healthy::default());
    bus.register(&Arc::new(Failing)).expect("register");
    bus.register(&healthy).expect("register");

    bus.post(Ping).expect("post");
    assert_eq!(healthy.0.len(), 1);
}

#[test]
fn handler_failures_are_not_returned_even_when_strict() {
    let bus = EventBus::builder()
        .strict(true)
        .log_handler_errors(false)
        .build()
        .expect("bus");
    bus.register(&Arc::new(Failing)).expect("register");
    bus.register(&Arc::new(Panicking)).expect("register");

    bus.post(Ping).expect("strict mode only reports usage errors");
}

#[derive(Default)]
struct ExceptionWatcher(Recorder<(String, String, String)>);

impl Subscriber for ExceptionWatcher {
    fn declare(methods: &mut MethodTable<Self>) {
        methods.on(
            "on_exception",
            |w: &ExceptionWatcher, e: &SubscriberExceptionEvent| {
                w.0.record((
                    e.label.to_string(),
                    e.method.to_string(),
                    e.bus.to_string(),
                ));
                // Failing here must not produce another exception event.
                bail!("watcher is broken too")
            },
        );
    }
}

#[test]
fn subscriber_exception_event_is_posted_when_enabled() {
    let bus = EventBus::builder()
        .send_subscriber_exception_event(true)
        .log_handler_errors(false)
        .build()
        .expect("bus");
    let watcher = Arc::new(ExceptionWatcher::default());
    bus.register(&watcher).expect("register");
    bus.register(&Arc::new(Failing)).expect("register");

    bus.post(Ping).expect("post");

    assert_eq!(
        watcher.0.snapshot(),
        [(
            "handler_failed".to_string(),
            "fail".to_string(),
            bus.id().to_string()
        )]
    );
}

#[test]
fn subscriber_exception_event_is_off_by_default() {
    let bus = EventBus::builder()
        .log_handler_errors(false)
        .build()
        .expect("bus");
    let watcher = Arc::new(ExceptionWatcher::default());
    bus.register(&watcher).expect("register");
    bus.register(&Arc::new(Failing)).expect("register");

    bus.post(Ping).expect("post");
    assert!(watcher.0.is_empty());
}

#[test]
fn unmatched_exception_event_is_not_wrapped_as_dead() {
    #[derive(Default)]
    struct DeadLetters(Recorder<()>);

    impl Subscriber for DeadLetters {
        fn declare(methods: &mut MethodTable<Self>) {
            methods.on("on_dead", |d: &DeadLetters, _: &DeadEvent| {
                d.0.record(());
                Ok(())
            });
        }
    }

    let bus = EventBus::builder()
        .send_subscriber_exception_event(true)
        .log_handler_errors(false)
        .build()
        .expect("bus");
    let letters = Arc::new(DeadLetters::default());
    bus.register(&letters).expect("register");
    bus.register(&Arc::new(Failing)).expect("register");

    bus.post(Ping).expect("post");
    assert!(letters.0.is_empty());
}

#[derive(Default)]
struct HalfBroken(Recorder<()>);

impl Subscriber for HalfBroken {
    fn declare(methods: &mut MethodTable<Self>) {
        methods.on("ok", |h: &HalfBroken, _: &Ping| {
            h.0.record(());
            Ok(())
        });
        // No event type: cannot be routed.
        methods.push(MethodSpec::new("orphan"));
    }
}

#[test]
fn malformed_descriptor_rejects_the_whole_registration_when_strict() {
    let bus = EventBus::builder().strict(true).build().expect("bus");
    let subscriber = Arc::new(HalfBroken::default());

    let err = bus.register(&subscriber).unwrap_err();

    assert_eq!(err.as_label(), "bus_malformed_descriptor");
    assert!(err.to_string().contains("orphan"));
    assert!(!bus.is_registered(&subscriber));
    bus.post(Ping).expect("post");
    assert!(subscriber.0.is_empty());
}

#[test]
fn malformed_descriptor_is_skipped_when_lenient() {
    let bus = EventBus::new().expect("bus");
    let subscriber = Arc::new(HalfBroken::default());

    bus.register(&subscriber).expect("lenient register");

    assert!(bus.is_registered(&subscriber));
    bus.post(Ping).expect("post");
    assert_eq!(subscriber.0.len(), 1);
}

#[derive(Default)]
struct Dual(Recorder<&'static str>);

impl Subscriber for Dual {
    fn declare(methods: &mut MethodTable<Self>) {
        methods.on("declared", |d: &Dual, _: &Ping| {
            d.0.record("declared");
            Ok(())
        });
    }
}

fn dual_index() -> SubscriberIndex {
    SubscriberIndex::builder()
        .subscriber::<Dual>(|t| {
            t.on("indexed", |d: &Dual, _: &Ping| {
                d.0.record("indexed");
                bail!("indexed handler failed")
            });
        })
        .build()
}

#[test]
fn index_takes_precedence_and_carries_no_descriptor() {
    let log = ErrorLog::new();
    let bus = EventBus::builder()
        .index(dual_index())
        .error_handler(log.clone())
        .build()
        .expect("bus");
    let dual = Arc::new(Dual::default());
    bus.register(&dual).expect("register");

    bus.post(Ping).expect("post");

    assert_eq!(dual.0.snapshot(), ["indexed"]);
    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "indexed");
    assert!(!records[0].has_descriptor);
}

#[test]
fn disabling_the_index_falls_back_to_declarations() {
    let bus = EventBus::builder()
        .index(dual_index())
        .use_index(false)
        .build()
        .expect("bus");
    let dual = Arc::new(Dual::default());
    bus.register(&dual).expect("register");

    bus.post(Ping).expect("post");
    assert_eq!(dual.0.snapshot(), ["declared"]);
}

#[test]
fn operations_after_shutdown_follow_strictness() {
    let lenient = EventBus::new().expect("bus");
    let healthy = Arc::new(Healthy::default());
    lenient.shutdown();
    lenient.register(&healthy).expect("ignored");
    lenient.post_sticky(Ping).expect("ignored");
    assert!(!lenient.is_registered(&healthy));
    assert!(lenient.sticky_event::<Ping>().is_none());

    let strict = EventBus::builder().strict(true).build().expect("bus");
    strict.register(&healthy).expect("register");
    strict.shutdown();
    for (err, operation) in [
        (strict.unregister(&healthy).unwrap_err(), "unregister"),
        (strict.post(Ping).unwrap_err(), "post"),
        (strict.post_sticky(Ping).unwrap_err(), "post_sticky"),
    ] {
        assert_eq!(err.as_label(), "bus_shut_down");
        assert!(err.to_string().contains(&strict.id().to_string()));
        assert!(matches!(err, BusError::ShutDown { operation: op, .. } if op == operation));
    }
    assert!(healthy.0.is_empty());
}
