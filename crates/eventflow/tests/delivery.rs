//! Delivery modes, worker ownership and shutdown draining.

use std::sync::{Arc, Barrier};
use std::thread::{self, ThreadId};
use std::time::Duration;

use eventflow_core::{
    impl_event, AsyncExecutor, BackgroundPoster, CancelFlag, Cancelable, DeliveryMode, Event,
    EventBus, MainThreadScheduler, MethodTable, Subscriber,
};
use eventflow_testing::{ManualScheduler, Recorder, ThreadWorker};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Task(u32);
impl_event!(Task);

struct Tracker<const MODE: u8> {
    seen: Recorder<(u32, ThreadId)>,
}

impl<const MODE: u8> Tracker<MODE> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Recorder::new(),
        })
    }

    fn ids(&self) -> Vec<u32> {
        self.seen.snapshot().into_iter().map(|(id, _)| id).collect()
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.seen.snapshot().into_iter().map(|(_, t)| t).collect()
    }
}

const INLINE: u8 = 0;
const MAIN: u8 = 1;
const BACKGROUND: u8 = 2;
const ASYNC: u8 = 3;

fn delivery_mode(mode: u8) -> DeliveryMode {
    match mode {
        MAIN => DeliveryMode::MainThread,
        BACKGROUND => DeliveryMode::Background,
        ASYNC => DeliveryMode::Async,
        _ => DeliveryMode::Inline,
    }
}

impl<const MODE: u8> Subscriber for Tracker<MODE> {
    fn declare(methods: &mut MethodTable<Self>) {
        methods
            .on("on_job", |t: &Tracker<MODE>, job: &Task| {
                t.seen.record((job.0, thread::current().id()));
                Ok(())
            })
            .mode(delivery_mode(MODE));
    }
}

#[derive(Debug, Default)]
struct Ballot {
    flag: CancelFlag,
}

impl Event for Ballot {
    fn cancelable(&self) -> Option<&dyn Cancelable> {
        Some(&self.flag)
    }
}

struct Tally<const MODE: u8>(Recorder<()>);

impl<const MODE: u8> Subscriber for Tally<MODE> {
    fn declare(methods: &mut MethodTable<Self>) {
        methods
            .on("count", |t: &Tally<MODE>, _: &Ballot| {
                t.0.record(());
                Ok(())
            })
            .mode(delivery_mode(MODE));
    }
}

#[test]
fn background_runs_in_post_order_off_the_publisher() {
    let bus = EventBus::new().expect("bus");
    let tracker = Tracker::<BACKGROUND>::new();
    bus.register(&tracker).expect("register");

    for id in 0..20 {
        bus.post(Task(id)).expect("post");
    }

    assert!(tracker.seen.wait_for(20, WAIT));
    assert_eq!(tracker.ids(), (0..20).collect::<Vec<_>>());
    let me = thread::current().id();
    assert!(tracker.threads().iter().all(|t| *t != me));
}

#[test]
fn async_handlers_run_concurrently() {
    struct Rendezvous {
        barrier: Barrier,
        done: Recorder<u32>,
    }

    impl Subscriber for Rendezvous {
        fn declare(methods: &mut MethodTable<Self>) {
            methods
                .on("meet", |r: &Rendezvous, job: &Task| {
                    // Both jobs must be running at once to get past this.
                    r.barrier.wait();
                    r.done.record(job.0);
                    Ok(())
                })
                .mode(DeliveryMode::Async);
        }
    }

    let bus = EventBus::new().expect("bus");
    let rendezvous = Arc::new(Rendezvous {
        barrier: Barrier::new(2),
        done: Recorder::new(),
    });
    bus.register(&rendezvous).expect("register");

    bus.post(Task(1)).expect("post");
    bus.post(Task(2)).expect("post");

    assert!(rendezvous.done.wait_for(2, WAIT));
}

#[test]
fn main_thread_jobs_wait_for_the_scheduler() {
    let scheduler = Arc::new(ManualScheduler::new());
    let bus = EventBus::builder()
        .main_thread(Arc::clone(&scheduler) as Arc<dyn MainThreadScheduler>)
        .build()
        .expect("bus");
    let tracker = Tracker::<MAIN>::new();
    bus.register(&tracker).expect("register");

    bus.post(Task(1)).expect("post");
    bus.post(Task(2)).expect("post");
    assert!(tracker.seen.is_empty());
    assert_eq!(scheduler.pending(), 2);

    let drainer = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || (scheduler.run_pending(), thread::current().id()))
    };
    let (ran, drainer_id) = drainer.join().expect("drainer");

    assert_eq!(ran, 2);
    assert_eq!(tracker.ids(), [1, 2]);
    assert!(tracker.threads().iter().all(|t| *t == drainer_id));
    assert_eq!(scheduler.executed_on(), [drainer_id, drainer_id]);
}

#[test]
fn main_thread_publisher_runs_inline_when_enabled() {
    let scheduler = Arc::new(ManualScheduler::new());
    scheduler.claim_current_thread();

    let queued = EventBus::builder()
        .main_thread(Arc::clone(&scheduler) as Arc<dyn MainThreadScheduler>)
        .build()
        .expect("bus");
    let tracker = Tracker::<MAIN>::new();
    queued.register(&tracker).expect("register");
    queued.post(Task(1)).expect("post");
    assert!(tracker.seen.is_empty());
    assert_eq!(scheduler.run_pending(), 1);

    let inline = EventBus::builder()
        .main_thread(Arc::clone(&scheduler) as Arc<dyn MainThreadScheduler>)
        .inline_on_primary_thread(true)
        .build()
        .expect("bus");
    let tracker = Tracker::<MAIN>::new();
    inline.register(&tracker).expect("register");
    inline.post(Task(2)).expect("post");
    assert_eq!(tracker.ids(), [2]);
    assert_eq!(scheduler.pending(), 0);

    // Off the main thread the job is still queued.
    let off_main = inline.clone();
    thread::spawn(move || off_main.post(Task(3)).expect("post"))
        .join()
        .expect("publisher");
    assert_eq!(scheduler.pending(), 1);
}

#[test]
fn missing_scheduler_is_logged_when_lenient() {
    let bus = EventBus::new().expect("bus");
    let main = Tracker::<MAIN>::new();
    let inline = Tracker::<INLINE>::new();
    bus.register(&main).expect("register");
    bus.register(&inline).expect("register");

    bus.post(Task(1)).expect("lenient post");

    assert!(main.seen.is_empty());
    assert_eq!(inline.ids(), [1]);
}

#[test]
fn missing_scheduler_is_returned_when_strict_after_other_deliveries() {
    let bus = EventBus::builder().strict(true).build().expect("bus");
    let main = Tracker::<MAIN>::new();
    let inline = Tracker::<INLINE>::new();
    bus.register(&main).expect("register");
    bus.register(&inline).expect("register");

    let err = bus.post(Task(1)).unwrap_err();

    assert_eq!(err.as_label(), "bus_missing_scheduler");
    assert!(err.is_configuration());
    assert_eq!(inline.ids(), [1]);
}

#[test]
fn closed_scheduler_rejects_in_strict_mode() {
    let scheduler = Arc::new(ManualScheduler::new());
    scheduler.close();
    let bus = EventBus::builder()
        .strict(true)
        .main_thread(Arc::clone(&scheduler) as Arc<dyn MainThreadScheduler>)
        .build()
        .expect("bus");
    let tracker = Tracker::<MAIN>::new();
    bus.register(&tracker).expect("register");

    let err = bus.post(Task(1)).unwrap_err();
    assert_eq!(err.as_label(), "bus_worker_rejected");
    assert!(err.to_string().contains("manual-scheduler"));
}

#[test]
fn external_workers_run_jobs_and_outlive_the_bus() {
    let worker = ThreadWorker::spawn().expect("worker thread");
    let bus = EventBus::builder()
        .background_poster(Arc::clone(&worker) as Arc<dyn BackgroundPoster>)
        .async_executor(Arc::clone(&worker) as Arc<dyn AsyncExecutor>)
        .build()
        .expect("bus");
    let background = Tracker::<BACKGROUND>::new();
    let pooled = Tracker::<ASYNC>::new();
    bus.register(&background).expect("register");
    bus.register(&pooled).expect("register");

    bus.post(Task(1)).expect("post");
    assert!(background.seen.wait_for(1, WAIT));
    assert!(pooled.seen.wait_for(1, WAIT));
    assert_eq!(background.threads(), [worker.thread_id()]);
    assert_eq!(pooled.threads(), [worker.thread_id()]);

    bus.shutdown();
    assert_eq!(worker.shutdown_calls(), 0);
    assert!(BackgroundPoster::enqueue(&*worker, Box::new(|| {})).is_ok());
}

#[test]
fn shutdown_drains_queued_background_work() {
    struct Slow(Recorder<u32>);

    impl Subscriber for Slow {
        fn declare(methods: &mut MethodTable<Self>) {
            methods
                .on("slow", |s: &Slow, job: &Task| {
                    thread::sleep(Duration::from_millis(10));
                    s.0.record(job.0);
                    Ok(())
                })
                .mode(DeliveryMode::Background);
        }
    }

    let bus = EventBus::new().expect("bus");
    let slow = Arc::new(Slow(Recorder::new()));
    bus.register(&slow).expect("register");

    for id in 0..5 {
        bus.post(Task(id)).expect("post");
    }
    bus.shutdown();
    bus.post(Task(99)).expect("ignored after shutdown");

    assert!(slow.0.wait_for(5, WAIT));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(slow.0.snapshot(), [0, 1, 2, 3, 4]);
}

#[test]
fn inline_runs_on_the_publisher_before_post_returns() {
    let bus = EventBus::new().expect("bus");
    let tracker = Tracker::<INLINE>::new();
    bus.register(&tracker).expect("register");

    bus.post(Task(7)).expect("post");

    assert_eq!(tracker.ids(), [7]);
    assert_eq!(tracker.threads(), [thread::current().id()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bus_built_inside_a_runtime_uses_it() {
    let bus = EventBus::new().expect("bus");
    let tracker = Tracker::<ASYNC>::new();
    bus.register(&tracker).expect("register");

    bus.post(Task(1)).expect("post");

    let seen = Arc::clone(&tracker);
    let delivered = tokio::task::spawn_blocking(move || seen.seen.wait_for(1, WAIT))
        .await
        .expect("join");
    assert!(delivered);
    bus.shutdown();
}

#[test]
fn main_thread_job_skips_an_event_canceled_while_queued() {
    let scheduler = Arc::new(ManualScheduler::new());
    let bus = EventBus::builder()
        .main_thread(Arc::clone(&scheduler) as Arc<dyn MainThreadScheduler>)
        .build()
        .expect("bus");
    let tally = Arc::new(Tally::<MAIN>(Recorder::new()));
    bus.register(&tally).expect("register");

    let canceled = Arc::new(Ballot::default());
    bus.post_ref(canceled.clone()).expect("post");
    bus.post(Ballot::default()).expect("post");
    assert_eq!(scheduler.pending(), 2);

    canceled.flag.cancel();
    assert_eq!(scheduler.run_pending(), 2);

    assert_eq!(tally.0.len(), 1);
}

#[test]
fn background_job_skips_an_event_canceled_while_queued() {
    struct Gate {
        release: Barrier,
        passed: Recorder<u32>,
    }

    impl Subscriber for Gate {
        fn declare(methods: &mut MethodTable<Self>) {
            methods
                .on("hold", |g: &Gate, job: &Task| {
                    if job.0 == 0 {
                        g.release.wait();
                    }
                    g.passed.record(job.0);
                    Ok(())
                })
                .mode(DeliveryMode::Background);
        }
    }

    let bus = EventBus::new().expect("bus");
    let gate = Arc::new(Gate {
        release: Barrier::new(2),
        passed: Recorder::new(),
    });
    let tally = Arc::new(Tally::<BACKGROUND>(Recorder::new()));
    bus.register(&gate).expect("register");
    bus.register(&tally).expect("register");

    // The serial worker is parked on the gate until the ballot is canceled.
    bus.post(Task(0)).expect("post");
    let ballot = Arc::new(Ballot::default());
    bus.post_ref(ballot.clone()).expect("post");
    ballot.flag.cancel();
    gate.release.wait();

    // Runs after the ballot's job in FIFO order.
    bus.post(Task(1)).expect("post");
    assert!(gate.passed.wait_for(2, WAIT));
    assert!(tally.0.is_empty());
}
