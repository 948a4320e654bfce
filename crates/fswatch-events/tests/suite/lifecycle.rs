use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fswatch_events::flags;
use fswatch_events::{
    EventFactory, EventPublisher, EventSink, FlushMode, FsEventsPublisher, ManualBackend,
    PublisherError, PublisherRegistry, StreamBackend, SubscriptionContext,
};

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

fn factory_with(backend: &ManualBackend) -> EventFactory {
    EventFactory::new(
        &PublisherRegistry::with_builtin(),
        "fsevents",
        Arc::new(backend.clone()),
    )
    .unwrap()
}

#[test]
fn configure_with_zero_subscriptions_creates_nothing() {
    let backend = ManualBackend::new();
    let factory = factory_with(&backend);
    factory.configure();
    factory.start().unwrap();

    assert!(wait_until(|| factory.is_running()));
    assert_eq!(factory.publisher().num_subscribed_paths(), 0);
    assert!(!factory.publisher().is_stream_running());
    assert_eq!(backend.created_count(), 0);
    factory.end();
}

#[test]
fn unsubscribing_everything_keeps_the_last_stream() {
    let backend = ManualBackend::new();
    let factory = factory_with(&backend);
    let id = factory.subscribe(SubscriptionContext::new("/opt/app"), |_, _| {});
    factory.configure();
    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    assert!(factory.unsubscribe(id));
    assert!(!factory.unsubscribe(id));
    factory.configure();

    // An empty watch set is skipped; the stream over the old set is left alone.
    assert_eq!(factory.publisher().num_subscribed_paths(), 0);
    assert_eq!(backend.created_count(), 1);
    assert_eq!(backend.live_streams().len(), 1);
    factory.end();
    assert!(backend.live_streams().is_empty());
}

#[test]
fn create_failure_recovers_on_the_next_configure() {
    let backend = ManualBackend::new();
    let factory = factory_with(&backend);
    factory.subscribe(SubscriptionContext::new("/opt/app"), |_, _| {});
    factory.configure();
    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    factory.subscribe(SubscriptionContext::new("/opt/other"), |_, _| {});
    backend.fail_next_create();
    factory.configure();
    assert!(!factory.publisher().is_stream_running());
    assert_eq!(backend.created_count(), 1);
    assert!(backend.live_streams().is_empty());

    factory.configure();
    assert!(wait_until(|| factory.publisher().is_stream_running()));
    assert_eq!(backend.created_count(), 2);
    assert_eq!(backend.current_stream().unwrap().paths().len(), 2);
    factory.end();
}

#[test]
fn dropping_the_factory_stops_the_publisher_thread() {
    let backend = ManualBackend::new();
    let factory = factory_with(&backend);
    factory.subscribe(SubscriptionContext::new("/opt/app"), |_, _| {});
    factory.configure();
    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    let stream = backend.current_stream().unwrap();
    drop(factory);
    assert!(stream.is_invalidated());
    assert!(backend.live_streams().is_empty());
}

#[test]
fn events_after_end_are_not_delivered() {
    let backend = ManualBackend::new();
    let factory = factory_with(&backend);
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let hits = Arc::clone(&hits);
        factory.subscribe(SubscriptionContext::new("/opt/app").recursive(true), move |_, _| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    factory.configure();
    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    let stream = backend.current_stream().unwrap();
    factory.end();
    stream.emit("/opt/app/late", flags::ITEM_CREATED);
    factory.flush(FlushMode::Sync);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn factory_can_be_restarted_after_end() {
    let backend = ManualBackend::new();
    let factory = factory_with(&backend);
    factory.subscribe(SubscriptionContext::new("/opt/app"), |_, _| {});
    factory.configure();
    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));
    factory.end();

    factory.start().unwrap();
    factory.configure();
    assert!(wait_until(|| factory.publisher().is_stream_running()));
    assert_eq!(backend.live_streams().len(), 1);
    factory.end();
}

#[derive(Debug)]
struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn name(&self) -> &'static str {
        "null"
    }

    fn configure(&self, _subscriptions: &mut [fswatch_events::Subscription]) {}

    fn run(&self) -> Result<(), PublisherError> {
        Err(PublisherError::ForeignRunLoop)
    }

    fn end(&self) {}

    fn tear_down(&self) {}

    fn flush(&self, _mode: FlushMode) {}

    fn is_stream_running(&self) -> bool {
        false
    }

    fn num_subscribed_paths(&self) -> usize {
        0
    }
}

#[test]
fn custom_publishers_can_be_registered() {
    let mut registry = PublisherRegistry::with_builtin();
    registry.register("null", |_: Arc<dyn StreamBackend>, _: Arc<dyn EventSink>| {
        Arc::new(NullPublisher) as Arc<dyn EventPublisher>
    });
    assert_eq!(registry.names().collect::<Vec<_>>(), vec!["fsevents", "null"]);

    let factory = EventFactory::new(&registry, "null", Arc::new(ManualBackend::new())).unwrap();
    factory.start().unwrap();
    // A failing run ends the publisher thread instead of spinning.
    assert!(wait_until(|| !factory.is_running()));
    factory.end();
}

#[test]
fn publishers_can_be_driven_without_a_factory() {
    let backend = ManualBackend::new();
    let publisher = Arc::new(FsEventsPublisher::new(
        Arc::new(backend.clone()),
        Arc::new(|_: &fswatch_events::EventRecord| {}),
    ));
    let mut sc = SubscriptionContext::new("/opt/app");
    publisher.configure_contexts([&mut sc]);

    let runner = {
        let publisher = Arc::clone(&publisher);
        thread::spawn(move || publisher.run())
    };
    assert!(wait_until(|| publisher.is_stream_running()));
    publisher.tear_down();
    assert!(runner.join().unwrap().is_ok());
    assert!(backend.live_streams().is_empty());
}
