use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fswatch_events::flags;
use fswatch_events::{
    should_fire, Action, EventFactory, EventRecord, FlushMode, ManualBackend, PublisherRegistry,
    RawEventBatch, StreamId, SubscriptionContext,
};
use parking_lot::Mutex;

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

type Seen = Arc<Mutex<Vec<(PathBuf, Action)>>>;

fn running_factory(contexts: Vec<SubscriptionContext>) -> (EventFactory, ManualBackend, Seen) {
    let backend = ManualBackend::new();
    let factory = EventFactory::new(
        &PublisherRegistry::with_builtin(),
        "fsevents",
        Arc::new(backend.clone()),
    )
    .unwrap();
    let seen: Seen = Arc::default();
    for sc in contexts {
        let seen = Arc::clone(&seen);
        factory.subscribe(sc, move |event, _| {
            seen.lock().push((event.path.clone(), event.action));
        });
    }
    factory.configure();
    factory.start().unwrap();
    (factory, backend, seen)
}

// `/tmp` is itself a symlink on macOS and would be resolved away by configure.
#[cfg(not(target_os = "macos"))]
#[test]
fn non_recursive_subscription_receives_created_file_once() {
    let sc = SubscriptionContext::new("/tmp");
    let record = {
        let mut record = EventRecord::new(StreamId(1), "/tmp/a.txt".into(), flags::ITEM_CREATED, 1);
        record.action = Action::Created;
        record
    };
    assert!(should_fire(&sc, &record));

    let (factory, backend, seen) = running_factory(vec![sc]);
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    let stream = backend.current_stream().unwrap();
    stream.push(RawEventBatch::single("/tmp/a.txt", flags::ITEM_CREATED, 1));
    factory.flush(FlushMode::Sync);

    assert!(wait_until(|| !seen.lock().is_empty()));
    assert_eq!(
        *seen.lock(),
        vec![(PathBuf::from("/tmp/a.txt"), Action::Created)]
    );
    factory.end();
}

#[test]
fn recursive_subscription_with_mismatched_mask_is_not_invoked() {
    let sc = SubscriptionContext::new("/var/log")
        .recursive(true)
        .with_mask(flags::ITEM_REMOVED | flags::ITEM_CREATED);
    let record = EventRecord::new(
        StreamId(1),
        "/var/log/sys/debug.log".into(),
        flags::ITEM_MODIFIED,
        1,
    );
    assert!(!should_fire(&sc, &record));

    let (factory, backend, seen) = running_factory(vec![sc]);
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    let stream = backend.current_stream().unwrap();
    stream.emit("/var/log/sys/debug.log", flags::ITEM_MODIFIED);
    factory.flush(FlushMode::Sync);
    assert!(seen.lock().is_empty());

    stream.emit("/var/log/sys/debug.log", flags::ITEM_REMOVED);
    factory.flush(FlushMode::Sync);
    assert!(wait_until(|| seen.lock().len() == 1));
    assert_eq!(seen.lock()[0].1, Action::Deleted);
    factory.end();
}

#[test]
fn multi_bit_events_fan_out_in_table_order() {
    let (factory, backend, seen) =
        running_factory(vec![SubscriptionContext::new("/data").recursive(true)]);
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    let stream = backend.current_stream().unwrap();
    stream.emit(
        "/data/file",
        flags::ITEM_XATTR_MOD | flags::ITEM_MODIFIED | flags::ITEM_CREATED,
    );
    stream.emit("/data/odd", flags::ITEM_IS_FILE);
    factory.flush(FlushMode::Sync);

    assert!(wait_until(|| seen.lock().len() == 4));
    let actions: Vec<_> = seen.lock().iter().map(|(_, action)| *action).collect();
    assert_eq!(
        actions,
        vec![
            Action::Created,
            Action::Updated,
            Action::AttributesModified,
            Action::Unknown,
        ]
    );
    factory.end();
}

#[test]
fn each_subscription_sees_only_its_paths() {
    let backend = ManualBackend::new();
    let factory = EventFactory::new(
        &PublisherRegistry::with_builtin(),
        "fsevents",
        Arc::new(backend.clone()),
    )
    .unwrap();

    let etc_hits = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
    let home_hits = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
    {
        let hits = Arc::clone(&etc_hits);
        factory.subscribe(SubscriptionContext::new("/srv/fswatch/etc/"), move |event, sc| {
            assert_eq!(sc.path, Path::new("/srv/fswatch/etc/"));
            hits.lock().push(event.path.clone());
        });
    }
    {
        let hits = Arc::clone(&home_hits);
        factory.subscribe(
            SubscriptionContext::new("/home").recursive(true),
            move |event, _| hits.lock().push(event.path.clone()),
        );
    }
    factory.configure();
    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    let stream = backend.current_stream().unwrap();
    let mut batch = RawEventBatch::new();
    batch.push("/srv/fswatch/etc/hosts", flags::ITEM_MODIFIED, 10);
    batch.push("/srv/fswatch/etc/ssh/sshd_config", flags::ITEM_MODIFIED, 11);
    batch.push("/home/user/.profile", flags::ITEM_MODIFIED, 12);
    stream.push(batch);
    factory.flush(FlushMode::Sync);

    assert!(wait_until(|| home_hits.lock().len() == 1));
    assert_eq!(*etc_hits.lock(), vec![PathBuf::from("/srv/fswatch/etc/hosts")]);
    assert_eq!(
        *home_hits.lock(),
        vec![PathBuf::from("/home/user/.profile")]
    );
    factory.end();
}

#[test]
fn records_serialize_with_screaming_action_names() {
    let mut record = EventRecord::new(StreamId(3), "/tmp/x".into(), flags::ITEM_RENAMED, 9);
    record.action = Action::MovedTo;
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["action"], "MOVED_TO");
    assert_eq!(json["transaction_id"], 9);
    assert_eq!(json["raw_flags"], flags::ITEM_RENAMED);
}
