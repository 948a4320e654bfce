#![cfg(unix)]

use std::os::unix::fs::symlink;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fswatch_events::flags;
use fswatch_events::{
    Action, EventFactory, FlushMode, ManualBackend, PublisherRegistry, SubscriptionContext,
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

#[test]
fn symlinked_subscriptions_watch_and_match_the_target() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("logs");
    std::fs::create_dir(&target).unwrap();
    let link = dir.path().join("current");
    symlink(&target, &link).unwrap();

    let backend = ManualBackend::new();
    let factory = EventFactory::new(
        &PublisherRegistry::with_builtin(),
        "fsevents",
        Arc::new(backend.clone()),
    )
    .unwrap();
    let seen = Arc::new(Mutex::new(Vec::<(PathBuf, Action)>::new()));
    let id = {
        let seen = Arc::clone(&seen);
        factory.subscribe(
            SubscriptionContext::new(&link).recursive(true),
            move |event, _| seen.lock().push((event.path.clone(), event.action)),
        )
    };
    factory.configure();

    let sc = factory.subscription_context(id).unwrap();
    assert_eq!(sc.path, target);
    assert_eq!(sc.original_link_path.as_deref(), Some(link.as_path()));

    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));
    let stream = backend.current_stream().unwrap();
    assert_eq!(stream.paths(), &[target.clone()]);

    stream.emit(target.join("app.log"), flags::ITEM_MODIFIED);
    factory.flush(FlushMode::Sync);
    assert!(wait_until(|| seen.lock().len() == 1));
    assert_eq!(seen.lock()[0], (target.join("app.log"), Action::Updated));
    factory.end();
}

#[test]
fn long_chains_resolve_one_bounded_step_per_configure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("target")).unwrap();
    let names = ["a", "b", "c", "d", "e", "f"];
    for pair in names.windows(2) {
        symlink(dir.path().join(pair[1]), dir.path().join(pair[0])).unwrap();
    }
    symlink(dir.path().join("target"), dir.path().join("f")).unwrap();

    let backend = ManualBackend::new();
    let factory = EventFactory::new(
        &PublisherRegistry::with_builtin(),
        "fsevents",
        Arc::new(backend),
    )
    .unwrap();
    let a = dir.path().join("a");
    let id = factory.subscribe(SubscriptionContext::new(&a), |_, _| {});

    factory.configure();
    let sc = factory.subscription_context(id).unwrap();
    assert_eq!(sc.path, dir.path().join("f"));
    assert_eq!(sc.original_link_path.as_deref(), Some(a.as_path()));

    factory.configure();
    let sc = factory.subscription_context(id).unwrap();
    assert_eq!(sc.path, dir.path().join("target"));
    assert_eq!(sc.original_link_path.as_deref(), Some(a.as_path()));
}

#[test]
fn relative_chains_are_watched_at_the_first_links_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::create_dir(dir.path().join("c")).unwrap();
    let a = dir.path().join("a");
    symlink("sub/b", &a).unwrap();
    symlink("c", dir.path().join("sub").join("b")).unwrap();

    let backend = ManualBackend::new();
    let factory = EventFactory::new(
        &PublisherRegistry::with_builtin(),
        "fsevents",
        Arc::new(backend.clone()),
    )
    .unwrap();
    let id = factory.subscribe(SubscriptionContext::new(&a).recursive(true), |_, _| {});
    factory.configure();
    factory.start().unwrap();
    assert!(wait_until(|| factory.publisher().is_stream_running()));

    let sc = factory.subscription_context(id).unwrap();
    assert_eq!(sc.path, dir.path().join("c"));
    assert_eq!(
        backend.current_stream().unwrap().paths(),
        &[dir.path().join("c")]
    );
    factory.end();
}
