//! Publisher registration, subscription bookkeeping and the dedicated publisher thread.
//!
//! [`PublisherRegistry`] maps publisher names to constructors; the built-in registry knows the
//! `fsevents` publisher. [`EventFactory`] owns one publisher instance together with its
//! subscriptions, and drives the publisher's `run` on a thread of its own:
//!
//! ```text
//! subscribe*  →  configure  →  start  →  (subscribe/unsubscribe + configure)*  →  end
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};

use crate::backend::{FlushMode, StreamBackend};
use crate::bridge::EventSink;
use crate::error::PublisherError;
use crate::event::EventRecord;
use crate::publisher::{EventPublisher, FsEventsPublisher, FSEVENTS_PUBLISHER_NAME};
use crate::run_loop::panic_message;
use crate::subscription::{
    should_fire, EventCallback, Subscription, SubscriptionContext, SubscriptionId,
};

pub type PublisherConstructor =
    fn(Arc<dyn StreamBackend>, Arc<dyn EventSink>) -> Arc<dyn EventPublisher>;

#[derive(Debug, Clone, Default)]
pub struct PublisherRegistry {
    constructors: BTreeMap<String, PublisherConstructor>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every publisher shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(FSEVENTS_PUBLISHER_NAME, |backend, sink| {
            Arc::new(FsEventsPublisher::new(backend, sink)) as Arc<dyn EventPublisher>
        });
        registry
    }

    /// Registers `constructor` under `name`, returning the constructor it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: PublisherConstructor,
    ) -> Option<PublisherConstructor> {
        self.constructors.insert(name.into(), constructor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn create(
        &self,
        name: &str,
        backend: Arc<dyn StreamBackend>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Arc<dyn EventPublisher>, PublisherError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| PublisherError::UnknownPublisher(name.to_owned()))?;
        Ok(constructor(backend, sink))
    }
}

/// Delivers fired events to every subscription whose [`should_fire`] check passes.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionDispatcher {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl SubscriptionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for SubscriptionDispatcher {
    fn fire(&self, event: &EventRecord) {
        // Collect first so handlers may (un)subscribe without deadlocking on the lock.
        let matched: Vec<(EventCallback, SubscriptionContext)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|sub| should_fire(&sub.context, event))
            .map(|sub| (Arc::clone(&sub.callback), sub.context.clone()))
            .collect();

        for (callback, context) in matched {
            callback(event, &context);
        }
    }
}

pub struct EventFactory {
    publisher: Arc<dyn EventPublisher>,
    dispatcher: SubscriptionDispatcher,
    next_subscription_id: AtomicU64,
    ending: Arc<AtomicBool>,
    runner: Mutex<Option<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for EventFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFactory")
            .field("publisher", &self.publisher.name())
            .field("subscriptions", &self.subscription_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl EventFactory {
    pub fn new(
        registry: &PublisherRegistry,
        name: &str,
        backend: Arc<dyn StreamBackend>,
    ) -> Result<Self, PublisherError> {
        let dispatcher = SubscriptionDispatcher::new();
        let publisher = registry.create(name, backend, Arc::new(dispatcher.clone()))?;
        Ok(Self {
            publisher,
            dispatcher,
            next_subscription_id: AtomicU64::new(1),
            ending: Arc::new(AtomicBool::new(false)),
            runner: Mutex::new(None),
        })
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Adds a subscription. It takes effect for watching on the next [`EventFactory::configure`];
    /// matching against already-watched paths applies immediately.
    pub fn subscribe<F>(&self, context: SubscriptionContext, callback: F) -> SubscriptionId
    where
        F: Fn(&EventRecord, &SubscriptionContext) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        self.dispatcher.subscriptions.write().push(Subscription {
            id,
            context,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.dispatcher.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        subscriptions.len() != before
    }

    pub fn subscription_count(&self) -> usize {
        self.dispatcher.subscriptions.read().len()
    }

    /// The subscription's current context, including any symlink resolution applied by
    /// configuration.
    pub fn subscription_context(&self, id: SubscriptionId) -> Option<SubscriptionContext> {
        self.dispatcher
            .subscriptions
            .read()
            .iter()
            .find(|sub| sub.id == id)
            .map(|sub| sub.context.clone())
    }

    pub fn configure(&self) {
        let mut subscriptions = self.dispatcher.subscriptions.write();
        self.publisher.configure(&mut subscriptions);
    }

    /// Spawns the publisher thread, which keeps re-entering `run` until [`EventFactory::end`].
    pub fn start(&self) -> Result<(), PublisherError> {
        let mut runner = self.runner.lock();
        if runner.is_some() {
            return Err(PublisherError::AlreadyRunning(self.publisher.name()));
        }

        self.ending.store(false, Ordering::Release);
        let publisher = Arc::clone(&self.publisher);
        let ending = Arc::clone(&self.ending);
        let handle = thread::Builder::new()
            .name(format!("fswatch-{}", publisher.name()))
            .spawn(move || {
                while !ending.load(Ordering::Acquire) {
                    if let Err(err) = publisher.run() {
                        tracing::error!(
                            target = "fswatch.events",
                            publisher = publisher.name(),
                            error = %err,
                            "event publisher run failed"
                        );
                        break;
                    }
                }
                tracing::debug!(
                    target = "fswatch.events",
                    publisher = publisher.name(),
                    "event publisher thread exiting"
                );
            })?;
        *runner = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runner
            .lock()
            .as_ref()
            .is_some_and(|runner| !runner.is_finished())
    }

    pub fn flush(&self, mode: FlushMode) {
        self.publisher.flush(mode);
    }

    /// Stops the publisher thread and detaches the publisher from its loop. Idempotent.
    pub fn end(&self) {
        self.ending.store(true, Ordering::Release);
        self.publisher.end();
        if let Some(runner) = self.runner.lock().take() {
            join_runner_best_effort(runner, self.publisher.name());
        }
        self.publisher.tear_down();
    }
}

impl Drop for EventFactory {
    fn drop(&mut self) {
        self.end();
    }
}

fn join_runner_best_effort(runner: thread::JoinHandle<()>, publisher: &'static str) {
    if runner.thread().id() == thread::current().id() {
        return;
    }
    if let Err(panic) = runner.join() {
        tracing::debug!(
            target = "fswatch.events",
            publisher,
            panic = %panic_message(panic.as_ref()),
            "event publisher thread panicked (best effort join)"
        );
    }
}
