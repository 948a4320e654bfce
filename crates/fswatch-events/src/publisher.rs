//! Lifecycle of the single native stream owned by a publisher.
//!
//! A publisher is driven by one dedicated thread calling [`FsEventsPublisher::run`], which binds
//! the publisher to that thread's [`RunLoop`] and blocks while the loop delivers callbacks.
//! Reconfiguration, flushing and shutdown may be requested from any other thread; every
//! lifecycle field sits behind a single mutex.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{FlushMode, NativeStream, StreamBackend, StreamOptions, WatchList};
use crate::bridge::{EventSink, StreamCallback};
use crate::error::PublisherError;
use crate::resolve::resolve_subscription_path;
use crate::run_loop::RunLoop;
use crate::subscription::{Subscription, SubscriptionContext};

/// Registry name of the publisher.
pub const FSEVENTS_PUBLISHER_NAME: &str = "fsevents";

#[derive(Debug, Default)]
struct PublisherState {
    run_loop: Option<RunLoop>,
    stream: Option<Arc<dyn NativeStream>>,
    started: bool,
    /// A stop requested before any run loop was bound; honoured by the next `run`.
    stop_pending: bool,
    /// Rebuilt wholesale on every configure.
    paths: BTreeSet<PathBuf>,
}

/// Publisher lifecycle operations, as seen by the event factory.
pub trait EventPublisher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Resolves every subscription path and (re)creates the native stream over the result.
    fn configure(&self, subscriptions: &mut [Subscription]);

    /// Thread entry point. Blocks until the loop is asked to stop.
    fn run(&self) -> Result<(), PublisherError>;

    fn end(&self);

    fn tear_down(&self);

    fn flush(&self, mode: FlushMode);

    fn is_stream_running(&self) -> bool;

    fn num_subscribed_paths(&self) -> usize;
}

pub struct FsEventsPublisher {
    backend: Arc<dyn StreamBackend>,
    sink: Arc<dyn EventSink>,
    options: StreamOptions,
    state: Mutex<PublisherState>,
}

impl std::fmt::Debug for FsEventsPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsEventsPublisher")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl FsEventsPublisher {
    pub fn new(backend: Arc<dyn StreamBackend>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            backend,
            sink,
            options: StreamOptions::default(),
            state: Mutex::new(PublisherState::default()),
        }
    }

    /// Rebuilds the watched path set from `subscriptions` and restarts the stream.
    ///
    /// Subscription paths are resolved through symlinks in place. With no paths to watch nothing
    /// is created, and a stream from an earlier configure stays live over its old paths until
    /// the next restart or stop.
    pub fn configure_contexts<'a, I>(&self, subscriptions: I)
    where
        I: IntoIterator<Item = &'a mut SubscriptionContext>,
    {
        let mut paths = BTreeSet::new();
        for sc in subscriptions {
            resolve_subscription_path(sc);
            paths.insert(sc.path.clone());
        }

        let mut state = self.state.lock();
        state.paths = paths;
        if state.paths.is_empty() {
            tracing::debug!(target = "fswatch.events", "no paths to watch");
            return;
        }
        self.restart_locked(&mut state);
    }

    /// Replaces the stream with a new one over the current path set.
    ///
    /// No-op while there is nothing to watch or no run loop is bound yet.
    pub fn restart(&self) {
        let mut state = self.state.lock();
        self.restart_locked(&mut state);
    }

    fn restart_locked(&self, state: &mut PublisherState) {
        if state.paths.is_empty() {
            return;
        }
        let Some(run_loop) = state.run_loop.clone() else {
            return;
        };

        Self::stop_stream_locked(state);

        let watch_list = WatchList::new(&state.paths);
        let callback = StreamCallback::new(Arc::clone(&self.sink));
        let stream = match self
            .backend
            .create_stream(&watch_list, self.options, callback)
        {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(
                    target = "fswatch.events",
                    paths = watch_list.len(),
                    error = %err,
                    "cannot create stream"
                );
                return;
            }
        };

        stream.schedule(&run_loop);
        match stream.start() {
            Ok(()) => {
                tracing::debug!(
                    target = "fswatch.events",
                    stream = %stream.id(),
                    paths = watch_list.len(),
                    "stream started"
                );
                state.stream = Some(stream);
                state.started = true;
            }
            Err(err) => {
                tracing::error!(
                    target = "fswatch.events",
                    stream = %stream.id(),
                    error = %err,
                    "cannot start stream"
                );
                stream.unschedule(&run_loop);
                stream.invalidate();
            }
        }
    }

    /// Stops and releases the stream, then asks the bound run loop to return. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        Self::stop_locked(&mut state);
    }

    fn stop_locked(state: &mut PublisherState) {
        Self::stop_stream_locked(state);
        match &state.run_loop {
            Some(run_loop) => run_loop.stop(),
            None => state.stop_pending = true,
        }
    }

    fn stop_stream_locked(state: &mut PublisherState) {
        let Some(stream) = state.stream.take() else {
            return;
        };
        stream.stop();
        state.started = false;
        if let Some(run_loop) = &state.run_loop {
            stream.unschedule(run_loop);
        }
        stream.invalidate();
        tracing::trace!(target = "fswatch.events", stream = %stream.id(), "stream released");
    }

    /// Binds to the calling thread's run loop on first use, then drives it until stopped.
    pub fn run(&self) -> Result<(), PublisherError> {
        let run_loop = {
            let mut state = self.state.lock();
            match state.run_loop.clone() {
                Some(run_loop) => run_loop,
                None => {
                    let run_loop = RunLoop::current();
                    state.run_loop = Some(run_loop.clone());
                    self.restart_locked(&mut state);
                    if std::mem::take(&mut state.stop_pending) {
                        run_loop.stop();
                    }
                    run_loop
                }
            }
        };

        if !run_loop.is_current() {
            return Err(PublisherError::ForeignRunLoop);
        }
        RunLoop::run_current();
        Ok(())
    }

    /// Stops the stream but keeps the run loop binding for a later reconfiguration.
    pub fn end(&self) {
        self.stop();
    }

    /// Stops the stream and detaches from the run loop.
    pub fn tear_down(&self) {
        let mut state = self.state.lock();
        Self::stop_locked(&mut state);
        state.run_loop = None;
    }

    /// Asks the stream to deliver buffered events. No-op unless a stream is started.
    pub fn flush(&self, mode: FlushMode) {
        let stream = {
            let state = self.state.lock();
            match (&state.stream, state.started) {
                (Some(stream), true) => Arc::clone(stream),
                _ => return,
            }
        };
        stream.flush(mode);
    }

    pub fn is_stream_running(&self) -> bool {
        let state = self.state.lock();
        if state.stream.is_none() || !state.started {
            return false;
        }
        state
            .run_loop
            .as_ref()
            .is_some_and(|run_loop| run_loop.is_waiting())
    }

    pub fn num_subscribed_paths(&self) -> usize {
        self.state.lock().paths.len()
    }

    /// Current watched paths, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.state.lock().paths.iter().cloned().collect()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn has_stream(&self) -> bool {
        self.state.lock().stream.is_some()
    }

    pub fn has_run_loop(&self) -> bool {
        self.state.lock().run_loop.is_some()
    }
}

impl EventPublisher for FsEventsPublisher {
    fn name(&self) -> &'static str {
        FSEVENTS_PUBLISHER_NAME
    }

    fn configure(&self, subscriptions: &mut [Subscription]) {
        self.configure_contexts(subscriptions.iter_mut().map(|sub| &mut sub.context));
    }

    fn run(&self) -> Result<(), PublisherError> {
        FsEventsPublisher::run(self)
    }

    fn end(&self) {
        FsEventsPublisher::end(self)
    }

    fn tear_down(&self) {
        FsEventsPublisher::tear_down(self)
    }

    fn flush(&self, mode: FlushMode) {
        FsEventsPublisher::flush(self, mode)
    }

    fn is_stream_running(&self) -> bool {
        FsEventsPublisher::is_stream_running(self)
    }

    fn num_subscribed_paths(&self) -> usize {
        FsEventsPublisher::num_subscribed_paths(self)
    }
}
