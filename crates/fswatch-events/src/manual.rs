//! Deterministic backend for tests.
//!
//! [`ManualBackend`] never touches the OS. Every stream it creates is recorded, and callers
//! inject raw events directly into a stream with [`ManualStream::push`] (delivered on the stream's
//! run loop as soon as possible) or [`ManualStream::push_buffered`] (held until the stream is
//! flushed). Creation and start failures can be injected to exercise degraded paths.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{
    BackendError, FlushMode, NativeStream, StreamBackend, StreamOptions, WatchList,
};
use crate::bridge::StreamCallback;
use crate::event::{RawEventBatch, StreamId};
use crate::flags::EventFlags;
use crate::run_loop::RunLoop;

pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct BackendState {
    next_stream_id: u64,
    streams: Vec<Arc<ManualStream>>,
    fail_next_create: bool,
    fail_next_start: bool,
}

#[derive(Debug, Clone)]
pub struct ManualBackend {
    state: Arc<Mutex<BackendState>>,
    next_event_id: Arc<AtomicU64>,
    flush_timeout: Duration,
}

impl Default for ManualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::with_flush_timeout(DEFAULT_FLUSH_TIMEOUT)
    }

    pub fn with_flush_timeout(flush_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            next_event_id: Arc::new(AtomicU64::new(1)),
            flush_timeout,
        }
    }

    /// Makes the next `create_stream` call fail.
    pub fn fail_next_create(&self) {
        self.state.lock().fail_next_create = true;
    }

    /// Makes the next created stream fail to start.
    pub fn fail_next_start(&self) {
        self.state.lock().fail_next_start = true;
    }

    /// Every stream created so far, in creation order.
    pub fn streams(&self) -> Vec<Arc<ManualStream>> {
        self.state.lock().streams.clone()
    }

    /// Streams that have not been invalidated.
    pub fn live_streams(&self) -> Vec<Arc<ManualStream>> {
        self.state
            .lock()
            .streams
            .iter()
            .filter(|stream| !stream.is_invalidated())
            .cloned()
            .collect()
    }

    /// The most recently created stream that is still live.
    pub fn current_stream(&self) -> Option<Arc<ManualStream>> {
        self.live_streams().pop()
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().streams.len()
    }
}

impl StreamBackend for ManualBackend {
    fn create_stream(
        &self,
        paths: &WatchList,
        options: StreamOptions,
        callback: StreamCallback,
    ) -> Result<Arc<dyn NativeStream>, BackendError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_create) {
            return Err(BackendError::CreateFailed("injected failure".to_owned()));
        }
        if paths.is_empty() {
            return Err(BackendError::CreateFailed("no paths to watch".to_owned()));
        }

        state.next_stream_id += 1;
        let id = StreamId(state.next_stream_id);
        let fail_start = std::mem::take(&mut state.fail_next_start);
        let next_event_id = Arc::clone(&self.next_event_id);
        let flush_timeout = self.flush_timeout;
        let stream = Arc::new_cyclic(|me| ManualStream {
            me: me.clone(),
            id,
            paths: paths.paths().to_vec(),
            options,
            callback,
            fail_start,
            flush_timeout,
            next_event_id,
            state: Mutex::new(StreamState::default()),
        });
        state.streams.push(Arc::clone(&stream));
        Ok(stream)
    }
}

#[derive(Debug, Default)]
struct StreamState {
    run_loop: Option<RunLoop>,
    started: bool,
    invalidated: bool,
    pending: RawEventBatch,
    flushes: usize,
}

#[derive(Debug)]
pub struct ManualStream {
    me: Weak<ManualStream>,
    id: StreamId,
    paths: Vec<PathBuf>,
    options: StreamOptions,
    callback: StreamCallback,
    fail_start: bool,
    flush_timeout: Duration,
    next_event_id: Arc<AtomicU64>,
    state: Mutex<StreamState>,
}

impl ManualStream {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn options(&self) -> StreamOptions {
        self.options
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_scheduled(&self) -> bool {
        self.state.lock().run_loop.is_some()
    }

    pub fn is_invalidated(&self) -> bool {
        self.state.lock().invalidated
    }

    /// Number of rows buffered and not yet delivered.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of flush requests received.
    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    /// Injects a batch and asks the run loop to deliver it.
    pub fn push(&self, batch: RawEventBatch) {
        self.push_buffered(batch);
        self.schedule_delivery();
    }

    /// Injects a batch without delivering it; it's held until the stream is flushed.
    pub fn push_buffered(&self, batch: RawEventBatch) {
        self.state.lock().pending.append(batch);
    }

    /// Injects a single event with the next transaction id, delivering it immediately.
    pub fn emit(&self, path: impl AsRef<Path>, flags: EventFlags) -> u64 {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        self.push(RawEventBatch::single(path.as_ref(), flags, id));
        id
    }

    fn schedule_delivery(&self) {
        let run_loop = {
            let state = self.state.lock();
            if !state.started || state.invalidated {
                return;
            }
            state.run_loop.clone()
        };
        let (Some(run_loop), Some(me)) = (run_loop, self.me.upgrade()) else {
            return;
        };
        run_loop.perform(move || me.deliver_pending());
    }

    fn deliver_pending(&self) {
        let batch = {
            let mut state = self.state.lock();
            if !state.started || state.invalidated || state.pending.is_empty() {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        self.callback.on_events(self.id, &batch);
    }
}

impl NativeStream for ManualStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn schedule(&self, run_loop: &RunLoop) {
        self.state.lock().run_loop = Some(run_loop.clone());
    }

    fn unschedule(&self, run_loop: &RunLoop) {
        let mut state = self.state.lock();
        if state.run_loop.as_ref() == Some(run_loop) {
            state.run_loop = None;
        }
    }

    fn start(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if state.invalidated {
            return Err(BackendError::Invalidated);
        }
        if state.run_loop.is_none() {
            return Err(BackendError::NotScheduled);
        }
        if self.fail_start {
            return Err(BackendError::StartFailed("injected failure".to_owned()));
        }
        state.started = true;
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().started = false;
    }

    fn invalidate(&self) {
        let mut state = self.state.lock();
        state.invalidated = true;
        state.started = false;
        state.run_loop = None;
        state.pending = RawEventBatch::default();
    }

    fn flush(&self, mode: FlushMode) {
        let run_loop = {
            let mut state = self.state.lock();
            state.flushes += 1;
            if !state.started || state.invalidated {
                return;
            }
            state.run_loop.clone()
        };
        let (Some(run_loop), Some(me)) = (run_loop, self.me.upgrade()) else {
            return;
        };

        match mode {
            FlushMode::Async => run_loop.perform(move || me.deliver_pending()),
            FlushMode::Sync => {
                if let Err(err) =
                    run_loop.perform_and_wait(move || me.deliver_pending(), self.flush_timeout)
                {
                    tracing::warn!(
                        target = "fswatch.events",
                        stream = %self.id,
                        error = %err,
                        "synchronous flush timed out"
                    );
                }
            }
        }
    }
}
