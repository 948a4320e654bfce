//! Portable backend built on the `notify` crate.
//!
//! Each stream owns one recommended watcher with a recursive watch per root. The watcher
//! callback only pushes into a bounded queue; the queue is drained on the stream's run loop,
//! where `notify` events are translated into raw FSEvents-style flag rows.
//!
//! ## Backpressure
//!
//! When the raw queue is full, or `notify` reports an error or asks for a rescan, events have
//! been lost. The next drain then reports one `MUST_SCAN_SUB_DIRS` row per watched root, which
//! subscribers see as `COLLISION_WITHIN`.
//!
//! The queue capacity can be tuned with `FSWATCH_NOTIFY_RAW_QUEUE_CAPACITY`.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as channel;
use notify::event::{EventKind, MetadataKind, ModifyKind, RemoveKind};
use notify::{RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::backend::{
    BackendError, FlushMode, NativeStream, StreamBackend, StreamOptions, WatchList,
};
use crate::bridge::StreamCallback;
use crate::event::{RawEventBatch, StreamId};
use crate::flags::{self, EventFlags};
use crate::manual::DEFAULT_FLUSH_TIMEOUT;
use crate::run_loop::RunLoop;

const RAW_QUEUE_CAPACITY: usize = 4096;
pub const ENV_RAW_QUEUE_CAPACITY: &str = "FSWATCH_NOTIFY_RAW_QUEUE_CAPACITY";

type RawMessage = notify::Result<notify::Event>;

fn queue_capacity_from_env(var: &str) -> io::Result<Option<usize>> {
    let raw = match std::env::var(var) {
        Ok(value) => value,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(err) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("failed to read env var {var}: {err}"),
            ))
        }
    };

    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return Ok(None);
    }

    let parsed = raw.parse::<usize>().map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid {var}={raw:?}: {err}"),
        )
    })?;

    const MAX_CAPACITY: usize = 1_000_000;
    Ok(Some(parsed.clamp(1, MAX_CAPACITY)))
}

fn try_send_or_overflow<T>(tx: &channel::Sender<T>, overflowed: &AtomicBool, msg: T) {
    match tx.try_send(msg) {
        Ok(()) => {}
        Err(channel::TrySendError::Full(_)) => {
            overflowed.store(true, Ordering::Release);
        }
        // The stream is being released.
        Err(channel::TrySendError::Disconnected(_)) => {}
    }
}

fn requests_rescan(event: &notify::Event) -> bool {
    matches!(event.attrs.flag(), Some(notify::event::Flag::Rescan))
}

/// Maps a `notify` event kind onto FSEvents item flags. `None` for kinds FSEvents never reports.
pub fn flags_for_kind(kind: &EventKind) -> Option<EventFlags> {
    use notify::event::CreateKind;

    let flags = match kind {
        EventKind::Create(CreateKind::File) => flags::ITEM_CREATED | flags::ITEM_IS_FILE,
        EventKind::Create(CreateKind::Folder) => flags::ITEM_CREATED | flags::ITEM_IS_DIR,
        EventKind::Create(_) => flags::ITEM_CREATED,
        EventKind::Remove(RemoveKind::File) => flags::ITEM_REMOVED | flags::ITEM_IS_FILE,
        EventKind::Remove(RemoveKind::Folder) => flags::ITEM_REMOVED | flags::ITEM_IS_DIR,
        EventKind::Remove(_) => flags::ITEM_REMOVED,
        EventKind::Modify(ModifyKind::Name(_)) => flags::ITEM_RENAMED,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::Ownership)) => {
            flags::ITEM_CHANGE_OWNER
        }
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::Extended)) => flags::ITEM_XATTR_MOD,
        EventKind::Modify(ModifyKind::Metadata(_)) => flags::ITEM_INODE_META_MOD,
        EventKind::Modify(_) => flags::ITEM_MODIFIED,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
    };
    Some(flags)
}

/// Creates streams backed by the platform's recommended `notify` watcher.
#[derive(Debug, Clone)]
pub struct NotifyBackend {
    raw_queue_capacity: usize,
    flush_timeout: Duration,
    next_stream_id: Arc<AtomicU64>,
    next_event_id: Arc<AtomicU64>,
}

impl NotifyBackend {
    /// Reads the queue capacity override from the environment.
    pub fn new() -> Result<Self, BackendError> {
        let capacity =
            queue_capacity_from_env(ENV_RAW_QUEUE_CAPACITY)?.unwrap_or(RAW_QUEUE_CAPACITY);
        Ok(Self::with_raw_queue_capacity(capacity))
    }

    pub fn with_raw_queue_capacity(raw_queue_capacity: usize) -> Self {
        Self {
            raw_queue_capacity: raw_queue_capacity.max(1),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            next_stream_id: Arc::new(AtomicU64::new(1)),
            next_event_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    pub fn raw_queue_capacity(&self) -> usize {
        self.raw_queue_capacity
    }
}

impl StreamBackend for NotifyBackend {
    fn create_stream(
        &self,
        paths: &WatchList,
        options: StreamOptions,
        callback: StreamCallback,
    ) -> Result<Arc<dyn NativeStream>, BackendError> {
        if paths.is_empty() {
            return Err(BackendError::CreateFailed("no paths to watch".to_owned()));
        }
        if !options.file_events() {
            tracing::debug!(
                target = "fswatch.events",
                "notify streams always report per-file events"
            );
        }

        let (raw_tx, raw_rx) = channel::bounded::<RawMessage>(self.raw_queue_capacity);
        let shared = Arc::new(Shared {
            id: StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed)),
            roots: paths.paths().to_vec(),
            callback,
            raw_rx,
            overflowed: AtomicBool::new(false),
            drain_queued: AtomicBool::new(false),
            next_event_id: Arc::clone(&self.next_event_id),
            state: Mutex::new(SharedState::default()),
        });

        let shared_cb = Arc::clone(&shared);
        let watcher = notify::recommended_watcher(move |res| {
            try_send_or_overflow(&raw_tx, &shared_cb.overflowed, res);
            shared_cb.schedule_drain();
        })
        .map_err(|err| BackendError::CreateFailed(err.to_string()))?;

        Ok(Arc::new(NotifyStream {
            shared,
            watcher: Mutex::new(Some(watcher)),
            flush_timeout: self.flush_timeout,
        }))
    }
}

#[derive(Debug, Default)]
struct SharedState {
    run_loop: Option<RunLoop>,
    started: bool,
    invalidated: bool,
}

/// State reachable from the watcher callback. Never refers back to the watcher.
#[derive(Debug)]
struct Shared {
    id: StreamId,
    roots: Vec<PathBuf>,
    callback: StreamCallback,
    raw_rx: channel::Receiver<RawMessage>,
    overflowed: AtomicBool,
    drain_queued: AtomicBool,
    next_event_id: Arc<AtomicU64>,
    state: Mutex<SharedState>,
}

impl Shared {
    fn deliverable_loop(&self) -> Option<RunLoop> {
        let state = self.state.lock();
        if !state.started || state.invalidated {
            return None;
        }
        state.run_loop.clone()
    }

    fn schedule_drain(self: &Arc<Self>) {
        let Some(run_loop) = self.deliverable_loop() else {
            return;
        };
        if self.drain_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let me = Arc::clone(self);
        run_loop.perform(move || {
            me.drain_queued.store(false, Ordering::Release);
            me.drain();
        });
    }

    fn next_event_id(&self) -> u64 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    fn push_rescan(&self, batch: &mut RawEventBatch) {
        for root in &self.roots {
            batch.push(root.clone(), flags::MUST_SCAN_SUB_DIRS, self.next_event_id());
        }
    }

    /// Translates everything queued so far and hands it to the callback as one batch.
    fn drain(&self) {
        if self.deliverable_loop().is_none() {
            return;
        }

        let mut batch = RawEventBatch::new();
        let mut lost = false;
        for msg in self.raw_rx.try_iter() {
            match msg {
                Ok(event) if requests_rescan(&event) => lost = true,
                Ok(event) => {
                    let Some(raw_flags) = flags_for_kind(&event.kind) else {
                        continue;
                    };
                    for path in event.paths {
                        batch.push(path, raw_flags, self.next_event_id());
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        target = "fswatch.events",
                        stream = %self.id,
                        error = %err,
                        "notify watcher reported an error; requesting rescan"
                    );
                    lost = true;
                }
            }
        }

        if self.overflowed.swap(false, Ordering::AcqRel) {
            tracing::debug!(
                target = "fswatch.events",
                stream = %self.id,
                "raw event queue overflowed; requesting rescan"
            );
            lost = true;
        }
        if lost {
            self.push_rescan(&mut batch);
        }

        if !batch.is_empty() {
            self.callback.on_events(self.id, &batch);
        }
    }
}

pub struct NotifyStream {
    shared: Arc<Shared>,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    flush_timeout: Duration,
}

impl std::fmt::Debug for NotifyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyStream")
            .field("id", &self.shared.id)
            .field("roots", &self.shared.roots)
            .finish_non_exhaustive()
    }
}

impl NotifyStream {
    pub fn roots(&self) -> &[PathBuf] {
        &self.shared.roots
    }
}

impl NativeStream for NotifyStream {
    fn id(&self) -> StreamId {
        self.shared.id
    }

    fn schedule(&self, run_loop: &RunLoop) {
        self.shared.state.lock().run_loop = Some(run_loop.clone());
    }

    fn unschedule(&self, run_loop: &RunLoop) {
        let mut state = self.shared.state.lock();
        if state.run_loop.as_ref() == Some(run_loop) {
            state.run_loop = None;
        }
    }

    fn start(&self) -> Result<(), BackendError> {
        {
            let state = self.shared.state.lock();
            if state.invalidated {
                return Err(BackendError::Invalidated);
            }
            if state.run_loop.is_none() {
                return Err(BackendError::NotScheduled);
            }
        }

        let mut watcher = self.watcher.lock();
        let Some(watcher) = watcher.as_mut() else {
            return Err(BackendError::Invalidated);
        };

        let mut watched = 0usize;
        for root in &self.shared.roots {
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => watched += 1,
                Err(err) => tracing::warn!(
                    target = "fswatch.events",
                    stream = %self.shared.id,
                    root = %root.display(),
                    error = %err,
                    "cannot watch path"
                ),
            }
        }
        if watched == 0 {
            return Err(BackendError::StartFailed(
                "none of the requested paths could be watched".to_owned(),
            ));
        }

        self.shared.state.lock().started = true;
        // Anything queued before start is delivered now.
        self.shared.schedule_drain();
        Ok(())
    }

    fn stop(&self) {
        self.shared.state.lock().started = false;
        if let Some(watcher) = self.watcher.lock().as_mut() {
            for root in &self.shared.roots {
                let _ = watcher.unwatch(root);
            }
        }
    }

    fn invalidate(&self) {
        {
            let mut state = self.shared.state.lock();
            state.invalidated = true;
            state.started = false;
            state.run_loop = None;
        }
        // Dropping the watcher releases the callback's queue sender.
        let watcher = self.watcher.lock().take();
        drop(watcher);
        for _ in self.shared.raw_rx.try_iter() {}
    }

    fn flush(&self, mode: FlushMode) {
        let Some(run_loop) = self.shared.deliverable_loop() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        match mode {
            FlushMode::Async => run_loop.perform(move || shared.drain()),
            FlushMode::Sync => {
                if let Err(err) = run_loop.perform_and_wait(move || shared.drain(), self.flush_timeout)
                {
                    tracing::warn!(
                        target = "fswatch.events",
                        stream = %self.shared.id,
                        error = %err,
                        "synchronous flush timed out"
                    );
                }
            }
        }
    }
}
