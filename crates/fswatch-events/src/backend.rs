//! The seam between the publisher and a platform watch backend.
//!
//! A backend creates *streams*: a single native watch over an explicit list of absolute paths.
//! The publisher owns at most one stream at a time and drives it through
//! `schedule → start → (flush)* → stop → unschedule → invalidate`, then releases it by dropping
//! its last reference.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bridge::StreamCallback;
use crate::event::StreamId;
use crate::flags::create::{self, CreateFlags};
use crate::run_loop::RunLoop;

/// Options requested when creating a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    pub create_flags: CreateFlags,
    /// Seconds the source may buffer events before delivering them. Ignored with `NO_DEFER` for
    /// the first event of a burst.
    pub latency_secs: f64,
}

impl StreamOptions {
    pub fn file_events(&self) -> bool {
        self.create_flags & create::FILE_EVENTS != 0
    }

    pub fn no_defer(&self) -> bool {
        self.create_flags & create::NO_DEFER != 0
    }

    pub fn watch_root(&self) -> bool {
        self.create_flags & create::WATCH_ROOT != 0
    }
}

impl Default for StreamOptions {
    /// Per-file granularity, no deferral and root change visibility.
    fn default() -> Self {
        Self {
            create_flags: create::FILE_EVENTS | create::NO_DEFER | create::WATCH_ROOT,
            latency_secs: 1.0,
        }
    }
}

/// The path list argument for stream creation.
///
/// Built fresh for each creation attempt and dropped on every exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchList {
    paths: Vec<PathBuf>,
}

impl WatchList {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|path| path.as_ref().to_path_buf())
                .collect(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Block until buffered events have been delivered through the callback.
    Sync,
    /// Schedule delivery of buffered events and return immediately.
    Async,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to create stream: {0}")]
    CreateFailed(String),

    #[error("failed to start stream: {0}")]
    StartFailed(String),

    #[error("stream is not scheduled on a run loop")]
    NotScheduled,

    #[error("stream has been invalidated")]
    Invalidated,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// A live native watch.
///
/// Implementations use interior mutability: the publisher may hand a clone of the stream
/// reference to a flushing thread while it keeps lifecycle control.
pub trait NativeStream: Send + Sync {
    fn id(&self) -> StreamId;

    fn schedule(&self, run_loop: &RunLoop);

    fn unschedule(&self, run_loop: &RunLoop);

    fn start(&self) -> Result<(), BackendError>;

    fn stop(&self);

    /// After invalidation no further callbacks are delivered, including ones already queued.
    fn invalidate(&self);

    fn flush(&self, mode: FlushMode);
}

impl fmt::Debug for dyn NativeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeStream")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// Creates native streams.
pub trait StreamBackend: Send + Sync {
    fn create_stream(
        &self,
        paths: &WatchList,
        options: StreamOptions,
        callback: StreamCallback,
    ) -> Result<Arc<dyn NativeStream>, BackendError>;
}

impl<B: ?Sized + StreamBackend> StreamBackend for Arc<B> {
    fn create_stream(
        &self,
        paths: &WatchList,
        options: StreamOptions,
        callback: StreamCallback,
    ) -> Result<Arc<dyn NativeStream>, BackendError> {
        self.as_ref().create_stream(paths, options, callback)
    }
}
