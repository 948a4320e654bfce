use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::action::Action;
use crate::flags::EventFlags;

/// Identity of a native stream.
///
/// Event records carry this for correlation only; it does not keep the stream alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// A single semantic event handed to the dispatcher.
///
/// Records are ephemeral: one is built per raw native event and re-labelled for each action the
/// raw flags expand to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub path: PathBuf,
    pub raw_flags: EventFlags,
    /// Monotonically increasing id assigned by the native source.
    pub transaction_id: u64,
    pub action: Action,
    pub stream: StreamId,
}

impl EventRecord {
    pub fn new(stream: StreamId, path: PathBuf, raw_flags: EventFlags, transaction_id: u64) -> Self {
        Self {
            path,
            raw_flags,
            transaction_id,
            action: Action::Unknown,
            stream,
        }
    }
}

/// A batch of raw events as delivered by a native stream.
///
/// The three columns are parallel and expected to be of equal length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEventBatch {
    pub paths: Vec<PathBuf>,
    pub flags: Vec<EventFlags>,
    pub ids: Vec<u64>,
}

impl RawEventBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            paths: Vec::with_capacity(capacity),
            flags: Vec::with_capacity(capacity),
            ids: Vec::with_capacity(capacity),
        }
    }

    pub fn single(path: impl Into<PathBuf>, flags: EventFlags, id: u64) -> Self {
        let mut batch = Self::with_capacity(1);
        batch.push(path, flags, id);
        batch
    }

    pub fn push(&mut self, path: impl Into<PathBuf>, flags: EventFlags, id: u64) {
        self.paths.push(path.into());
        self.flags.push(flags);
        self.ids.push(id);
    }

    pub fn append(&mut self, other: RawEventBatch) {
        self.paths.extend(other.paths);
        self.flags.extend(other.flags);
        self.ids.extend(other.ids);
    }

    /// Number of complete rows (the shortest column wins if the columns disagree).
    pub fn len(&self) -> usize {
        self.paths.len().min(self.flags.len()).min(self.ids.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.paths.len() == self.flags.len() && self.flags.len() == self.ids.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, EventFlags, u64)> {
        self.paths
            .iter()
            .zip(self.flags.iter())
            .zip(self.ids.iter())
            .map(|((path, flags), id)| (path.as_path(), *flags, *id))
    }
}
