//! Translation of raw native batches into fired event records.

use std::fmt;
use std::sync::Arc;

use crate::action::actions_for;
use crate::event::{EventRecord, RawEventBatch, StreamId};
use crate::flags;
use crate::run_loop::panic_message;

/// Receives fired event records.
///
/// Fires run inline on the loop thread, so implementations must not block on slow work.
pub trait EventSink: Send + Sync {
    fn fire(&self, event: &EventRecord);
}

impl<F> EventSink for F
where
    F: Fn(&EventRecord) + Send + Sync,
{
    fn fire(&self, event: &EventRecord) {
        self(event)
    }
}

/// Callback handed to a native stream at creation.
///
/// Streams invoke [`StreamCallback::on_events`] once per batch, on the thread driving the loop
/// the stream is scheduled on.
#[derive(Clone)]
pub struct StreamCallback {
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for StreamCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallback").finish_non_exhaustive()
    }
}

impl StreamCallback {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Expands each raw event into one fire per matching action (or a single `UNKNOWN`).
    ///
    /// Never panics: a panicking sink is logged and the remaining fires still run.
    pub fn on_events(&self, stream: StreamId, batch: &RawEventBatch) {
        if !batch.is_consistent() {
            tracing::warn!(
                target = "fswatch.events",
                %stream,
                paths = batch.paths.len(),
                flags = batch.flags.len(),
                ids = batch.ids.len(),
                "raw event batch columns differ in length; dropping incomplete rows"
            );
        }

        for (path, raw_flags, id) in batch.iter() {
            let mut record = EventRecord::new(stream, path.to_path_buf(), raw_flags, id);
            tracing::trace!(
                target = "fswatch.events",
                %stream,
                path = %record.path.display(),
                id,
                flags = ?flags::flag_names(raw_flags),
                "raw event"
            );

            if raw_flags & flags::MUST_SCAN_SUB_DIRS != 0 {
                tracing::debug!(
                    target = "fswatch.events",
                    %stream,
                    root = %record.path.display(),
                    "collision: changes coalesced below root"
                );
            }
            if raw_flags & flags::ROOT_CHANGED != 0 {
                tracing::debug!(
                    target = "fswatch.events",
                    %stream,
                    path = %record.path.display(),
                    "watched root changed"
                );
            }
            if raw_flags & flags::UNMOUNT != 0 {
                tracing::debug!(
                    target = "fswatch.events",
                    %stream,
                    path = %record.path.display(),
                    "watched volume unmounted"
                );
            }

            for action in actions_for(raw_flags) {
                record.action = action;
                self.fire(&record);
            }
        }
    }

    fn fire(&self, record: &EventRecord) {
        let sink = &self.sink;
        if let Err(panic) =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.fire(record)))
        {
            tracing::error!(
                target = "fswatch.events",
                stream = %record.stream,
                path = %record.path.display(),
                action = %record.action,
                panic = %panic_message(panic.as_ref()),
                "event sink panicked while handling a fired event"
            );
        }
    }
}
