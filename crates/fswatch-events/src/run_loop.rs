//! A cooperative, thread-bound event loop.
//!
//! Native streams are scheduled onto a [`RunLoop`] and deliver their callbacks by posting tasks
//! to it, so every callback for a stream runs on the thread driving that loop. Each thread owns
//! at most one loop, created lazily by [`RunLoop::current`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel as channel;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum LoopMessage {
    Perform(Task),
    Wake,
}

struct Inner {
    id: u64,
    thread: ThreadId,
    tx: channel::Sender<LoopMessage>,
    rx: channel::Receiver<LoopMessage>,
    running: AtomicBool,
    waiting: AtomicBool,
    stop_requested: AtomicBool,
}

/// Handle to a thread's run loop. Cheap to clone; clones refer to the same loop.
#[derive(Clone)]
pub struct RunLoop {
    inner: Arc<Inner>,
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("id", &self.inner.id)
            .field("running", &self.is_running())
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

impl PartialEq for RunLoop {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RunLoop {}

thread_local! {
    static CURRENT: RunLoop = RunLoop::new_for_current_thread();
}

/// Error returned by [`RunLoop::perform_and_wait`] when the task did not complete in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run loop task did not complete within {0:?}")]
pub struct PerformTimeout(pub Duration);

impl RunLoop {
    fn new_for_current_thread() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let (tx, rx) = channel::unbounded();
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                thread: thread::current().id(),
                tx,
                rx,
                running: AtomicBool::new(false),
                waiting: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the calling thread's run loop.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    /// Drives the calling thread's run loop until a stop is requested.
    pub fn run_current() {
        Self::current().run();
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// True while a thread is inside [`RunLoop::run_current`].
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// True while the loop is running and blocked waiting for work.
    pub fn is_waiting(&self) -> bool {
        self.inner.waiting.load(Ordering::Acquire)
    }

    /// Asks the loop to return from `run`.
    ///
    /// A stop requested while the loop isn't running is remembered and makes the next run
    /// return immediately.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::Release);
        let _ = self.inner.tx.send(LoopMessage::Wake);
    }

    /// Posts `task` to run on the loop thread.
    pub fn perform<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.inner.tx.send(LoopMessage::Perform(Box::new(task)));
    }

    /// Runs `task` on the loop thread and waits for it to finish.
    ///
    /// Runs inline when called from the loop thread itself.
    pub fn perform_and_wait<F>(&self, task: F, timeout: Duration) -> Result<(), PerformTimeout>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_current() {
            task();
            return Ok(());
        }

        let (done_tx, done_rx) = channel::bounded::<()>(1);
        self.perform(move || {
            task();
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(timeout)
            .map_err(|_| PerformTimeout(timeout))
    }

    fn run(&self) {
        debug_assert!(self.is_current(), "a run loop can only be run on its own thread");
        self.inner.running.store(true, Ordering::Release);
        tracing::trace!(target = "fswatch.events", run_loop = self.inner.id, "run loop started");

        loop {
            if self.inner.stop_requested.swap(false, Ordering::AcqRel) {
                break;
            }

            let msg = match self.inner.rx.try_recv() {
                Ok(msg) => msg,
                Err(channel::TryRecvError::Empty) => {
                    self.inner.waiting.store(true, Ordering::Release);
                    let msg = self.inner.rx.recv();
                    self.inner.waiting.store(false, Ordering::Release);
                    match msg {
                        Ok(msg) => msg,
                        Err(_) => break,
                    }
                }
                Err(channel::TryRecvError::Disconnected) => break,
            };

            match msg {
                LoopMessage::Perform(task) => {
                    if let Err(panic) =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(task))
                    {
                        tracing::error!(
                            target = "fswatch.events",
                            run_loop = self.inner.id,
                            panic = %panic_message(panic.as_ref()),
                            "run loop task panicked"
                        );
                    }
                }
                LoopMessage::Wake => {}
            }
        }

        self.inner.waiting.store(false, Ordering::Release);
        self.inner.running.store(false, Ordering::Release);
        tracing::trace!(target = "fswatch.events", run_loop = self.inner.id, "run loop stopped");
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("<non-string panic>")
}
