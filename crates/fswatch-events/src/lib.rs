//! File change event publishing.
//!
//! This crate turns raw native filesystem notifications into semantic events delivered to
//! path-based subscriptions:
//! - Subscriptions name a path, whether it is matched recursively, and an optional mask of raw
//!   flag bits. Symlinked subscription paths are resolved before watching.
//! - A publisher owns a single native stream over the union of all subscribed paths and
//!   recreates it whenever the subscription set changes.
//! - Raw events carry FSEvents-style flag bits; each matching bit expands into one fired
//!   [`Action`].
//! - Native streams come from a pluggable [`StreamBackend`]. [`ManualBackend`] is deterministic
//!   and intended for tests; the `notify`-based backend is available behind the `watch-notify`
//!   feature.
//!
//! Callbacks are delivered on the thread running the publisher, via a per-thread [`RunLoop`].

mod action;
mod backend;
mod bridge;
mod error;
mod event;
mod factory;
pub mod flags;
mod manual;
#[cfg(any(test, feature = "watch-notify"))]
mod notify_backend;
mod publisher;
mod resolve;
mod run_loop;
mod subscription;

pub use action::{actions_for, Action, ACTION_TABLE};
pub use backend::{BackendError, FlushMode, NativeStream, StreamBackend, StreamOptions, WatchList};
pub use bridge::{EventSink, StreamCallback};
pub use error::PublisherError;
pub use event::{EventRecord, RawEventBatch, StreamId};
pub use factory::{EventFactory, PublisherConstructor, PublisherRegistry, SubscriptionDispatcher};
pub use flags::EventFlags;
pub use manual::{ManualBackend, ManualStream, DEFAULT_FLUSH_TIMEOUT};
pub use publisher::{EventPublisher, FsEventsPublisher, FSEVENTS_PUBLISHER_NAME};
pub use resolve::{resolve_subscription_path, resolve_symlinks, Resolution, MAX_SYMLINK_DEPTH};
pub use run_loop::{PerformTimeout, RunLoop};
pub use subscription::{
    should_fire, EventCallback, Subscription, SubscriptionContext, SubscriptionId,
};

#[cfg(feature = "watch-notify")]
pub use notify_backend::{flags_for_kind, NotifyBackend, NotifyStream, ENV_RAW_QUEUE_CAPACITY};
