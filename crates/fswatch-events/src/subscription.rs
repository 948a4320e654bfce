//! Subscriptions and the per-subscription matching predicate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::event::EventRecord;
use crate::flags::EventFlags;

/// A caller's interest in a path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionContext {
    /// Absolute path. Rewritten in place when configuration resolves symlinks.
    pub path: PathBuf,
    /// The first path in the symlink chain, set at most once. `None` if `path` was never a link.
    pub original_link_path: Option<PathBuf>,
    /// Prefix matching when set, single-level matching otherwise.
    pub recursive: bool,
    /// Raw flag bits of interest. Zero matches every flag value.
    pub mask: EventFlags,
}

impl SubscriptionContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_mask(mut self, mask: EventFlags) -> Self {
        self.mask = mask;
        self
    }
}

/// Decides whether `event` should be delivered to the subscription described by `sc`.
///
/// - Recursive subscriptions match when the event path starts with the subscription path
///   (byte-wise, no separator normalization).
/// - Otherwise the event path must match `<subscription path>*`, case-insensitively, where `*`
///   does not cross a path separator. The subscription path is taken literally, so `[`, `{` and
///   `*` in directory names carry no pattern meaning. A subscription path without a trailing separator also
///   matches its direct children.
/// - A non-zero mask additionally requires at least one shared flag bit.
pub fn should_fire(sc: &SubscriptionContext, event: &EventRecord) -> bool {
    let path_matches = if sc.recursive {
        has_byte_prefix(&event.path, &sc.path)
    } else {
        matches_single_level(&sc.path, &event.path)
    };
    if !path_matches {
        return false;
    }

    sc.mask == 0 || event.raw_flags & sc.mask != 0
}

fn has_byte_prefix(path: &Path, prefix: &Path) -> bool {
    path.as_os_str()
        .as_encoded_bytes()
        .starts_with(prefix.as_os_str().as_encoded_bytes())
}

fn matches_single_level(subscription_path: &Path, event_path: &Path) -> bool {
    let base = subscription_path.as_os_str().as_encoded_bytes();
    let path = event_path.as_os_str().as_encoded_bytes();
    if path.len() < base.len() || !path[..base.len()].eq_ignore_ascii_case(base) {
        return false;
    }

    let rest = &path[base.len()..];
    if !contains_separator(rest) {
        return true;
    }
    // A directory named without its trailing separator still covers its direct children.
    match rest.split_first() {
        Some((first, child)) if !ends_with_separator(base) && is_separator_byte(*first) => {
            !contains_separator(child)
        }
        _ => false,
    }
}

fn is_separator_byte(byte: u8) -> bool {
    byte.is_ascii() && std::path::is_separator(char::from(byte))
}

fn contains_separator(bytes: &[u8]) -> bool {
    bytes.iter().copied().any(is_separator_byte)
}

fn ends_with_separator(bytes: &[u8]) -> bool {
    bytes.last().copied().is_some_and(is_separator_byte)
}

/// Identifier handed out when a subscription is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handler invoked for each event that passes [`should_fire`].
pub type EventCallback = Arc<dyn Fn(&EventRecord, &SubscriptionContext) + Send + Sync>;

/// A registered subscription: matching context plus the handler to invoke.
#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub context: SubscriptionContext,
    pub callback: EventCallback,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
