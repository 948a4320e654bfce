use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flags::{self, EventFlags};

/// Semantic label assigned to a `(path, flag)` occurrence.
///
/// Subscribers consume actions instead of raw flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    AttributesModified,
    Created,
    Deleted,
    Updated,
    MovedTo,
    CollisionWithin,
    Unmounted,
    RootChanged,
    Unknown,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::AttributesModified => "ATTRIBUTES_MODIFIED",
            Action::Created => "CREATED",
            Action::Deleted => "DELETED",
            Action::Updated => "UPDATED",
            Action::MovedTo => "MOVED_TO",
            Action::CollisionWithin => "COLLISION_WITHIN",
            Action::Unmounted => "UNMOUNTED",
            Action::RootChanged => "ROOT_CHANGED",
            Action::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flag bit to action table, ascending by bit value.
///
/// The order defines the order of multiplexed fire calls for a single raw event, so it must stay
/// sorted. Several bits share the `ATTRIBUTES_MODIFIED` label; each one that is set fires
/// separately.
pub const ACTION_TABLE: &[(EventFlags, Action)] = &[
    (flags::MUST_SCAN_SUB_DIRS, Action::CollisionWithin),
    (flags::ROOT_CHANGED, Action::RootChanged),
    (flags::UNMOUNT, Action::Unmounted),
    (flags::ITEM_CREATED, Action::Created),
    (flags::ITEM_REMOVED, Action::Deleted),
    (flags::ITEM_INODE_META_MOD, Action::AttributesModified),
    (flags::ITEM_RENAMED, Action::MovedTo),
    (flags::ITEM_MODIFIED, Action::Updated),
    (flags::ITEM_CHANGE_OWNER, Action::AttributesModified),
    (flags::ITEM_XATTR_MOD, Action::AttributesModified),
];

/// Expands raw flags into the actions they map to, one per matching table entry.
///
/// Yields exactly one [`Action::Unknown`] when no table entry matches.
pub fn actions_for(raw_flags: EventFlags) -> impl Iterator<Item = Action> {
    let matched: Vec<Action> = ACTION_TABLE
        .iter()
        .filter(|(bit, _)| raw_flags & bit != 0)
        .map(|(_, action)| *action)
        .collect();

    let fallback = matched.is_empty().then_some(Action::Unknown);
    matched.into_iter().chain(fallback)
}
