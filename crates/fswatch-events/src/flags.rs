//! Raw native flag bits.
//!
//! Event flags follow the FSEvents bit layout so that a backend translating from another OS
//! mechanism produces the same values a native stream would report. Multiple bits may be set on
//! a single event.

/// Bitmask reported per raw event.
pub type EventFlags = u32;

pub const NONE: EventFlags = 0x0000_0000;
/// The source coalesced changes below this path and is only reporting the root.
pub const MUST_SCAN_SUB_DIRS: EventFlags = 0x0000_0001;
pub const USER_DROPPED: EventFlags = 0x0000_0002;
pub const KERNEL_DROPPED: EventFlags = 0x0000_0004;
pub const EVENT_IDS_WRAPPED: EventFlags = 0x0000_0008;
pub const HISTORY_DONE: EventFlags = 0x0000_0010;
/// A watched root (or one of its ancestors) was moved, deleted or replaced.
pub const ROOT_CHANGED: EventFlags = 0x0000_0020;
pub const MOUNT: EventFlags = 0x0000_0040;
/// The volume holding a watched path went away.
pub const UNMOUNT: EventFlags = 0x0000_0080;
pub const ITEM_CREATED: EventFlags = 0x0000_0100;
pub const ITEM_REMOVED: EventFlags = 0x0000_0200;
pub const ITEM_INODE_META_MOD: EventFlags = 0x0000_0400;
pub const ITEM_RENAMED: EventFlags = 0x0000_0800;
pub const ITEM_MODIFIED: EventFlags = 0x0000_1000;
pub const ITEM_FINDER_INFO_MOD: EventFlags = 0x0000_2000;
pub const ITEM_CHANGE_OWNER: EventFlags = 0x0000_4000;
pub const ITEM_XATTR_MOD: EventFlags = 0x0000_8000;
pub const ITEM_IS_FILE: EventFlags = 0x0001_0000;
pub const ITEM_IS_DIR: EventFlags = 0x0002_0000;
pub const ITEM_IS_SYMLINK: EventFlags = 0x0004_0000;
pub const OWN_EVENT: EventFlags = 0x0008_0000;
pub const ITEM_IS_HARDLINK: EventFlags = 0x0010_0000;
pub const ITEM_IS_LAST_HARDLINK: EventFlags = 0x0020_0000;
pub const ITEM_CLONED: EventFlags = 0x0040_0000;

/// Stream creation flags.
pub mod create {
    pub type CreateFlags = u32;

    pub const NONE: CreateFlags = 0x0000_0000;
    pub const USE_CF_TYPES: CreateFlags = 0x0000_0001;
    /// Deliver the first event in a burst immediately instead of waiting out the latency.
    pub const NO_DEFER: CreateFlags = 0x0000_0002;
    /// Report changes to the path hierarchy leading up to a watched root.
    pub const WATCH_ROOT: CreateFlags = 0x0000_0004;
    pub const IGNORE_SELF: CreateFlags = 0x0000_0008;
    /// Report events for individual files rather than only their parent directories.
    pub const FILE_EVENTS: CreateFlags = 0x0000_0010;
}

const NAMED_FLAGS: &[(&str, EventFlags)] = &[
    ("must_scan_sub_dirs", MUST_SCAN_SUB_DIRS),
    ("user_dropped", USER_DROPPED),
    ("kernel_dropped", KERNEL_DROPPED),
    ("event_ids_wrapped", EVENT_IDS_WRAPPED),
    ("history_done", HISTORY_DONE),
    ("root_changed", ROOT_CHANGED),
    ("mount", MOUNT),
    ("unmount", UNMOUNT),
    ("created", ITEM_CREATED),
    ("removed", ITEM_REMOVED),
    ("inode_meta_mod", ITEM_INODE_META_MOD),
    ("renamed", ITEM_RENAMED),
    ("modified", ITEM_MODIFIED),
    ("finder_info_mod", ITEM_FINDER_INFO_MOD),
    ("change_owner", ITEM_CHANGE_OWNER),
    ("xattr_mod", ITEM_XATTR_MOD),
    ("is_file", ITEM_IS_FILE),
    ("is_dir", ITEM_IS_DIR),
    ("is_symlink", ITEM_IS_SYMLINK),
    ("own_event", OWN_EVENT),
    ("is_hardlink", ITEM_IS_HARDLINK),
    ("is_last_hardlink", ITEM_IS_LAST_HARDLINK),
    ("cloned", ITEM_CLONED),
];

/// Parses a flag name (e.g. `created`, `removed`, `modified`) into its bit.
///
/// Matching is case-insensitive and accepts `-` in place of `_`. A few aliases used by
/// subscription masks are accepted as well (`deleted`, `updated`, `moved`).
pub fn parse_flag_name(name: &str) -> Option<EventFlags> {
    let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
    let normalized = match normalized.as_str() {
        "deleted" => "removed",
        "updated" => "modified",
        "moved" => "renamed",
        other => other,
    };
    NAMED_FLAGS
        .iter()
        .find(|(flag_name, _)| *flag_name == normalized)
        .map(|(_, bit)| *bit)
}

/// Returns the names of all known bits set in `flags`, in ascending bit order.
pub fn flag_names(flags: EventFlags) -> Vec<&'static str> {
    NAMED_FLAGS
        .iter()
        .filter(|(_, bit)| flags & bit != 0)
        .map(|(name, _)| *name)
        .collect()
}
