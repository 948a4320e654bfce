//! Bounded symlink resolution for watched paths.
//!
//! Native watches want real paths, so configured subscription paths are resolved through a
//! bounded number of symlink hops before they're added to the watch set. Resolution is best
//! effort: the filesystem can change between resolution and use, and lookup errors simply end
//! the walk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::subscription::SubscriptionContext;

/// Maximum number of symlink hops followed for a single path.
pub const MAX_SYMLINK_DEPTH: usize = 5;

/// Outcome of resolving a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The last path reached. May still be a symlink if the hop bound was exhausted.
    pub path: PathBuf,
    /// The first path seen that was a symlink, if any.
    pub first_link: Option<PathBuf>,
    /// Number of hops taken.
    pub hops: usize,
}

/// Follows symlinks starting at `path`, up to `max_depth` hops.
///
/// Relative link targets are anchored at the parent of `anchor_link` when given, otherwise at
/// the parent of the first link encountered.
pub fn resolve_symlinks(path: &Path, anchor_link: Option<&Path>, max_depth: usize) -> Resolution {
    let mut current = path.to_path_buf();
    let mut first_link = anchor_link.map(Path::to_path_buf);
    let mut seen_link = None;
    let mut hops = 0;

    while hops < max_depth {
        if !is_symlink(&current) {
            break;
        }
        let anchor = first_link.get_or_insert_with(|| current.clone()).clone();
        if seen_link.is_none() {
            seen_link = Some(current.clone());
        }

        let target = match fs::read_link(&current) {
            Ok(target) => target,
            Err(err) => {
                tracing::trace!(
                    target = "fswatch.events",
                    path = %current.display(),
                    error = %err,
                    "failed to read symlink; stopping resolution"
                );
                break;
            }
        };

        current = if target.is_absolute() {
            target
        } else {
            match anchor.parent() {
                Some(parent) => parent.join(target),
                None => target,
            }
        };
        hops += 1;
    }

    Resolution {
        path: current,
        first_link: seen_link,
        hops,
    }
}

/// Resolves a subscription's path in place.
///
/// `original_link_path` is written only if it was unset; later hops (and later reconfigurations)
/// never overwrite it.
pub fn resolve_subscription_path(sc: &mut SubscriptionContext) {
    let resolution = resolve_symlinks(
        &sc.path,
        sc.original_link_path.as_deref(),
        MAX_SYMLINK_DEPTH,
    );

    if resolution.hops == MAX_SYMLINK_DEPTH && is_symlink(&resolution.path) {
        tracing::debug!(
            target = "fswatch.events",
            path = %resolution.path.display(),
            max_depth = MAX_SYMLINK_DEPTH,
            "symlink chain exceeds the maximum depth; watching the last resolved hop"
        );
    }

    if sc.original_link_path.is_none() {
        sc.original_link_path = resolution.first_link;
    }
    sc.path = resolution.path;
}

/// Errors (broken parents, permission denied) are treated as "not a symlink".
fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}
