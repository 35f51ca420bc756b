//! Arbor stores named file artifacts in a single cache directory,
//! under an optional total byte budget, and keeps any one directory
//! from accumulating too many entries by spreading files across a
//! self-balancing tree of numbered shard subdirectories.  There is no
//! index file: the tree itself encodes a strictly increasing insertion
//! order, so a [`Cache`] can be dropped at any point and rebuilt later
//! purely by walking the directory and validating its naming
//! invariants.
//!
//! Callers produce a complete file somewhere (typically in a session
//! [workspace](Cache::new_workspace)), then ask the cache to *adopt*
//! it under a logical name.  Adoption moves the file into the next
//! numbered slot; when a byte budget is configured and the new total
//! would exceed it, the lowest-numbered (oldest) files are deleted
//! first until the insertion fits.  [`Cache::touch`] re-queues an
//! entry at the recent end of that order, which is the only notion of
//! recency: nothing depends on file timestamps.
//!
//! One process owns one root at a time.  All mutating operations take
//! `&mut self`; there is no internal locking, and two live instances
//! on the same root are not supported (reopening a root deletes the
//! previous session's workspaces).
//!
//! # Sample usage
//!
//! ```no_run
//! # fn main() -> arbor_cache::Result<()> {
//! use std::fs;
//!
//! let mut cache = arbor_cache::CacheBuilder::new()
//!     .byte_limit(1 << 30)
//!     .open("/var/tmp/artifacts")?;
//!
//! // Declare what the "hist-" prefix means, and get a scratch
//! // directory to stage files in.
//! let workspace = cache.new_workspace(vec![
//!     ("hist-", serde_json::json!("1-D histograms, binned v2")),
//! ])?;
//!
//! fs::write(workspace.join("staged"), b"...")?;
//! cache.adopt("hist-muon-pt", workspace.join("staged"))?;
//!
//! assert!(cache.has("hist-muon-pt"));
//! let path = cache.get("hist-muon-pt")?;
//! # let _ = path;
//! # Ok(())
//! # }
//! ```
//!
//! # Cache directory structure
//!
//! A cache root contains a reserved `config` subdirectory, zero or
//! more shard directories, zero or more cached files, and transient
//! `user-<n>` workspace directories.
//!
//! Shard directories are named by zero-padded numbers in
//! `[0, fan_out)`; the padding width is the number of digits of
//! `fan_out - 1`, so the default fan-out of 1000 yields `000` through
//! `999`.  A directory's children are either all shard directories or
//! all cached files, never both.  Cached files are named
//! `<digits><delimiter><logical-name>`; the digits are the file's
//! allocation number modulo the fan-out, and the full number is
//! recovered by accumulating the path's shard digits in base
//! `fan_out`.  Every cached file sits at the same depth.
//!
//! The tree starts flat.  When the allocation counter outgrows the
//! current depth's capacity, the whole tree is relocated one level
//! down under a zero shard and the depth grows by one, so a cache of
//! any size keeps per-directory fan-out bounded without ever renaming
//! files individually.
//!
//! Config entries are one file per prefix under `config/`, named by
//! the prefix and holding a bare JSON value: the caller-supplied
//! "mnemonic" for what names under that prefix mean.  Re-registering
//! a prefix with a different mnemonic fails until the prefix is
//! [`clear`](Cache::clear)ed, which catches callers whose encoding of
//! a prefix drifted from what the cache already holds.
mod cache;
mod config;
mod error;
mod evict;
mod layout;
mod scan;

pub use cache::Cache;
pub use cache::CacheBuilder;
pub use cache::DEFAULT_DELIMITER;
pub use cache::DEFAULT_FAN_OUT;
pub use error::Error;
pub use error::Result;

/// Every cache root has this reserved subdirectory for prefix
/// mnemonics; its presence is how an existing directory is recognised
/// as a cache root at all.
pub const CONFIG_SUBDIRECTORY: &str = "config";

/// Session workspace directories are named with this prefix followed
/// by a session-local counter.
pub(crate) const WORKSPACE_PREFIX: &str = "user-";

/// Returns whether `name` matches the reserved `user-<integer>`
/// workspace pattern.
pub(crate) fn is_workspace_name(name: &str) -> bool {
    match name.strip_prefix(WORKSPACE_PREFIX) {
        Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_workspace_name;

    /// Only `user-` followed by at least one digit is reserved.
    #[test]
    fn test_workspace_pattern() {
        assert!(is_workspace_name("user-0"));
        assert!(is_workspace_name("user-12345"));
        assert!(!is_workspace_name("user-"));
        assert!(!is_workspace_name("user-x"));
        assert!(!is_workspace_name("user"));
        assert!(!is_workspace_name("0.user-3"));
    }
}
