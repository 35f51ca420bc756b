//! Oldest-first eviction.  Because shard digits encode the allocation
//! order, visiting the tree in sorted name order visits files oldest
//! first; deleting in that order until enough bytes are freed is the
//! whole policy.  This module only deletes and reports; the façade
//! applies the reported deletions to its lookup index and byte total,
//! so the two stay consistent even when the walk stops early.
use std::path::Path;
use std::path::PathBuf;

use tracing::trace;

use crate::scan::sorted_entries;
use crate::Result;
use crate::CONFIG_SUBDIRECTORY;

/// One file deleted by an eviction pass.
pub(crate) struct Victim {
    /// Path relative to the cache root.
    pub rel_path: PathBuf,
    pub bytes: u64,
}

/// Deletes cached files under `root` in ascending path order until
/// `needed` bytes have been freed, recording each deletion in
/// `victims` and pruning directories left empty.  Returns the bytes
/// still unfreed; non-zero means the tree ran out of content.
///
/// The reserved `config` subdirectory and session workspaces are never
/// touched.
pub(crate) fn free_up_to(root: &Path, needed: u64, victims: &mut Vec<Victim>) -> Result<u64> {
    let mut needed = needed;

    for entry in sorted_entries(root)? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == CONFIG_SUBDIRECTORY || crate::is_workspace_name(&name) {
            continue;
        }

        needed = free_under(root, Path::new(name.as_ref()), needed, victims)?;
        if needed == 0 {
            break;
        }
    }

    Ok(needed)
}

/// Deletes files under `rel` (a directory or file relative to `root`),
/// oldest first, until `needed` reaches zero.
fn free_under(
    root: &Path,
    rel: &Path,
    mut needed: u64,
    victims: &mut Vec<Victim>,
) -> Result<u64> {
    let abs = root.join(rel);

    if abs.is_dir() {
        for entry in sorted_entries(&abs)? {
            needed = free_under(root, &rel.join(entry.file_name()), needed, victims)?;
            // Short-circuit remaining siblings; a partially emptied
            // directory is fine.
            if needed == 0 {
                return Ok(0);
            }
        }

        if std::fs::read_dir(&abs)?.next().is_none() {
            std::fs::remove_dir(&abs)?;
        }

        Ok(needed)
    } else {
        let bytes = std::fs::metadata(&abs)?.len();
        std::fs::remove_file(&abs)?;
        trace!(path = %rel.display(), bytes, "evicted");

        victims.push(Victim {
            rel_path: rel.to_path_buf(),
            bytes,
        });
        Ok(needed.saturating_sub(bytes))
    }
}
