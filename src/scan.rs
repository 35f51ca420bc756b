//! Rebuilds a cache's in-memory state by walking its directory tree.
//! There is no persisted index: the tree *is* the durable state, and
//! this module is the only code that trusts it — after checking every
//! naming invariant.  At each directory, the non-reserved children must
//! be either all shard subdirectories or all cached files; shard names
//! must be zero-padded digits of the configured width; decoded
//! allocation numbers must strictly increase in sorted path order; and
//! every file must sit at the same depth.  Any violation aborts
//! recovery with a typed error instead of guessing at counters that
//! every later insertion would depend on.
use std::collections::BTreeMap;
use std::fs::DirEntry;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::layout::Layout;
use crate::Error;
use crate::Result;
use crate::CONFIG_SUBDIRECTORY;

/// The state reconstructed from one cache root.
pub(crate) struct Scan {
    /// Logical name to path relative to the root.
    pub lookup: BTreeMap<String, PathBuf>,
    /// Total size of the files in `lookup`.
    pub num_bytes: u64,
    /// Shard levels between the root and every file.
    pub depth: u32,
    /// One past the highest allocation number observed.
    pub number: u64,
}

/// Returns `dir`'s entries sorted by file name.  Sorted order is also
/// insertion order for shard digits, which is what makes the
/// strictly-increasing check (and oldest-first eviction) meaningful.
pub(crate) fn sorted_entries(dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;

    entries.sort_by_key(|entry| entry.file_name());
    Ok(entries)
}

/// Walks `root` and rebuilds the cache's lookup index and counters,
/// after deleting any stale `user-<n>` workspace directory left behind
/// by a previous process.
pub(crate) fn scan(root: &Path, layout: &Layout) -> Result<Scan> {
    for entry in sorted_entries(root)? {
        if crate::is_workspace_name(&entry.file_name().to_string_lossy()) {
            debug!(workspace = %entry.path().display(), "deleting stale workspace");
            std::fs::remove_dir_all(entry.path())?;
        }
    }

    let mut walker = Walker {
        root,
        layout,
        lookup: BTreeMap::new(),
        num_bytes: 0,
        depth: None,
        last_number: None,
    };
    walker.walk(PathBuf::new(), 0, 0)?;

    let scan = Scan {
        lookup: walker.lookup,
        num_bytes: walker.num_bytes,
        depth: walker.depth.unwrap_or(0),
        number: walker.last_number.map(|n| n + 1).unwrap_or(0),
    };

    debug!(
        entries = scan.lookup.len(),
        num_bytes = scan.num_bytes,
        depth = scan.depth,
        number = scan.number,
        "recovered cache state"
    );
    Ok(scan)
}

struct Walker<'a> {
    root: &'a Path,
    layout: &'a Layout,
    lookup: BTreeMap<String, PathBuf>,
    num_bytes: u64,
    // Depth of the first file-bearing directory found; every later one
    // must match.
    depth: Option<u32>,
    last_number: Option<u64>,
}

impl Walker<'_> {
    /// Visits the directory at `rel`, whose shard digits accumulate to
    /// the weighted number `base`.
    fn walk(&mut self, rel: PathBuf, depth: u32, base: u64) -> Result<()> {
        let at_root = rel.as_os_str().is_empty();
        let abs = self.root.join(&rel);

        let mut directories = Vec::new();
        let mut files = Vec::new();
        for entry in sorted_entries(&abs)? {
            // The config subdirectory is reserved; it only exists at
            // the root, and workspaces were already deleted.
            if at_root && entry.file_name() == CONFIG_SUBDIRECTORY {
                continue;
            }

            if entry.file_type()?.is_dir() {
                directories.push(entry);
            } else {
                files.push(entry);
            }
        }

        if !directories.is_empty() && !files.is_empty() {
            return Err(Error::MixedDirectory(abs));
        }

        for entry in directories {
            let name = entry.file_name().to_string_lossy().into_owned();
            let digit = match self.layout.parse_digit(&name) {
                Some(digit) => digit,
                None => {
                    return Err(Error::MalformedShardName {
                        dir: abs,
                        name,
                        width: self.layout.width(),
                    })
                }
            };

            let child_base = base
                .checked_add(digit)
                .and_then(|n| n.checked_mul(self.layout.max_per_dir))
                .ok_or_else(|| Error::NumberOverflow(abs.clone()))?;
            self.walk(rel.join(&name), depth + 1, child_base)?;
        }

        for entry in files {
            self.visit_file(&rel, depth, base, &entry)?;
        }

        Ok(())
    }

    fn visit_file(&mut self, rel: &Path, depth: u32, base: u64, entry: &DirEntry) -> Result<()> {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let dir = self.root.join(rel);

        let (digits, name) = match self.layout.split_leaf(&file_name) {
            Some(split) => split,
            None => {
                return Err(Error::MissingDelimiter {
                    dir,
                    name: file_name.clone(),
                    delimiter: self.layout.delimiter,
                })
            }
        };
        let local = match self.layout.parse_local(digits) {
            Some(local) => local,
            None => {
                return Err(Error::MalformedLeafName {
                    dir,
                    name: file_name.clone(),
                })
            }
        };
        let number = base
            .checked_add(local)
            .ok_or_else(|| Error::NumberOverflow(dir.clone()))?;

        match self.depth {
            None => self.depth = Some(depth),
            Some(expected) if expected != depth => {
                return Err(Error::DepthMismatch {
                    dir,
                    expected,
                    found: depth,
                })
            }
            Some(_) => {}
        }

        if let Some(last) = self.last_number {
            if number <= last {
                return Err(Error::NumberOutOfOrder {
                    path: dir.join(&file_name),
                    number,
                });
            }
        }
        self.last_number = Some(number);

        let rel_path = rel.join(&file_name);
        if self.lookup.insert(name.to_string(), rel_path).is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
        self.num_bytes += entry.metadata()?.len();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::scan;
    use crate::layout::Layout;
    use crate::Error;
    use std::path::PathBuf;
    use test_dir::{DirBuilder, FileType, TestDir};

    fn run(temp: &TestDir) -> crate::Result<super::Scan> {
        scan(&temp.path("."), &Layout::new(3, '.'))
    }

    /// A root holding nothing but `config` recovers to the initial
    /// counters.
    #[test]
    fn test_empty() {
        let temp = TestDir::temp().create("config", FileType::Dir);

        let scan = run(&temp).expect("empty root must scan cleanly");
        assert!(scan.lookup.is_empty());
        assert_eq!(scan.num_bytes, 0);
        assert_eq!(scan.depth, 0);
        assert_eq!(scan.number, 0);
    }

    /// A depth-1 tree rebuilds the index, byte total, and counters.
    #[test]
    fn test_small_tree() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("0", FileType::Dir)
            .create("0/0.a", FileType::ZeroFile(3))
            .create("0/1.b", FileType::ZeroFile(5))
            .create("1", FileType::Dir)
            .create("1/0.c", FileType::ZeroFile(7));

        let scan = run(&temp).expect("well-formed tree must scan cleanly");
        assert_eq!(scan.lookup.len(), 3);
        assert_eq!(scan.lookup["a"], PathBuf::from("0/0.a"));
        assert_eq!(scan.lookup["c"], PathBuf::from("1/0.c"));
        assert_eq!(scan.num_bytes, 15);
        assert_eq!(scan.depth, 1);
        // Highest decoded number is 1 * 3 + 0 = 3.
        assert_eq!(scan.number, 4);
    }

    /// Stale `user-<n>` workspaces are deleted before the walk, so
    /// they neither survive nor trip the shard-name check.
    #[test]
    fn test_stale_workspaces() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("user-0", FileType::Dir)
            .create("user-0/staged", FileType::ZeroFile(10))
            .create("user-17", FileType::Dir)
            .create("0.a", FileType::ZeroFile(2));

        let scan = run(&temp).expect("workspaces must not fail the scan");
        assert_eq!(scan.lookup.len(), 1);
        assert!(std::fs::metadata(temp.path("user-0")).is_err());
        assert!(std::fs::metadata(temp.path("user-17")).is_err());
    }

    /// A directory with both a shard subdirectory and a file is fatal.
    #[test]
    fn test_mixed_directory() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("0", FileType::Dir)
            .create("0/0", FileType::Dir)
            .create("0/0/0.a", FileType::ZeroFile(1))
            .create("0/1.b", FileType::ZeroFile(1));

        assert!(matches!(run(&temp), Err(Error::MixedDirectory(_))));
    }

    /// A subdirectory whose name is not a shard digit is fatal.
    #[test]
    fn test_malformed_shard_name() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("stash", FileType::Dir)
            .create("stash/0.a", FileType::ZeroFile(1));

        assert!(matches!(
            run(&temp),
            Err(Error::MalformedShardName { .. })
        ));
    }

    /// A file name without the delimiter is fatal.
    #[test]
    fn test_missing_delimiter() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("noise", FileType::ZeroFile(1));

        assert!(matches!(run(&temp), Err(Error::MissingDelimiter { .. })));
    }

    /// Duplicate decoded numbers (here, two files claiming local 1)
    /// are fatal.
    #[test]
    fn test_numbers_out_of_order() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("1.a", FileType::ZeroFile(1))
            .create("1.b", FileType::ZeroFile(1));

        assert!(matches!(run(&temp), Err(Error::NumberOutOfOrder { .. })));
    }

    /// Files at two different depths are fatal.
    #[test]
    fn test_depth_mismatch() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("0", FileType::Dir)
            .create("0/0", FileType::Dir)
            .create("0/0/0.a", FileType::ZeroFile(1))
            .create("1", FileType::Dir)
            .create("1/0.b", FileType::ZeroFile(1));

        assert!(matches!(run(&temp), Err(Error::DepthMismatch { .. })));
    }

    /// The same logical name on two files is fatal: adoption never
    /// produces it, so someone else wrote to the tree.
    #[test]
    fn test_duplicate_name() {
        let temp = TestDir::temp()
            .create("config", FileType::Dir)
            .create("0", FileType::Dir)
            .create("0/2.a", FileType::ZeroFile(1))
            .create("1", FileType::Dir)
            .create("1/0.a", FileType::ZeroFile(1));

        assert!(matches!(run(&temp), Err(Error::DuplicateName(_))));
    }
}
