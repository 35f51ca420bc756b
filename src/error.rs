//! All the ways a cache operation can fail.  Recovery-time corruption
//! errors are fatal by design: a tree that violates its own naming
//! invariants was tampered with or partially destroyed, and continuing
//! would silently misnumber every later insertion.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The cache root exists, but is something other than a directory.
    #[error("cache root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// An existing cache root lacks its reserved `config` subdirectory.
    #[error("cache root {} does not contain a \"config\" subdirectory", .0.display())]
    MissingConfigDirectory(PathBuf),

    /// A directory in the tree holds both shard subdirectories and
    /// cached files.  Every directory must be entirely one or the other.
    #[error("directory {} mixes shard subdirectories and cached files", .0.display())]
    MixedDirectory(PathBuf),

    /// A subdirectory's name is not a zero-padded shard number of the
    /// expected width and range.
    #[error("{}: {name:?} is not a {width}-digit shard directory name", .dir.display())]
    MalformedShardName {
        dir: PathBuf,
        name: String,
        width: usize,
    },

    /// A cached file's name does not contain the configured delimiter.
    #[error("file name {name:?} in {} is missing the {delimiter:?} delimiter", .dir.display())]
    MissingDelimiter {
        dir: PathBuf,
        name: String,
        delimiter: char,
    },

    /// The digits before a cached file's delimiter do not parse to a
    /// local number in `[0, max_per_dir)`.
    #[error("file name {name:?} in {} does not start with a valid shard number", .dir.display())]
    MalformedLeafName { dir: PathBuf, name: String },

    /// Cached files were found at two different depths.
    #[error("files under {} sit at depth {found}, but earlier files were at depth {expected}", .dir.display())]
    DepthMismatch {
        dir: PathBuf,
        expected: u32,
        found: u32,
    },

    /// Allocation numbers decoded from the tree are not strictly
    /// increasing in sorted path order.
    #[error("allocation numbers are not strictly increasing at {} (decoded {number})", .path.display())]
    NumberOutOfOrder { path: PathBuf, number: u64 },

    /// A decoded allocation number does not fit in 64 bits.  Only a
    /// hand-built tree can get here.
    #[error("allocation number overflow under {}", .0.display())]
    NumberOverflow(PathBuf),

    /// The same logical name was found on two files in the tree.
    #[error("cached name {0:?} appears more than once in the tree")]
    DuplicateName(String),

    /// A config prefix was re-registered with a mnemonic that differs
    /// from the recorded one.
    #[error("the meaning of prefix {0:?} has changed; clear it explicitly before reuse")]
    PrefixRedefined(String),

    /// Lookup of a logical name that is not in the cache.
    #[error("no cached entry named {0:?}")]
    NotFound(String),

    /// Logical names and config prefixes become file name components,
    /// so they must be non-empty, must not start with a dot, and must
    /// not contain path separators.
    #[error("invalid name {0:?}")]
    InvalidName(String),

    /// A config entry's contents failed to parse or serialize as JSON.
    #[error("bad JSON in config entry")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
