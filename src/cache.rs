//! The `Cache` façade: construction through [`CacheBuilder`], adoption
//! of staged files under logical names, lookups, positional `touch`,
//! prefix-wide `clear`, and session workspaces.  The façade owns every
//! mutable counter (`lookup`, `num_bytes`, `depth`, `number`, `users`);
//! all mutating operations take `&mut self`, so one instance per root
//! is the whole concurrency story.
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::config::ConfigRegistry;
use crate::evict;
use crate::layout::Layout;
use crate::scan;
use crate::Error;
use crate::Result;
use crate::CONFIG_SUBDIRECTORY;
use crate::WORKSPACE_PREFIX;

/// Default children per directory level.
pub const DEFAULT_FAN_OUT: u64 = 1000;

/// Default separator between a file's shard number and its logical
/// name.
pub const DEFAULT_DELIMITER: char = '.';

/// Construct a [`Cache`] with this builder: set the byte budget, the
/// per-directory fan-out, and the delimiter, then point it at a root
/// directory with [`CacheBuilder::create`] (wipe and start fresh) or
/// [`CacheBuilder::open`] (recover whatever the tree already holds).
#[derive(Clone, Debug)]
pub struct CacheBuilder {
    limit_bytes: Option<u64>,
    max_per_dir: u64,
    delimiter: char,
}

impl Default for CacheBuilder {
    fn default() -> CacheBuilder {
        CacheBuilder {
            limit_bytes: None,
            max_per_dir: DEFAULT_FAN_OUT,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl CacheBuilder {
    pub fn new() -> CacheBuilder {
        Default::default()
    }

    /// Caps the total size of cached files.  Exceeding the cap on
    /// adoption triggers oldest-first eviction.  Without a cap,
    /// nothing is ever evicted.
    pub fn byte_limit(mut self, limit_bytes: u64) -> CacheBuilder {
        self.limit_bytes = Some(limit_bytes);
        self
    }

    /// Sets the maximum number of children per directory level.
    ///
    /// The value is fixed for the lifetime of the on-disk tree: a tree
    /// must always be reopened with the fan-out it was created with.
    pub fn fan_out(mut self, max_per_dir: u64) -> CacheBuilder {
        self.max_per_dir = max_per_dir;
        self
    }

    /// Sets the separator between a file's shard number and its
    /// logical name.  Fixed for the lifetime of the tree, like the
    /// fan-out.
    pub fn delimiter(mut self, delimiter: char) -> CacheBuilder {
        self.delimiter = delimiter;
        self
    }

    /// Wipes anything at `root` and creates an empty cache there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotADirectory`] if `root` exists and is not a
    /// directory.
    ///
    /// # Panics
    ///
    /// Panics if the fan-out is less than 2, or if the delimiter is a
    /// decimal digit or a path separator.
    pub fn create(self, root: impl AsRef<Path>) -> Result<Cache> {
        let root = root.as_ref().to_path_buf();
        let layout = Layout::new(self.max_per_dir, self.delimiter);

        match fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&root)?,
            Ok(_) => return Err(Error::NotADirectory(root)),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        fs::create_dir_all(&root)?;
        fs::create_dir(root.join(CONFIG_SUBDIRECTORY))?;
        Ok(Cache::empty(root, self.limit_bytes, layout))
    }

    /// Opens the cache at `root`, recovering the index and counters
    /// from the directory tree, or creates an empty cache if `root`
    /// does not exist.  Stale session workspaces are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotADirectory`] if `root` is not a directory,
    /// [`Error::MissingConfigDirectory`] if an existing root lacks its
    /// reserved subdirectory, and a corruption error if the tree
    /// violates any naming invariant.
    pub fn open(self, root: impl AsRef<Path>) -> Result<Cache> {
        let root = root.as_ref().to_path_buf();
        let layout = Layout::new(self.max_per_dir, self.delimiter);

        match fs::metadata(&root) {
            Ok(meta) if !meta.is_dir() => return Err(Error::NotADirectory(root)),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&root)?;
                fs::create_dir(root.join(CONFIG_SUBDIRECTORY))?;
                return Ok(Cache::empty(root, self.limit_bytes, layout));
            }
            Err(e) => return Err(e.into()),
        }

        if !root.join(CONFIG_SUBDIRECTORY).is_dir() {
            return Err(Error::MissingConfigDirectory(root));
        }

        let scan = scan::scan(&root, &layout)?;
        let config = ConfigRegistry::new(&root);
        Ok(Cache {
            root,
            limit_bytes: self.limit_bytes,
            layout,
            config,
            lookup: scan.lookup,
            num_bytes: scan.num_bytes,
            depth: scan.depth,
            number: scan.number,
            users: 0,
        })
    }
}

/// A cache of whole files under one root directory.  Files are adopted
/// under logical names, found again by name, and evicted oldest first
/// when a byte budget is configured.  The directory tree itself is the
/// only durable state; see the crate documentation for the on-disk
/// format.
#[derive(Debug)]
pub struct Cache {
    root: PathBuf,
    limit_bytes: Option<u64>,
    layout: Layout,
    config: ConfigRegistry,

    // Logical name to path relative to `root`.
    lookup: BTreeMap<String, PathBuf>,
    // Sum of the sizes of the files in `lookup`.
    num_bytes: u64,
    // Shard levels between `root` and every cached file.
    depth: u32,
    // Next allocation number.
    number: u64,
    // Workspaces handed out this session.
    users: u64,
}

/// Logical names and config prefixes become file name components, so
/// they must not escape the tree or collide with reserved names.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidName(name.to_string()));
    }

    Ok(())
}

impl Cache {
    fn empty(root: PathBuf, limit_bytes: Option<u64>, layout: Layout) -> Cache {
        let config = ConfigRegistry::new(&root);

        Cache {
            root,
            limit_bytes,
            layout,
            config,
            lookup: BTreeMap::new(),
            num_bytes: 0,
            depth: 0,
            number: 0,
            users: 0,
        }
    }

    /// Returns the cache's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the total size in bytes of the cached files.
    pub fn byte_count(&self) -> u64 {
        self.num_bytes
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Returns whether an entry named `name` is cached.
    pub fn has(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    /// Returns the path of the cached file for `name`, or `None` if
    /// there is no such entry.
    pub fn try_get(&self, name: &str) -> Option<PathBuf> {
        self.lookup.get(name).map(|rel| self.root.join(rel))
    }

    /// Returns the path of the cached file for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no such entry.
    pub fn get(&self, name: &str) -> Result<PathBuf> {
        self.try_get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Hard-links the cached file for `name` at `destination`: a
    /// second, independent reference to the same bytes, with no copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is no such entry, and
    /// propagates the I/O error if `destination` already exists.
    pub fn link_to(&self, name: &str, destination: impl AsRef<Path>) -> Result<()> {
        fs::hard_link(self.get(name)?, destination)?;
        Ok(())
    }

    /// Registers each `(prefix, mnemonic)` association, then allocates
    /// and returns a fresh scratch directory for this session.  Files
    /// staged there can later be [`adopt`](Cache::adopt)ed; whatever
    /// is left over is deleted the next time the root is opened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PrefixRedefined`] if a prefix already has a
    /// recorded mnemonic that differs from the supplied one; the
    /// caller must [`clear`](Cache::clear) the prefix first.
    pub fn new_workspace<I, S>(&mut self, associations: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        for (prefix, mnemonic) in associations {
            let prefix = prefix.as_ref();

            validate_name(prefix)?;
            self.config.register(prefix, &mnemonic)?;
        }

        let workspace = self
            .root
            .join(format!("{}{}", WORKSPACE_PREFIX, self.users));
        fs::create_dir(&workspace)?;
        self.users += 1;
        Ok(workspace)
    }

    /// Moves the complete file at `source` into the cache as `name`.
    /// If `name` is already cached, the old file is deleted first.  If
    /// the new total would exceed the byte budget, the oldest entries
    /// are evicted to make room before the move.
    ///
    /// `source` is consumed on success.
    pub fn adopt(&mut self, name: &str, source: impl AsRef<Path>) -> Result<()> {
        validate_name(name)?;

        let source = source.as_ref();
        let new_bytes = fs::metadata(source)?.len();

        // Delete a replaced entry up front so its bytes do not count
        // against the room we are about to make.
        self.remove_entry(name)?;

        if let Some(limit) = self.limit_bytes {
            let needed = self.num_bytes.saturating_add(new_bytes).saturating_sub(limit);
            if needed > 0 {
                self.make_room(needed)?;
            }
        }

        let rel = self.allocate(name)?;
        fs::rename(source, self.root.join(&rel))?;
        self.lookup.insert(name.to_string(), rel);
        self.num_bytes += new_bytes;
        Ok(())
    }

    /// Re-allocates each named entry a fresh (highest) position in the
    /// insertion order and moves its file there, so it is evicted as
    /// late as any entry adopted up to now.  Contents and sizes are
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] on the first name that is not
    /// cached; earlier names in the batch stay touched.
    pub fn touch<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vacated = Vec::new();

        for name in names {
            let name = name.as_ref();
            if !self.lookup.contains_key(name) {
                return Err(Error::NotFound(name.to_string()));
            }

            // Allocate before reading the old path: growing the tree
            // rewrites every lookup entry, this one included.
            let new_rel = self.allocate(name)?;
            let old_rel = self
                .lookup
                .insert(name.to_string(), new_rel.clone())
                .ok_or_else(|| Error::NotFound(name.to_string()))?;

            fs::rename(self.root.join(&old_rel), self.root.join(&new_rel))?;
            vacated.push(old_rel);
        }

        for old_rel in vacated {
            self.prune_above(&old_rel)?;
        }

        Ok(())
    }

    /// Deletes every cached entry whose logical name starts with
    /// `prefix`, and forgets the recorded mnemonic for exactly
    /// `prefix`, so the prefix can be redefined.
    pub fn clear(&mut self, prefix: &str) -> Result<()> {
        let doomed: Vec<String> = self
            .lookup
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();

        for name in doomed {
            self.remove_entry(&name)?;
        }

        self.config.remove(prefix)
    }

    /// Deletes the file and index entry for `name`, if present, and
    /// prunes directories the deletion left empty.
    fn remove_entry(&mut self, name: &str) -> Result<()> {
        if let Some(rel) = self.lookup.remove(name) {
            let abs = self.root.join(&rel);
            let bytes = fs::metadata(&abs)?.len();

            fs::remove_file(&abs)?;
            self.num_bytes = self.num_bytes.saturating_sub(bytes);
            self.prune_above(&rel)?;
        }

        Ok(())
    }

    /// Evicts oldest entries until `needed` bytes are freed, applying
    /// each deletion to `lookup` and `num_bytes`.  A shortfall leaves
    /// the cache over budget, deliberately: dropping the insert would
    /// lose newer data to protect older data.
    fn make_room(&mut self, needed: u64) -> Result<()> {
        let mut victims = Vec::new();
        let outcome = evict::free_up_to(&self.root, needed, &mut victims);

        // Apply what was actually deleted even if the walk failed
        // halfway; the counters must track the tree, not the plan.
        for victim in &victims {
            self.num_bytes = self.num_bytes.saturating_sub(victim.bytes);

            let name = victim
                .rel_path
                .file_name()
                .and_then(|file_name| file_name.to_str())
                .and_then(|file_name| self.layout.split_leaf(file_name))
                .map(|(_, name)| name);
            if let Some(name) = name {
                if self.lookup.get(name).map(PathBuf::as_path) == Some(victim.rel_path.as_path()) {
                    self.lookup.remove(name);
                }
            }
        }

        let shortfall = outcome?;
        if shortfall > 0 {
            warn!(
                shortfall,
                limit_bytes = self.limit_bytes.unwrap_or(0),
                "eviction ran out of content; cache remains over budget"
            );
        }

        Ok(())
    }

    /// Consumes the next allocation number and returns the relative
    /// path it maps to, creating missing shard directories and growing
    /// the tree's depth first when the current depth is at capacity.
    fn allocate(&mut self, name: &str) -> Result<PathBuf> {
        let number = self.number;
        self.number += 1;

        while let Some(capacity) = self.layout.capacity(self.depth) {
            if number < capacity {
                break;
            }
            self.lift()?;
        }

        let (mut path, local) = self.layout.shard_path(number, self.depth);
        fs::create_dir_all(self.root.join(&path))?;

        path.push(self.layout.leaf_name(local, name));
        Ok(path)
    }

    /// Grows the tree one level: every shard directory and cached file
    /// at the root moves under a new zero shard, and every lookup
    /// entry is rewritten with the new prefix.  The move is staged in
    /// a fresh temporary directory so a half-written zero shard is
    /// never visible under its final name.
    fn lift(&mut self) -> Result<()> {
        self.depth += 1;

        let staging = tempfile::Builder::new()
            .prefix(".lift")
            .tempdir_in(&self.root)?
            .keep();

        for entry in scan::sorted_entries(&self.root)? {
            let path = entry.path();
            if path == staging {
                continue;
            }

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str == CONFIG_SUBDIRECTORY || crate::is_workspace_name(&name_str) {
                continue;
            }

            fs::rename(&path, staging.join(&name))?;
        }

        let zero = self.layout.format_digit(0);
        fs::rename(&staging, self.root.join(&zero))?;

        let prefix = Path::new(&zero);
        for rel in self.lookup.values_mut() {
            let old = std::mem::take(rel);
            *rel = prefix.join(old);
        }

        debug!(depth = self.depth, "grew the cache tree one level");
        Ok(())
    }

    /// Removes directories along `rel`'s ancestry that are now empty,
    /// bottom-up, stopping at the root.
    fn prune_above(&self, rel: &Path) -> Result<()> {
        let mut current = rel.parent();

        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }

            let abs = self.root.join(dir);
            if abs.is_dir() && fs::read_dir(&abs)?.next().is_none() {
                fs::remove_dir(&abs)?;
            }

            current = dir.parent();
        }

        Ok(())
    }
}
