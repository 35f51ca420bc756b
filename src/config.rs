//! The config registry records what a caller means by each cached-name
//! prefix: one file per prefix in the reserved `config` subdirectory,
//! holding a JSON "mnemonic" value.  Registering a prefix whose stored
//! mnemonic differs from the supplied one fails, which catches callers
//! whose understanding of a prefix has silently drifted from what the
//! cache already holds.
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;

use crate::Error;
use crate::Result;

#[derive(Clone, Debug)]
pub(crate) struct ConfigRegistry {
    // The reserved `config` subdirectory of the cache root.
    dir: PathBuf,
}

impl ConfigRegistry {
    pub fn new(root: &Path) -> ConfigRegistry {
        ConfigRegistry {
            dir: root.join(crate::CONFIG_SUBDIRECTORY),
        }
    }

    fn entry_path(&self, prefix: &str) -> PathBuf {
        self.dir.join(prefix)
    }

    /// Records `mnemonic` as the meaning of `prefix`, or checks it
    /// against the recorded meaning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PrefixRedefined`] if `prefix` already has a
    /// recorded mnemonic that differs from `mnemonic`.
    pub fn register(&self, prefix: &str, mnemonic: &Value) -> Result<()> {
        let path = self.entry_path(prefix);

        match File::open(&path) {
            Ok(file) => {
                let stored: Value = serde_json::from_reader(file)?;
                if stored == *mnemonic {
                    Ok(())
                } else {
                    Err(Error::PrefixRedefined(prefix.to_string()))
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let file = File::create(&path)?;
                serde_json::to_writer(file, mnemonic)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forgets the recorded meaning of `prefix`, allowing it to be
    /// redefined.  Succeeds if no meaning was recorded.
    pub fn remove(&self, prefix: &str) -> Result<()> {
        match std::fs::remove_file(self.entry_path(prefix)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
