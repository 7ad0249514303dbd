//! Single-file YAML storage with file locking
//!
//! Writers hold an exclusive `fs2` lock on a sibling `.lock` file for the
//! whole reload-apply-save cycle, so concurrent processes serialise their
//! updates instead of overwriting each other.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::models::{TestCase, TraceabilityEntry};

/// Current document format version
const STORE_VERSION: u32 = 1;

/// Everything the YAML backend persists
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceStore {
    pub version: u32,
    #[serde(default)]
    pub test_cases: BTreeMap<String, TestCase>,
    #[serde(default)]
    pub traceability: BTreeMap<String, TraceabilityEntry>,
}

impl Default for TraceStore {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            test_cases: BTreeMap::new(),
            traceability: BTreeMap::new(),
        }
    }
}

/// Handles saving and loading the trace store from disk with file locking
pub struct Storage {
    file_path: PathBuf,
    lock_file_path: PathBuf,
    lock_timeout: Duration,
}

impl Storage {
    /// Creates a new Storage instance
    pub fn new<P: AsRef<Path>>(file_path: P, lock_timeout: Duration) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let mut lock_name = file_path.as_os_str().to_owned();
        lock_name.push(".lock");
        Self {
            file_path,
            lock_file_path: PathBuf::from(lock_name),
            lock_timeout,
        }
    }

    /// Returns the path to the storage file
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn open_lock_file(&self) -> Result<File> {
        if let Some(parent) = self.lock_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file_path)
            .with_context(|| format!("Failed to open lock file: {:?}", self.lock_file_path))
    }

    /// Polls `try_lock` until it succeeds or the timeout elapses
    fn wait_for_lock<F>(&self, lock_file: &File, try_lock: F) -> Result<()>
    where
        F: Fn(&File) -> std::io::Result<()>,
    {
        let start = Instant::now();

        loop {
            match try_lock(lock_file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() > self.lock_timeout {
                        anyhow::bail!(
                            "Timeout waiting for file lock - another process may be writing: {:?}",
                            self.file_path
                        );
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to acquire lock on {:?}", self.lock_file_path)
                    })
                }
            }
        }
    }

    /// Acquire an exclusive lock for writing.
    /// The returned handle must be held for the duration of the operation.
    fn acquire_write_lock(&self) -> Result<File> {
        let mut lock_file = self.open_lock_file()?;
        self.wait_for_lock(&lock_file, |f| FileExt::try_lock_exclusive(f))?;

        let _ = lock_file.set_len(0);
        let _ = writeln!(
            lock_file,
            "Locked by PID {} at {}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        Ok(lock_file)
    }

    /// Acquire a shared lock for reading
    fn acquire_read_lock(&self) -> Result<File> {
        let lock_file = self.open_lock_file()?;
        self.wait_for_lock(&lock_file, |f| FileExt::try_lock_shared(f))?;
        Ok(lock_file)
    }

    /// Reads the file without locking; a missing file is an empty store
    fn read_unlocked(&self) -> Result<TraceStore> {
        if !self.file_path.exists() {
            return Ok(TraceStore::default());
        }

        let file = File::open(&self.file_path)
            .with_context(|| format!("Failed to open file: {:?}", self.file_path))?;
        if file.metadata()?.len() == 0 {
            return Ok(TraceStore::default());
        }

        let store: TraceStore = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse YAML from {:?}", self.file_path))?;

        if store.version > STORE_VERSION {
            anyhow::bail!(
                "Store version {} in {:?} is newer than supported version {}",
                store.version,
                self.file_path,
                STORE_VERSION
            );
        }
        Ok(store)
    }

    /// Writes via a temporary sibling and rename so readers never see a
    /// half-written document
    fn write_unlocked(&self, store: &TraceStore) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(store)?;
        let mut tmp_name = self.file_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, yaml)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        fs::rename(&tmp_path, &self.file_path)
            .with_context(|| format!("Failed to replace {:?}", self.file_path))?;
        Ok(())
    }

    /// Loads the store under a shared lock
    pub fn load(&self) -> Result<TraceStore> {
        let _lock = self.acquire_read_lock()?;
        self.read_unlocked()
    }

    /// Saves the store under an exclusive lock
    pub fn save(&self, store: &TraceStore) -> Result<()> {
        let _lock = self.acquire_write_lock()?;
        self.write_unlocked(store)
    }

    /// Perform an atomic update operation with proper locking.
    /// Reloads the file, applies `update_fn`, and saves only if it succeeds.
    pub fn update_atomically<F, T>(&self, update_fn: F) -> Result<T>
    where
        F: FnOnce(&mut TraceStore) -> Result<T>,
    {
        let _lock = self.acquire_write_lock()?;

        let mut store = self.read_unlocked()?;
        let result = update_fn(&mut store)?;
        self.write_unlocked(&store)?;

        Ok(result)
    }
}
