//! Persistent memo of instruction sizes.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use ovl_isa::{OracleError, SizeOracle};
use tracing::{debug, info};

use crate::{Result, SizeError};

/// File name of the default cache, placed in the user's home directory.
pub const DEFAULT_CACHE_FILE: &str = ".asmsize.json";

/// Default cache location (`$HOME/.asmsize.json`).
#[must_use]
pub fn default_cache_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(DEFAULT_CACHE_FILE))
}

/// Instruction text to encoded size, shared between runs.
///
/// Entries are only ever added; two runs flushing concurrently merge their
/// entries under an exclusive file lock.
#[derive(Debug, Default)]
pub struct SizeCache {
    entries: BTreeMap<String, u32>,
    dirty: bool,
}

fn lock(file: File, arg: FlockArg) -> Result<Flock<File>> {
    Flock::lock(file, arg).map_err(|(_, errno)| SizeError::Lock(errno))
}

fn read_entries(file: &mut File) -> Result<BTreeMap<String, u32>> {
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&text)?)
}

impl SizeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a cache file. A missing file yields an empty cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no size cache yet");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let mut file = lock(file, FlockArg::LockShared)?;
        let entries = read_entries(&mut file)?;
        debug!(path = %path.display(), entries = entries.len(), "loaded size cache");
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    #[must_use]
    pub fn get(&self, insn: &str) -> Option<u32> {
        self.entries.get(insn).copied()
    }

    pub fn put(&mut self, insn: impl Into<String>, size: u32) {
        let insn = insn.into();
        if self.entries.get(&insn) != Some(&size) {
            self.entries.insert(insn, size);
            self.dirty = true;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether entries were added since the last load or flush.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Merge with the on-disk cache and write the union back.
    ///
    /// Does nothing if no entries were added.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be locked, read, or written.
    pub fn flush(&mut self, path: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut file = lock(file, FlockArg::LockExclusive)?;

        for (insn, size) in read_entries(&mut file)? {
            self.entries.entry(insn).or_insert(size);
        }

        let text = serde_json::to_string_pretty(&self.entries)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(text.as_bytes())?;
        file.flush()?;

        self.dirty = false;
        info!(path = %path.display(), entries = self.entries.len(), "saved instruction cache");
        Ok(())
    }
}

/// Size oracle that consults a [`SizeCache`] before its backend.
#[derive(Debug)]
pub struct CachedOracle<O> {
    cache: SizeCache,
    backend: O,
    hits: u64,
    misses: u64,
}

impl<O> CachedOracle<O> {
    #[must_use]
    pub const fn new(cache: SizeCache, backend: O) -> Self {
        Self {
            cache,
            backend,
            hits: 0,
            misses: 0,
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &SizeCache {
        &self.cache
    }

    pub const fn cache_mut(&mut self) -> &mut SizeCache {
        &mut self.cache
    }

    /// Cache hits and misses so far.
    #[must_use]
    pub const fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    #[must_use]
    pub fn into_cache(self) -> SizeCache {
        self.cache
    }
}

impl<O: SizeOracle> SizeOracle for CachedOracle<O> {
    fn size(&mut self, insn: &str, target: Option<&str>) -> std::result::Result<u32, OracleError> {
        if let Some(size) = self.cache.get(insn) {
            self.hits += 1;
            return Ok(size);
        }
        self.misses += 1;
        let size = self.backend.size(insn, target)?;
        self.cache.put(insn, size);
        Ok(size)
    }
}
