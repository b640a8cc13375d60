//! Shared in-memory cache of static files.
//!
//! Entries are keyed by path and stamped with the file's mtime; an entry is
//! only served while the stamp still matches the file on disk. A gzip variant
//! is built the first time a client asks for one.
//!
//! Lookups share a read lock. Refreshing an entry takes the upgradable read
//! lock (one refresher at a time, readers still admitted), upgrades to write
//! for the mutation and downgrades back to read for the returned view, so no
//! other writer can slip in between the refresh and the read.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::{
    MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{0}: not a regular file")]
    NotRegular(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug)]
struct CacheEntry {
    data: Vec<u8>,
    gzip: Option<Vec<u8>>,
    /// Compression was tried for this version of the file and failed.
    gzip_failed: bool,
    mtime: SystemTime,
}

impl CacheEntry {
    /// Bytes to serve and whether they are gzip, if the entry can answer
    /// without more work.
    fn variant(&self, want_gzip: bool) -> Option<(&[u8], bool)> {
        if !want_gzip {
            return Some((&self.data, false));
        }
        match &self.gzip {
            Some(z) => Some((z, true)),
            None if self.gzip_failed => Some((&self.data, false)),
            None => None,
        }
    }
}

/// A file as handed out by [`FileCache::get`].
pub enum CacheView<'a> {
    /// Cached bytes; holds the cache's read lock until dropped.
    Cached {
        bytes: MappedRwLockReadGuard<'a, [u8]>,
        gzip: bool,
    },
    /// Too large to cache: the open file, to be streamed by the caller.
    Uncached { file: File, len: u64 },
    Empty,
}

impl CacheView<'_> {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            CacheView::Cached { bytes, .. } => Some(bytes),
            _ => None,
        }
    }

    pub fn is_gzip(&self) -> bool {
        matches!(self, CacheView::Cached { gzip: true, .. })
    }

    pub fn len(&self) -> u64 {
        match self {
            CacheView::Cached { bytes, .. } => bytes.len() as u64,
            CacheView::Uncached { len, .. } => *len,
            CacheView::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct FileCache {
    max_file_size: u64,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl FileCache {
    /// Files larger than `max_file_size` bytes are never cached.
    pub fn new(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached paths.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the contents of `path`, gzip-compressed when `want_gzip` and
    /// compression succeeds.
    ///
    /// The returned view borrows the cache under a read lock: drop it before
    /// doing anything that could wait on another request.
    pub fn get(&self, path: &Path, want_gzip: bool) -> Result<CacheView<'_>, CacheError> {
        let mut file = File::open(path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(CacheError::NotRegular(path.to_path_buf()));
        }
        if meta.len() == 0 {
            return Ok(CacheView::Empty);
        }
        let mtime = meta.modified()?;

        if let Some(view) = Self::lookup(self.entries.read(), path, mtime, want_gzip) {
            return Ok(view);
        }

        if meta.len() > self.max_file_size {
            return Ok(CacheView::Uncached {
                file,
                len: meta.len(),
            });
        }

        let guard = self.entries.upgradable_read();
        let ready = guard
            .get(path)
            .filter(|e| e.mtime == mtime)
            .and_then(|e| e.variant(want_gzip))
            .is_some();

        let guard = if ready {
            // refreshed by another worker while we waited
            RwLockUpgradableReadGuard::downgrade(guard)
        } else {
            let fresh = guard.get(path).is_some_and(|e| e.mtime == mtime);
            let data = if fresh {
                None
            } else {
                let mut data = Vec::with_capacity(meta.len() as usize);
                file.read_to_end(&mut data)?;
                Some(data)
            };

            let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
            let entry = guard
                .entry(path.to_path_buf())
                .or_insert_with(|| CacheEntry {
                    data: Vec::new(),
                    gzip: None,
                    gzip_failed: false,
                    mtime,
                });

            if let Some(data) = data {
                debug!(path = %path.display(), size = data.len(), "caching file");
                entry.data = data;
                entry.gzip = None;
                entry.gzip_failed = false;
                entry.mtime = mtime;
            }
            if want_gzip && entry.gzip.is_none() && !entry.gzip_failed {
                match gzip(&entry.data) {
                    Ok(z) => entry.gzip = Some(z),
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "compression failed, serving raw"
                        );
                        entry.gzip_failed = true;
                    }
                }
            }
            RwLockWriteGuard::downgrade(guard)
        };

        Self::lookup(guard, path, mtime, want_gzip)
            .ok_or_else(|| io::Error::other("cache entry missing after refresh").into())
    }

    fn lookup<'a>(
        guard: RwLockReadGuard<'a, HashMap<PathBuf, CacheEntry>>,
        path: &Path,
        mtime: SystemTime,
        want_gzip: bool,
    ) -> Option<CacheView<'a>> {
        let mut served_gzip = false;
        let bytes = RwLockReadGuard::try_map(guard, |entries| {
            let entry = entries.get(path).filter(|e| e.mtime == mtime)?;
            let (bytes, gzip) = entry.variant(want_gzip)?;
            served_gzip = gzip;
            Some(bytes)
        })
        .ok()?;

        Some(CacheView::Cached {
            bytes,
            gzip: served_gzip,
        })
    }
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}
