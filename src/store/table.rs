use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::store::StoreError;
use crate::store::record::{self, COOKIE_LEN, Cookie, HASH_LEN, RecordRef};

/// All records in one arena plus two sorted offset indices.
///
/// The arena mirrors the backing file byte for byte. `by_name` and
/// `by_cookie` each hold every record offset exactly once, ordered by the
/// record's name and cookie bytes respectively.
pub struct UsersTable {
    arena: Vec<u8>,
    by_name: Vec<usize>,
    by_cookie: Vec<usize>,
    file: File,
    path: PathBuf,
}

impl UsersTable {
    /// Loads `path`, creating an empty store if it does not exist.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let mut arena = Vec::new();
        file.read_to_end(&mut arena)?;

        let corrupt = |offset: usize, reason: &'static str| StoreError::Corrupt {
            path: path.to_path_buf(),
            offset,
            reason,
        };

        let mut offsets = Vec::new();
        let mut at = 0;
        while at < arena.len() {
            offsets.push(at);
            at = record::scan(&arena, at).map_err(|reason| corrupt(at, reason))?;
        }

        let mut by_name = offsets.clone();
        by_name.sort_by(|&a, &b| name_of(&arena, a).cmp(name_of(&arena, b)));
        if let Some(w) = by_name
            .windows(2)
            .find(|w| name_of(&arena, w[0]) == name_of(&arena, w[1]))
        {
            return Err(corrupt(w[1], "duplicate name"));
        }

        let mut by_cookie = offsets;
        by_cookie.sort_by(|&a, &b| cookie_of(&arena, a).cmp(cookie_of(&arena, b)));
        if let Some(w) = by_cookie
            .windows(2)
            .find(|w| cookie_of(&arena, w[0]) == cookie_of(&arena, w[1]))
        {
            return Err(corrupt(w[1], "duplicate cookie"));
        }

        if arena.is_empty() {
            info!(path = %path.display(), "empty user store");
        } else {
            info!(path = %path.display(), users = by_name.len(), "loaded user store");
        }

        Ok(Self {
            arena,
            by_name,
            by_cookie,
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub(crate) fn record(&self, at: usize) -> RecordRef<'_> {
        RecordRef::new(&self.arena, at)
    }

    fn search_name(&self, name: &[u8]) -> Result<usize, usize> {
        self.by_name
            .binary_search_by(|&at| name_of(&self.arena, at).cmp(name))
    }

    fn search_cookie(&self, cookie: &[u8]) -> Result<usize, usize> {
        self.by_cookie
            .binary_search_by(|&at| cookie_of(&self.arena, at).cmp(cookie))
    }

    pub fn find_by_name(&self, name: &[u8]) -> Option<usize> {
        self.search_name(name).ok().map(|i| self.by_name[i])
    }

    pub fn find_by_cookie(&self, cookie: &[u8]) -> Option<usize> {
        self.search_cookie(cookie).ok().map(|i| self.by_cookie[i])
    }

    pub fn contains_cookie(&self, cookie: &Cookie) -> bool {
        self.search_cookie(cookie.as_bytes()).is_ok()
    }

    /// Appends a record and returns its offset.
    ///
    /// The record reaches the file before the arena, so a failed write leaves
    /// the table unchanged. The cookie must not be in use.
    pub fn insert(
        &mut self,
        hash: &[u8; HASH_LEN],
        cookie: &Cookie,
        name: &str,
    ) -> Result<usize, StoreError> {
        let name_slot = match self.search_name(name.as_bytes()) {
            Ok(_) => return Err(StoreError::DuplicateName(name.to_string())),
            Err(i) => i,
        };
        let cookie_slot = match self.search_cookie(cookie.as_bytes()) {
            Ok(_) => return Err(StoreError::Corrupt {
                path: self.path.clone(),
                offset: self.arena.len(),
                reason: "cookie collision",
            }),
            Err(i) => i,
        };

        let at = self.arena.len();
        let bytes = record::encode(hash, cookie, name);
        self.file.write_all_at(&bytes, at as u64)?;
        self.file.sync_data()?;

        self.arena.extend_from_slice(&bytes);
        self.by_name.insert(name_slot, at);
        self.by_cookie.insert(cookie_slot, at);
        Ok(at)
    }

    /// Overwrites the password hash of the record at `at`.
    pub fn set_hash(&mut self, at: usize, hash: &[u8; HASH_LEN]) -> Result<(), StoreError> {
        self.file.write_all_at(hash, at as u64)?;
        self.file.sync_data()?;
        self.arena[at..at + HASH_LEN].copy_from_slice(hash);
        Ok(())
    }

    /// Replaces the cookie of the record at `at` and moves it to its new
    /// place in the cookie index.
    pub fn set_cookie(&mut self, at: usize, cookie: &Cookie) -> Result<(), StoreError> {
        let old = match self.search_cookie(cookie_of(&self.arena, at)) {
            Ok(i) => i,
            Err(_) => {
                return Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    offset: at,
                    reason: "record missing from cookie index",
                });
            }
        };

        let field = at + HASH_LEN;
        self.file.write_all_at(cookie.as_bytes(), field as u64)?;
        self.file.sync_data()?;

        self.by_cookie.remove(old);
        self.arena[field..field + COOKIE_LEN].copy_from_slice(cookie.as_bytes());
        let new = match self.search_cookie(cookie.as_bytes()) {
            Ok(i) | Err(i) => i,
        };
        self.by_cookie.insert(new, at);
        Ok(())
    }
}

fn name_of(arena: &[u8], at: usize) -> &[u8] {
    RecordRef::new(arena, at).name()
}

fn cookie_of(arena: &[u8], at: usize) -> &[u8] {
    RecordRef::new(arena, at).cookie()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(s: &[u8]) -> Cookie {
        Cookie::from_bytes(s).unwrap()
    }

    #[test]
    fn indices_stay_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = UsersTable::load(&dir.path().join("users")).unwrap();
        let hash = [b'h'; HASH_LEN];

        table.insert(&hash, &cookie(b"CCCCCCCCCCCCCCCC"), "carol").unwrap();
        table.insert(&hash, &cookie(b"AAAAAAAAAAAAAAAA"), "alice").unwrap();
        table.insert(&hash, &cookie(b"BBBBBBBBBBBBBBBB"), "bob").unwrap();

        let names: Vec<_> = table.by_name.iter().map(|&at| name_of(&table.arena, at)).collect();
        assert_eq!(names, vec![&b"alice"[..], b"bob", b"carol"]);

        let bob = table.find_by_name(b"bob").unwrap();
        table.set_cookie(bob, &cookie(b"ZZZZZZZZZZZZZZZZ")).unwrap();
        let cookies: Vec<_> = table
            .by_cookie
            .iter()
            .map(|&at| cookie_of(&table.arena, at))
            .collect();
        assert_eq!(
            cookies,
            vec![&b"AAAAAAAAAAAAAAAA"[..], b"CCCCCCCCCCCCCCCC", b"ZZZZZZZZZZZZZZZZ"]
        );
        assert_eq!(table.find_by_cookie(b"BBBBBBBBBBBBBBBB"), None);
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users");
        std::fs::write(&path, [b'x'; 40]).unwrap();
        assert!(matches!(
            UsersTable::load(&path),
            Err(StoreError::Corrupt { offset: 0, .. })
        ));
    }
}
