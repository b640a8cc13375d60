//! Flat-file user store.
//!
//! Records live in one append-only file, loaded whole at startup. See
//! [`record`] for the layout and [`table::UsersTable`] for the indices.
//!
//! [`UserStore`] puts the table behind a reader/writer lock: lookups share
//! it, while creating a user or resetting a field holds the write side for
//! the whole file write plus index update. Password hashing happens before
//! the lock is taken.

pub mod record;
pub mod table;

use std::io;
use std::path::{Path, PathBuf};

use bcrypt::Version;
use parking_lot::RwLock;
use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::record::{Cookie, HASH_LEN, NAME_MAX_LEN, RecordHandle};
use crate::store::table::UsersTable;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user store I/O: {0}")]
    Io(#[from] io::Error),
    #[error("{path:?}: corrupt user store at byte {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: usize,
        reason: &'static str,
    },
    #[error("user \"{0}\" already exists")]
    DuplicateName(String),
    #[error("user name longer than {max} bytes", max = NAME_MAX_LEN)]
    NameTooLong,
    #[error("invalid user name \"{0}\"")]
    InvalidName(String),
    #[error("no user \"{0}\"")]
    NotFound(String),
    #[error("password hashing: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

/// A user as seen at lookup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub handle: RecordHandle,
    pub name: String,
    pub cookie: Cookie,
}

pub struct UserStore {
    table: RwLock<UsersTable>,
    cost: u32,
}

impl UserStore {
    /// Opens (or creates) the store at `path`. Passwords are hashed with
    /// bcrypt at `cost`.
    pub fn open(path: impl AsRef<Path>, cost: u32) -> Result<Self, StoreError> {
        let table = UsersTable::load(path.as_ref())?;
        Ok(Self {
            table: RwLock::new(table),
            cost,
        })
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn find_by_name(&self, name: &str) -> Option<User> {
        let table = self.table.read();
        let at = table.find_by_name(name.as_bytes())?;
        user_at(&table, at)
    }

    pub fn find_by_cookie(&self, cookie: &str) -> Option<User> {
        let cookie = Cookie::from_bytes(cookie.as_bytes())?;
        let table = self.table.read();
        let at = table.find_by_cookie(cookie.as_bytes())?;
        user_at(&table, at)
    }

    /// Looks up `name` and checks `password` against its stored hash.
    pub fn login_by_password(&self, name: &str, password: &str) -> Option<User> {
        let (user, hash) = {
            let table = self.table.read();
            let at = table.find_by_name(name.as_bytes())?;
            let hash = String::from_utf8_lossy(table.record(at).hash()).into_owned();
            (user_at(&table, at)?, hash)
        };

        match bcrypt::verify(password, &hash) {
            Ok(true) => Some(user),
            Ok(false) => None,
            Err(e) => {
                warn!(user = %user.name, error = %e, "unreadable password hash");
                None
            }
        }
    }

    /// The cookie is a bearer token: finding it is the whole check.
    pub fn login_by_cookie(&self, cookie: &str) -> Option<User> {
        self.find_by_cookie(cookie)
    }

    pub fn create_user(&self, name: &str, password: &str) -> Result<User, StoreError> {
        validate_name(name)?;
        let hash = self.hash_password(password)?;

        let mut table = self.table.write();
        if table.find_by_name(name.as_bytes()).is_some() {
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        let cookie = fresh_cookie(&table);
        let at = table.insert(&hash, &cookie, name)?;
        info!(user = name, "created user");

        Ok(User {
            handle: RecordHandle(at),
            name: name.to_string(),
            cookie,
        })
    }

    pub fn reset_password(&self, name: &str, password: &str) -> Result<(), StoreError> {
        let hash = self.hash_password(password)?;

        let mut table = self.table.write();
        let at = table
            .find_by_name(name.as_bytes())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        table.set_hash(at, &hash)?;
        info!(user = name, "password reset");
        Ok(())
    }

    /// Issues a new cookie for `name`, invalidating the old one.
    pub fn reset_cookie(&self, name: &str) -> Result<Cookie, StoreError> {
        let mut table = self.table.write();
        let at = table
            .find_by_name(name.as_bytes())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let cookie = fresh_cookie(&table);
        table.set_cookie(at, &cookie)?;
        info!(user = name, "cookie reset");
        Ok(cookie)
    }

    fn hash_password(&self, password: &str) -> Result<[u8; HASH_LEN], StoreError> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill(&mut salt);
        let hash =
            bcrypt::hash_with_salt(password, self.cost, salt)?.format_for_version(Version::TwoB);

        hash.as_bytes().try_into().map_err(|_| {
            StoreError::Io(io::Error::other(format!(
                "bcrypt produced a {}-byte hash",
                hash.len()
            )))
        })
    }
}

pub fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.len() > NAME_MAX_LEN {
        return Err(StoreError::NameTooLong);
    }
    if !record::is_valid_name(name.as_bytes()) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Random alphanumeric password, as handed out by the `useradd` tool.
pub fn random_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn fresh_cookie(table: &UsersTable) -> Cookie {
    let mut rng = rand::thread_rng();
    loop {
        let cookie = Cookie::random(&mut rng);
        if !table.contains_cookie(&cookie) {
            return cookie;
        }
    }
}

fn user_at(table: &UsersTable, at: usize) -> Option<User> {
    let record = table.record(at);
    Some(User {
        handle: RecordHandle(at),
        name: String::from_utf8(record.name().to_vec()).ok()?,
        cookie: Cookie::from_bytes(record.cookie())?,
    })
}
