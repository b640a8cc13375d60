//! On-disk and in-memory layout of one user record.
//!
//! ```text
//! +--------------------+----------------+-----------------+----+
//! | bcrypt hash (60)   | cookie (16)    | name (1..=64)   | \0 |
//! +--------------------+----------------+-----------------+----+
//! ```
//!
//! Records are stored back to back with no other framing.

use std::fmt;

use rand::Rng;
use rand::distributions::Alphanumeric;

pub const HASH_LEN: usize = 60;
pub const COOKIE_LEN: usize = 16;
pub const PREFIX_LEN: usize = HASH_LEN + COOKIE_LEN;
pub const NAME_MAX_LEN: usize = 64;

/// Offset of a record inside the store's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordHandle(pub(crate) usize);

/// Login cookie: 16 alphanumeric ASCII bytes, compared byte for byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cookie([u8; COOKIE_LEN]);

impl Cookie {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; COOKIE_LEN];
        for slot in &mut bytes {
            *slot = rng.sample(Alphanumeric);
        }
        Self(bytes)
    }

    /// Accepts exactly [`COOKIE_LEN`] alphanumeric bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; COOKIE_LEN] = bytes.try_into().ok()?;
        bytes
            .iter()
            .all(u8::is_ascii_alphanumeric)
            .then_some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; COOKIE_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // only ever built from ASCII alphanumerics
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cookie(..)")
    }
}

/// Whether `name` may be stored: 1 to [`NAME_MAX_LEN`] bytes of
/// `[-_.0-9A-Za-z]`.
pub fn is_valid_name(name: &[u8]) -> bool {
    !name.is_empty()
        && name.len() <= NAME_MAX_LEN
        && name
            .iter()
            .all(|&c| c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_' | b'.'))
}

/// Bytes of a record for `name`.
pub(crate) fn encode(hash: &[u8; HASH_LEN], cookie: &Cookie, name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX_LEN + name.len() + 1);
    out.extend_from_slice(hash);
    out.extend_from_slice(cookie.as_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out
}

/// Read-only view of the record starting at `at` in an arena whose
/// structure has been validated.
#[derive(Clone, Copy)]
pub(crate) struct RecordRef<'a> {
    arena: &'a [u8],
    at: usize,
}

impl<'a> RecordRef<'a> {
    pub(crate) fn new(arena: &'a [u8], at: usize) -> Self {
        Self { arena, at }
    }

    pub(crate) fn hash(&self) -> &'a [u8] {
        &self.arena[self.at..self.at + HASH_LEN]
    }

    pub(crate) fn cookie(&self) -> &'a [u8] {
        &self.arena[self.at + HASH_LEN..self.at + PREFIX_LEN]
    }

    pub(crate) fn name(&self) -> &'a [u8] {
        let rest = &self.arena[self.at + PREFIX_LEN..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        &rest[..end]
    }
}

/// Checks the record at `at` and returns the offset just past it.
pub(crate) fn scan(arena: &[u8], at: usize) -> Result<usize, &'static str> {
    let rest = &arena[at..];
    if rest.len() < PREFIX_LEN + 2 {
        return Err("truncated record");
    }
    let name_len = rest[PREFIX_LEN..]
        .iter()
        .position(|&b| b == 0)
        .ok_or("name is not NUL-terminated")?;
    let name = &rest[PREFIX_LEN..PREFIX_LEN + name_len];
    if !is_valid_name(name) {
        return Err("invalid name");
    }
    if !rest[..HASH_LEN].is_ascii() {
        return Err("invalid password hash");
    }
    if Cookie::from_bytes(&rest[HASH_LEN..PREFIX_LEN]).is_none() {
        return Err("invalid cookie");
    }
    Ok(at + PREFIX_LEN + name_len + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert!(is_valid_name(b"alice"));
        assert!(is_valid_name(b"a.b-c_9"));
        assert!(!is_valid_name(b""));
        assert!(!is_valid_name(b"a b"));
        assert!(!is_valid_name(b"../x/"));
        assert!(is_valid_name(&[b'x'; NAME_MAX_LEN]));
        assert!(!is_valid_name(&[b'x'; NAME_MAX_LEN + 1]));
    }

    #[test]
    fn random_cookie_is_alphanumeric() {
        let cookie = Cookie::random(&mut rand::thread_rng());
        assert!(Cookie::from_bytes(cookie.as_bytes()).is_some());
        assert_eq!(cookie.as_str().len(), COOKIE_LEN);
    }

    #[test]
    fn encode_then_scan() {
        let hash = [b'$'; HASH_LEN];
        let cookie = Cookie::from_bytes(b"abcdefghABCDEFGH").unwrap();
        let rec = encode(&hash, &cookie, "bob");
        assert_eq!(scan(&rec, 0), Ok(rec.len()));

        let view = RecordRef::new(&rec, 0);
        assert_eq!(view.name(), b"bob");
        assert_eq!(view.cookie(), b"abcdefghABCDEFGH");
    }

    #[test]
    fn missing_terminator() {
        let hash = [b'$'; HASH_LEN];
        let cookie = Cookie::from_bytes(b"abcdefghABCDEFGH").unwrap();
        let mut rec = encode(&hash, &cookie, "bob");
        rec.pop();
        assert_eq!(scan(&rec, 0), Err("name is not NUL-terminated"));
    }
}
