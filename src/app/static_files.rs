//! Files served from the static directory.

use std::io::{self, Write};
use std::path::Path;

use bytes::BytesMut;

use crate::cache::{CacheView, FileCache};
use crate::error::ProtocolError;
use crate::http::mime::MimeTable;
use crate::http::request::Request;
use crate::http::response::StatusCode;
use crate::http::writer::serialize_head;

/// Already-compressed formats; gzip would only cost CPU.
const PRECOMPRESSED: [&str; 4] = ["jpg", "png", "webp", "gif"];

/// Rejects request paths that could leave the static directory.
///
/// Only `[-_./0-9A-Za-z]` is allowed, and no segment may be `.` or contain
/// `..`. Runs before the filesystem is touched.
pub fn check_path(path: &str) -> Result<(), ProtocolError> {
    if let Some(c) = path
        .chars()
        .find(|&c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/')))
    {
        return Err(ProtocolError::forbidden(format!(
            "path \"{path}\" contains a disallowed character '{c}'"
        )));
    }
    if let Some(seg) = path
        .split('/')
        .find(|seg| *seg == "." || seg.contains(".."))
    {
        return Err(ProtocolError::forbidden(format!(
            "path \"{path}\" contains a disallowed sequence \"{seg}\""
        )));
    }
    Ok(())
}

/// Whether to offer the gzip variant of `file` to the client of `req`.
pub fn wants_gzip(req: &Request<'_>, file: &Path) -> bool {
    let precompressed = file
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PRECOMPRESSED.contains(&e));
    !precompressed && req.qvalue("Accept-Encoding", "gzip") > 0.0
}

/// Writes `file` as a 200 response.
///
/// Cached content is copied out and the cache lock released before anything
/// is written, so a slow peer never holds up a cache refresh. Files above the
/// cache ceiling are streamed from disk. Any failure to open the file is a
/// 404.
pub fn send_file<W: Write>(
    out: &mut W,
    cache: &FileCache,
    mimes: &MimeTable,
    req: &Request<'_>,
    file: &Path,
) -> anyhow::Result<()> {
    let view = cache
        .get(file, wants_gzip(req, file))
        .map_err(|e| ProtocolError::not_found(format!("file {}: {e}", file.display())))?;

    let mut headers = vec![
        ("Content-Type".to_string(), mimes.for_path(file).to_string()),
        ("Content-Length".to_string(), view.len().to_string()),
    ];
    if view.is_gzip() {
        headers.push(("Content-Encoding".to_string(), "gzip".to_string()));
    }
    headers.push(("Connection".to_string(), "close".to_string()));
    let mut message: BytesMut = serialize_head(StatusCode::Ok, &headers);

    match view {
        CacheView::Cached { bytes, .. } => {
            message.extend_from_slice(&bytes);
            drop(bytes);
            out.write_all(&message)?;
        }
        CacheView::Uncached { file: source, len } => {
            out.write_all(&message)?;
            io::copy(&mut io::Read::take(source, len), out)?;
        }
        CacheView::Empty => out.write_all(&message)?,
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_pass() {
        assert!(check_path("/main.js").is_ok());
        assert!(check_path("/img/logo-2.png").is_ok());
        assert!(check_path("/.well-known/x").is_ok());
    }

    #[test]
    fn traversal_is_forbidden() {
        for path in ["/../etc/passwd", "/a/../b", "/a/..", "/./x", "/a..b"] {
            let err = check_path(path).unwrap_err();
            assert_eq!(err.status, StatusCode::Forbidden, "{path}");
        }
    }

    #[test]
    fn odd_characters_are_forbidden() {
        for path in ["/a%2e", "/a b", "/a?b", "/a\\b", "/é"] {
            assert_eq!(check_path(path).unwrap_err().status, StatusCode::Forbidden, "{path}");
        }
    }
}
