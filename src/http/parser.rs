use thiserror::Error;

use crate::error::ProtocolError;
use crate::http::request::{Headers, Request};
use crate::http::response::StatusCode;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// No blank line yet; more bytes are needed.
    #[error("HTTP header: incomplete")]
    Incomplete,
    #[error("{0}")]
    BadRequest(String),
    #[error("POST request: missing Content-Length")]
    LengthRequired,
    #[error("POST request: more than one Content-Length")]
    DuplicateLength,
    #[error("{0}")]
    PayloadTooLarge(String),
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::Incomplete | ParseError::BadRequest(_) => StatusCode::BadRequest,
            ParseError::LengthRequired | ParseError::DuplicateLength => StatusCode::LengthRequired,
            ParseError::PayloadTooLarge(_) => StatusCode::PayloadTooLarge,
        }
    }
}

impl From<ParseError> for ProtocolError {
    fn from(e: ParseError) -> Self {
        ProtocolError::new(e.status(), e.to_string())
    }
}

fn bad(msg: impl Into<String>) -> ParseError {
    ParseError::BadRequest(msg.into())
}

/// Request line and header block, borrowed from the read buffer.
#[derive(Debug, Clone)]
pub struct Head<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub version: &'a str,
    pub headers: Headers<'a>,
    /// Bytes up to and including the blank line.
    pub len: usize,
}

impl<'a> Head<'a> {
    pub fn into_request(self, body: &'a [u8]) -> Request<'a> {
        Request {
            method: self.method,
            path: self.path,
            version: self.version,
            headers: self.headers,
            body,
        }
    }
}

/// What the bytes after the head amount to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPlan {
    /// The body is the `n` bytes already read after the head.
    Complete(usize),
    /// The body is `n` bytes long and not all of it has arrived.
    Await(usize),
}

/// Parses the request line and headers at the start of `buf`.
///
/// Lines end in CRLF or a bare LF; the head ends at the first empty line.
/// Only printable ASCII is accepted inside lines, and a CR must be followed by
/// LF. Header values lose exactly one leading space.
pub fn parse_head(buf: &[u8]) -> Result<Head<'_>, ParseError> {
    let mut request_line: Option<(&str, &str, &str)> = None;
    let mut headers = Headers::new();
    let mut line_start = 0;
    let mut after_cr = false;

    for (i, &c) in buf.iter().enumerate() {
        if after_cr && c != b'\n' {
            return Err(bad("HTTP header: \\r not followed by \\n"));
        }
        match c {
            b'\r' => after_cr = true,
            b'\n' => {
                let line_end = if after_cr { i - 1 } else { i };
                after_cr = false;
                let line = as_str(&buf[line_start..line_end])?;
                line_start = i + 1;

                match request_line {
                    None => request_line = Some(parse_request_line(line)?),
                    Some((method, path, version)) if line.is_empty() => {
                        return Ok(Head {
                            method,
                            path,
                            version,
                            headers,
                            len: i + 1,
                        });
                    }
                    Some(_) => {
                        let (name, value) = line
                            .split_once(':')
                            .ok_or_else(|| bad("HTTP header: field line without ':'"))?;
                        let value = value.strip_prefix(' ').unwrap_or(value);
                        headers.push(name, value);
                    }
                }
            }
            0x20..=0x7E => {}
            c => return Err(bad(format!("HTTP header: invalid character {c}"))),
        }
    }

    Err(ParseError::Incomplete)
}

fn as_str(bytes: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(bytes).map_err(|_| bad("HTTP header: invalid character"))
}

/// `METHOD SP path SP protocol`: the method ends at the first space, the
/// protocol starts after the last one.
fn parse_request_line(line: &str) -> Result<(&str, &str, &str), ParseError> {
    let (method, rest) = line
        .split_once(' ')
        .ok_or_else(|| bad("HTTP header: bad request line"))?;
    let (path, version) = rest
        .rsplit_once(' ')
        .ok_or_else(|| bad("HTTP header: bad request line"))?;

    if method.is_empty() || version.is_empty() {
        return Err(bad("HTTP header: bad request line"));
    }
    if !path.starts_with('/') {
        return Err(bad("HTTP header: path doesn't start with /"));
    }
    Ok((method, path, version))
}

/// Decides how much body the request has.
///
/// `available` is the number of bytes read after the head, `buffer_full`
/// whether the read filled the whole buffer (so more may be waiting). A full
/// buffer is only acceptable for POST with exactly one Content-Length. When
/// the buffer was not full, a single Content-Length that promises more than
/// was read is awaited under the same limits.
pub fn plan_body(
    head: &Head<'_>,
    available: usize,
    buffer_full: bool,
    max_body: usize,
) -> Result<BodyPlan, ParseError> {
    let is_post = head.method == "POST";

    if !buffer_full {
        if is_post && head.headers.count("Content-Length") == 1 {
            let declared = declared_length(head)?;
            if declared > available {
                return check_declared(declared, available, max_body);
            }
        }
        return Ok(BodyPlan::Complete(available));
    }

    if !is_post {
        return Err(ParseError::PayloadTooLarge(format!(
            "{} request: request exceeds the read buffer",
            head.method
        )));
    }

    match head.headers.count("Content-Length") {
        0 => Err(ParseError::LengthRequired),
        1 => check_declared(declared_length(head)?, available, max_body),
        _ => Err(ParseError::DuplicateLength),
    }
}

fn declared_length(head: &Head<'_>) -> Result<usize, ParseError> {
    let value = head.headers.get("Content-Length").unwrap_or_default();
    value
        .trim()
        .parse()
        .map_err(|_| bad(format!("POST request: invalid Content-Length \"{value}\"")))
}

fn check_declared(
    declared: usize,
    available: usize,
    max_body: usize,
) -> Result<BodyPlan, ParseError> {
    if declared < available {
        Err(ParseError::PayloadTooLarge(
            "POST request: Content-Length < bytes read".to_string(),
        ))
    } else if declared > max_body {
        Err(ParseError::PayloadTooLarge(
            "POST request: Content-Length > max size".to_string(),
        ))
    } else if declared == available {
        Ok(BodyPlan::Complete(available))
    } else {
        Ok(BodyPlan::Await(declared))
    }
}

/// Parses a request that lies entirely in `buf`.
///
/// Convenience for callers that already hold the whole message: the body is
/// everything after the head, subject to [`plan_body`] with a non-full buffer.
pub fn parse_http_request(buf: &[u8], max_body: usize) -> Result<Request<'_>, ParseError> {
    let head = parse_head(buf)?;
    let available = buf.len() - head.len;
    match plan_body(&head, available, false, max_body)? {
        BodyPlan::Complete(n) => {
            let start = head.len;
            Ok(head.into_request(&buf[start..start + n]))
        }
        BodyPlan::Await(_) => Err(ParseError::Incomplete),
    }
}
