//! HTTP → WebSocket upgrade (RFC 6455 §4.2).

use std::io::Write;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::error::ProtocolError;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use crate::http::writer::ResponseWriter;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The parts of a valid upgrade request the reply depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake<'a> {
    pub key: &'a str,
    pub protocol: &'a str,
    pub origin: &'a str,
}

/// `Sec-WebSocket-Accept` for a client key: base64(SHA-1(key ++ GUID)).
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Checks the upgrade headers of `req`.
///
/// `Upgrade` must list `websocket` and `Connection` must list `Upgrade`
/// (comma-separated, exact match). `Sec-WebSocket-Version`, `Origin`,
/// `Sec-WebSocket-Protocol` and `Sec-WebSocket-Key` must each appear once.
pub fn validate<'a>(req: &Request<'a>) -> Result<Handshake<'a>, ProtocolError> {
    require_token(req, "Upgrade", "websocket")?;
    require_token(req, "Connection", "Upgrade")?;
    single(req, "Sec-WebSocket-Version")?;
    let origin = single(req, "Origin")?;
    let protocol = single(req, "Sec-WebSocket-Protocol")?;
    let key = single(req, "Sec-WebSocket-Key")?;

    Ok(Handshake {
        key,
        protocol,
        origin,
    })
}

fn single<'a>(req: &Request<'a>, name: &str) -> Result<&'a str, ProtocolError> {
    let mut values = req.headers.get_all(name);
    let first = values
        .next()
        .ok_or_else(|| ProtocolError::bad_request(format!("websocket handshake: missing {name}")))?;
    if values.next().is_some() {
        return Err(ProtocolError::bad_request(format!("multiple values for {name}")));
    }
    Ok(first)
}

fn require_token(req: &Request<'_>, name: &str, token: &str) -> Result<(), ProtocolError> {
    let mut seen = false;
    for value in req.headers.get_all(name) {
        seen = true;
        if value.split(',').any(|t| t.trim_start_matches(' ') == token) {
            return Ok(());
        }
    }
    if seen {
        Err(ProtocolError::bad_request(format!(
            "websocket handshake: {name} != {token}"
        )))
    } else {
        Err(ProtocolError::bad_request(format!(
            "websocket handshake: missing {name}"
        )))
    }
}

/// The `101 Switching Protocols` reply, echoing the requested sub-protocol.
pub fn response(hs: &Handshake<'_>) -> Response {
    ResponseBuilder::new(StatusCode::SwitchingProtocols)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Accept", accept_key(hs.key))
        .header("Sec-WebSocket-Protocol", hs.protocol)
        .build()
}

/// Validates `req` and writes the 101 reply to `out`.
///
/// Validation failures are returned as [`ProtocolError`] before anything is
/// written; write failures come back wrapped in `anyhow`.
pub fn handshake<W: Write>(out: &mut W, req: &Request<'_>) -> anyhow::Result<()> {
    let hs = validate(req)?;
    let mut writer = ResponseWriter::new(&response(&hs));
    writer.write_to(out)?;
    tracing::debug!(origin = hs.origin, protocol = hs.protocol, "websocket handshake");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::parse_http_request;

    const UPGRADE: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Origin: http://localhost\r\n\
        Sec-WebSocket-Protocol: chat\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

    #[test]
    fn rfc_example_key() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn connection_token_list_is_searched() {
        let req = parse_http_request(UPGRADE, 1024).unwrap();
        let hs = validate(&req).unwrap();
        assert_eq!(hs.protocol, "chat");
        assert_eq!(hs.origin, "http://localhost");
    }

    #[test]
    fn writes_switching_protocols() {
        let req = parse_http_request(UPGRADE, 1024).unwrap();
        let mut out = Vec::new();
        handshake(&mut out, &req).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat\r\n"));
        assert!(!text.contains("Content-Length"));
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Version: 8\r\n\
            Origin: x\r\n\
            Sec-WebSocket-Protocol: chat\r\n\
            Sec-WebSocket-Key: abc\r\n\r\n";
        let req = parse_http_request(raw, 1024).unwrap();
        let err = validate(&req).unwrap_err();
        assert_eq!(err.status, StatusCode::BadRequest);
        assert!(err.message.contains("Sec-WebSocket-Version"));
    }

    #[test]
    fn missing_upgrade_token() {
        let raw = b"GET /chat HTTP/1.1\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\r\n";
        let req = parse_http_request(raw, 1024).unwrap();
        let err = validate(&req).unwrap_err();
        assert!(err.message.contains("Upgrade != websocket"));
    }
}
