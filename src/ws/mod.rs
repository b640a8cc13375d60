//! WebSocket support: upgrade handshake and frame codec.
//!
//! After [`handshake::handshake`] succeeds the connection carries frames.
//! [`receive_frame`] decodes one and answers control frames itself, so the
//! caller only ever sees application data or a close.

pub mod frame;
pub mod handshake;

use std::io::{self, Write};

use thiserror::Error;
use tracing::info;

use crate::ws::frame::{Frame, FrameError, Opcode, encode_frame_vec, parse_frame};

#[derive(Debug, Error)]
pub enum WsError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What one decoded frame means for the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming<'a> {
    /// A text or binary message.
    Data(Frame<'a>),
    /// The peer sent a close frame (already echoed); the socket must be closed.
    Closed(Option<u16>),
    /// A ping or pong that has been answered. No application data this turn.
    Control,
}

/// Decodes the frame at the start of `buf` and handles control opcodes.
///
/// A close is echoed back, a ping gets a pong carrying the same payload, and
/// a pong gets a ping as keepalive. Returns the outcome and the number of
/// bytes the frame used.
pub fn receive_frame<'b, W: Write>(
    peer: &mut W,
    buf: &'b mut [u8],
    filled: usize,
) -> Result<(Incoming<'b>, usize), WsError> {
    let (frame, used) = parse_frame(buf, filled)?;

    let incoming = match frame.opcode {
        Opcode::Text | Opcode::Binary => Incoming::Data(frame),
        Opcode::Close => {
            let code = frame.close_code();
            info!(code = ?code, "closing websocket");
            peer.write_all(&encode_frame_vec(frame.payload, Opcode::Close))?;
            peer.flush()?;
            Incoming::Closed(code)
        }
        Opcode::Ping => {
            peer.write_all(&encode_frame_vec(frame.payload, Opcode::Pong))?;
            peer.flush()?;
            Incoming::Control
        }
        Opcode::Pong => {
            peer.write_all(&encode_frame_vec(&[], Opcode::Ping))?;
            peer.flush()?;
            Incoming::Control
        }
        Opcode::Continuation => return Err(FrameError::Fragmented.into()),
    };

    Ok((incoming, used))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let key = [0x11, 0x22, 0x33, 0x44];
        let mut out = vec![0x80 | opcode.as_u8(), 0x80 | payload.len() as u8];
        out.extend_from_slice(&key);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        out
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let mut buf = client_frame(Opcode::Ping, b"hb");
        let n = buf.len();
        let mut out = Vec::new();
        let (incoming, used) = receive_frame(&mut out, &mut buf, n).unwrap();
        assert_eq!(incoming, Incoming::Control);
        assert_eq!(used, n);
        assert_eq!(out, vec![0x8A, 2, b'h', b'b']);
    }

    #[test]
    fn close_reports_code_and_echoes() {
        let mut buf = client_frame(Opcode::Close, &1001u16.to_be_bytes());
        let n = buf.len();
        let mut out = Vec::new();
        let (incoming, _) = receive_frame(&mut out, &mut buf, n).unwrap();
        assert_eq!(incoming, Incoming::Closed(Some(1001)));
        assert_eq!(out[0], 0x88);
    }

    #[test]
    fn text_passes_through() {
        let mut buf = client_frame(Opcode::Text, b"hello");
        let n = buf.len();
        let mut out = Vec::new();
        let (incoming, _) = receive_frame(&mut out, &mut buf, n).unwrap();
        match incoming {
            Incoming::Data(frame) => assert_eq!(frame.payload, b"hello"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(out.is_empty());
    }
}
