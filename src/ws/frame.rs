//! RFC 6455 frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use std::io::{self, Write};
use std::ops::Range;

use thiserror::Error;

/// Room reserved in front of an outgoing payload for the largest header.
pub const MAX_HEADER_LEN: usize = 10;

/// Close, ping and pong frames carry at most this many payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The frame is `needed` bytes long; fewer have been read.
    #[error("incomplete frame, {needed} bytes needed")]
    Incomplete { needed: usize },
    #[error("fragmented frames (FIN=0) are not implemented")]
    Fragmented,
    #[error("reserved bits set")]
    ReservedBits,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("client sent no mask")]
    Unmasked,
    #[error("degenerate mask key (all bits set: {all_set})")]
    DegenerateMask { all_set: bool },
    #[error("frame of {needed} bytes exceeds buffer of {capacity}")]
    TooLong { needed: usize, capacity: usize },
    #[error("control frame with {0} byte payload")]
    ControlTooLong(u64),
}

/// A decoded frame whose payload has been unmasked in place.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    /// Status code carried by a close frame (first two payload bytes).
    pub fn close_code(&self) -> Option<u16> {
        match self.payload {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }
}

/// Decodes the frame at the start of `buf`, of which `filled` bytes are valid.
///
/// Returns the frame and the number of bytes it occupied. A frame that would
/// not fit in `buf` at all is [`FrameError::TooLong`]; one that would fit but
/// has not fully arrived is [`FrameError::Incomplete`]. A mask key whose bytes
/// are all `0x00` or all `0xFF` is refused as a broken client.
pub fn parse_frame(buf: &mut [u8], filled: usize) -> Result<(Frame<'_>, usize), FrameError> {
    let capacity = buf.len();
    let filled = filled.min(capacity);
    let need = |needed: usize| -> Result<(), FrameError> {
        if needed > capacity {
            Err(FrameError::TooLong { needed, capacity })
        } else if needed > filled {
            Err(FrameError::Incomplete { needed })
        } else {
            Ok(())
        }
    };

    need(2)?;
    let (b0, b1) = (buf[0], buf[1]);

    if b0 & 0x80 == 0 {
        return Err(FrameError::Fragmented);
    }
    if b0 & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let opcode = Opcode::from_u8(b0 & 0x0F).ok_or(FrameError::UnknownOpcode(b0 & 0x0F))?;
    let masked = b1 & 0x80 != 0;

    let (len, mut pos) = match b1 & 0x7F {
        126 => {
            need(4)?;
            (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
        }
        127 => {
            need(10)?;
            let mut be = [0u8; 8];
            be.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(be), 10)
        }
        n => (n as u64, 2),
    };

    if opcode.is_control() && len > MAX_CONTROL_PAYLOAD as u64 {
        return Err(FrameError::ControlTooLong(len));
    }
    if !masked {
        return Err(FrameError::Unmasked);
    }
    need(pos + 4)?;
    let mut mask = [0u8; 4];
    mask.copy_from_slice(&buf[pos..pos + 4]);
    pos += 4;

    if mask.iter().all(|&b| b == 0x00) {
        return Err(FrameError::DegenerateMask { all_set: false });
    }
    if mask.iter().all(|&b| b == 0xFF) {
        return Err(FrameError::DegenerateMask { all_set: true });
    }

    let too_long = FrameError::TooLong {
        needed: usize::MAX,
        capacity,
    };
    let len = usize::try_from(len).map_err(|_| too_long.clone())?;
    let end = pos.checked_add(len).ok_or(too_long)?;
    need(end)?;

    let payload = &mut buf[pos..end];
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok((
        Frame {
            fin: true,
            opcode,
            payload,
        },
        end,
    ))
}

/// Encodes an unmasked server frame into `buffer`.
///
/// The payload is copied to offset [`MAX_HEADER_LEN`] and the header is
/// written immediately before it, using the shortest length encoding.
/// Returns the range of `buffer` holding the finished frame.
pub fn encode_frame(
    buffer: &mut [u8],
    message: &[u8],
    opcode: Opcode,
) -> Result<Range<usize>, FrameError> {
    let needed = message.len() + MAX_HEADER_LEN;
    if needed > buffer.len() {
        return Err(FrameError::TooLong {
            needed,
            capacity: buffer.len(),
        });
    }

    let end = MAX_HEADER_LEN + message.len();
    buffer[MAX_HEADER_LEN..end].copy_from_slice(message);

    let mut start = MAX_HEADER_LEN;
    let len7 = match message.len() {
        n if n < 126 => n as u8,
        n if n <= u16::MAX as usize => {
            start -= 2;
            buffer[start..start + 2].copy_from_slice(&(n as u16).to_be_bytes());
            126
        }
        n => {
            start -= 8;
            buffer[start..start + 8].copy_from_slice(&(n as u64).to_be_bytes());
            127
        }
    };
    start -= 2;
    buffer[start] = 0x80 | opcode.as_u8();
    buffer[start + 1] = len7;

    Ok(start..end)
}

/// Allocates a buffer just big enough for `message` and encodes it.
pub fn encode_frame_vec(message: &[u8], opcode: Opcode) -> Vec<u8> {
    let mut buffer = vec![0u8; message.len() + MAX_HEADER_LEN];
    // sized for the message, so encoding cannot run out of room
    let range = encode_frame(&mut buffer, message, opcode).unwrap_or(0..0);
    buffer.truncate(range.end);
    buffer.drain(..range.start);
    buffer
}

/// Encodes `message` in `buffer` and writes the frame to `out`.
pub fn send_frame<W: Write>(
    out: &mut W,
    buffer: &mut [u8],
    message: &[u8],
    opcode: Opcode,
) -> io::Result<()> {
    let range = encode_frame(buffer, message, opcode)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    out.write_all(&buffer[range])?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_in_place(frame: &mut Vec<u8>, key: [u8; 4]) {
        let header_len = match frame[1] & 0x7F {
            126 => 4,
            127 => 10,
            _ => 2,
        };
        frame[1] |= 0x80;
        let payload = frame.split_off(header_len);
        frame.extend_from_slice(&key);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    }

    #[test]
    fn short_header_for_small_payload() {
        let frame = encode_frame_vec(b"hi", Opcode::Text);
        assert_eq!(frame, vec![0x81, 2, b'h', b'i']);
    }

    #[test]
    fn extended_lengths_are_big_endian() {
        let frame = encode_frame_vec(&[0u8; 300], Opcode::Binary);
        assert_eq!(&frame[..4], &[0x82, 126, 0x01, 0x2C]);

        let frame = encode_frame_vec(&vec![0u8; 70_000], Opcode::Binary);
        assert_eq!(frame[1], 127);
        assert_eq!(&frame[2..10], &70_000u64.to_be_bytes());
    }

    #[test]
    fn unmasks_client_frame() {
        let mut frame = encode_frame_vec(b"hello", Opcode::Text);
        mask_in_place(&mut frame, [1, 2, 3, 4]);
        let n = frame.len();
        let (parsed, used) = parse_frame(&mut frame, n).unwrap();
        assert_eq!(parsed.payload, b"hello");
        assert_eq!(parsed.opcode, Opcode::Text);
        assert_eq!(used, n);
    }

    #[test]
    fn rejects_unmasked_and_degenerate_masks() {
        let mut frame = encode_frame_vec(b"x", Opcode::Text);
        let n = frame.len();
        assert_eq!(parse_frame(&mut frame, n).unwrap_err(), FrameError::Unmasked);

        let mut zero = encode_frame_vec(b"x", Opcode::Text);
        mask_in_place(&mut zero, [0; 4]);
        let n = zero.len();
        assert_eq!(
            parse_frame(&mut zero, n).unwrap_err(),
            FrameError::DegenerateMask { all_set: false }
        );

        let mut ones = encode_frame_vec(b"x", Opcode::Text);
        mask_in_place(&mut ones, [0xFF; 4]);
        let n = ones.len();
        assert_eq!(
            parse_frame(&mut ones, n).unwrap_err(),
            FrameError::DegenerateMask { all_set: true }
        );
    }

    #[test]
    fn control_frames_are_short() {
        let mut ping = encode_frame_vec(&[1u8; MAX_CONTROL_PAYLOAD], Opcode::Ping);
        mask_in_place(&mut ping, [1, 2, 3, 4]);
        let n = ping.len();
        assert_eq!(parse_frame(&mut ping, n).unwrap().0.opcode, Opcode::Ping);

        let mut long = encode_frame_vec(&[1u8; MAX_CONTROL_PAYLOAD + 1], Opcode::Close);
        mask_in_place(&mut long, [1, 2, 3, 4]);
        let n = long.len();
        assert_eq!(parse_frame(&mut long, n).unwrap_err(), FrameError::ControlTooLong(126));

        let mut text = encode_frame_vec(&[1u8; MAX_CONTROL_PAYLOAD + 1], Opcode::Text);
        mask_in_place(&mut text, [1, 2, 3, 4]);
        let n = text.len();
        assert!(parse_frame(&mut text, n).is_ok());
    }

    #[test]
    fn fin_and_rsv_checks() {
        let mut fragment = vec![0x01, 0x80, 1, 2, 3, 4];
        assert_eq!(parse_frame(&mut fragment, 6).unwrap_err(), FrameError::Fragmented);

        let mut rsv = vec![0xC1, 0x80, 1, 2, 3, 4];
        assert_eq!(parse_frame(&mut rsv, 6).unwrap_err(), FrameError::ReservedBits);
    }

    #[test]
    fn incomplete_versus_too_long() {
        let mut frame = encode_frame_vec(&[7u8; 20], Opcode::Binary);
        mask_in_place(&mut frame, [9, 8, 7, 6]);
        let total = frame.len();

        assert_eq!(
            parse_frame(&mut frame, 10).unwrap_err(),
            FrameError::Incomplete { needed: total }
        );
        assert!(matches!(
            parse_frame(&mut frame[..12], 12).unwrap_err(),
            FrameError::TooLong { .. }
        ));
    }

    #[test]
    fn close_code_from_payload() {
        let frame = Frame {
            fin: true,
            opcode: Opcode::Close,
            payload: &[0x03, 0xE8],
        };
        assert_eq!(frame.close_code(), Some(1000));
    }
}
