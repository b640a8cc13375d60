use std::io::{self, Write};

use bytes::{BufMut, BytesMut};

use crate::http::response::{Response, StatusCode};

const HTTP_VERSION: &str = "HTTP/1.1";

/// Serializes the status line and headers, ending with the blank line.
pub fn serialize_head(status: StatusCode, headers: &[(String, String)]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(128 + headers.len() * 32);

    buf.put_slice(HTTP_VERSION.as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(status.as_u16().to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(status.reason_phrase().as_bytes());
    buf.put_slice(b"\r\n");

    for (k, v) in headers {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }

    buf.put_slice(b"\r\n");
    buf
}

pub fn serialize_response(resp: &Response) -> BytesMut {
    let mut buf = serialize_head(resp.status, &resp.headers);
    buf.put_slice(&resp.body);
    buf
}

pub struct ResponseWriter {
    buffer: BytesMut,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response),
            written: 0,
        }
    }

    /// Writes whatever has not been written yet.
    pub fn write_to<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        while self.written < self.buffer.len() {
            let n = match out.write(&self.buffer[self.written..]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        out.flush()
    }

    pub fn is_done(&self) -> bool {
        self.written == self.buffer.len()
    }
}
