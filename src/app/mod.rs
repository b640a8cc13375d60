//! Request handling: what a worker does with a ready connection.
//!
//! Plain connections carry exactly one HTTP request and are closed after the
//! response. Connections upgraded at `/chat` carry WebSocket frames; every
//! text or binary message is broadcast to all upgraded connections.

mod routes;
pub mod session;
pub mod static_files;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use tracing::{debug, warn};

use crate::cache::FileCache;
use crate::config::Config;
use crate::error::{ProtocolError, status_of};
use crate::http::mime::MimeTable;
use crate::http::parser::{BodyPlan, ParseError, parse_head, plan_body};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::{Dispatch, Handler, Pending};
use crate::store::UserStore;
use crate::ws::frame::{FrameError, Opcode, encode_frame_vec};
use crate::ws::{Incoming, WsError, receive_frame};

pub struct App {
    store: UserStore,
    cache: FileCache,
    mimes: MimeTable,
    static_dir: PathBuf,
    pages_dir: PathBuf,
    max_body: usize,
}

impl App {
    pub fn new(
        store: UserStore,
        cache: FileCache,
        mimes: MimeTable,
        static_dir: impl Into<PathBuf>,
        pages_dir: impl Into<PathBuf>,
        max_body: usize,
    ) -> Self {
        Self {
            store,
            cache,
            mimes,
            static_dir: static_dir.into(),
            pages_dir: pages_dir.into(),
            max_body,
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        if let Some(dir) = cfg.users_file.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let store = UserStore::open(&cfg.users_file, cfg.bcrypt_cost)
            .with_context(|| format!("opening user store {}", cfg.users_file.display()))?;
        let mimes = MimeTable::load(&cfg.mime_file)?;

        Ok(Self::new(
            store,
            FileCache::new(cfg.cache_max_file_size),
            mimes,
            &cfg.static_dir,
            &cfg.pages_dir,
            cfg.max_body_size,
        ))
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    fn serve_http(&self, d: &Dispatch<'_>, buf: &mut [u8]) -> anyhow::Result<()> {
        let result = match d.conn.take_pending() {
            Some(Pending::Body {
                head,
                body,
                declared,
            }) => self.resume_body(d, head, body, declared),
            Some(Pending::Head(prefix)) => self.read_request(d, buf, prefix),
            Some(Pending::Frame(_)) | None => self.read_request(d, buf, Vec::new()),
        };
        result.or_else(|e| self.fail(d, e))
    }

    /// Reads and parses a request head, continuing from `prefix` if an
    /// earlier dispatch stashed part of it.
    fn read_request(
        &self,
        d: &Dispatch<'_>,
        buf: &mut [u8],
        prefix: Vec<u8>,
    ) -> anyhow::Result<()> {
        let start = prefix.len();
        buf[..start].copy_from_slice(&prefix);
        let outcome = d.conn.read_into(&mut buf[start..])?;
        if outcome.n == 0 {
            if outcome.eof {
                d.close();
            } else if start > 0 {
                d.conn.stash(Pending::Head(prefix));
            }
            return Ok(());
        }

        let n = start + outcome.n;
        let full = n == buf.len();
        let data = &buf[..n];

        let head = match parse_head(data) {
            Ok(head) => head,
            Err(ParseError::Incomplete) if full => {
                let msg = "HTTP header: larger than the read buffer";
                return Err(ProtocolError::bad_request(msg).into());
            }
            Err(ParseError::Incomplete) => {
                if outcome.eof {
                    d.close();
                } else {
                    d.conn.stash(Pending::Head(data.to_vec()));
                }
                return Ok(());
            }
            Err(e) => return Err(ProtocolError::from(e).into()),
        };

        let available = n - head.len;
        match plan_body(&head, available, full, self.max_body).map_err(ProtocolError::from)? {
            BodyPlan::Complete(len) => {
                let body_start = head.len;
                let req = head.into_request(&data[body_start..body_start + len]);
                self.finish(d, &req)
            }
            BodyPlan::Await(declared) => {
                let mut body = Vec::with_capacity(declared);
                body.extend_from_slice(&data[head.len..]);
                let head = data[..head.len].to_vec();
                self.resume_body(d, head, body, declared)
            }
        }
    }

    /// Reads more of a body whose length was declared up front.
    fn resume_body(
        &self,
        d: &Dispatch<'_>,
        head: Vec<u8>,
        mut body: Vec<u8>,
        declared: usize,
    ) -> anyhow::Result<()> {
        let outcome = d.conn.read_to_len(&mut body, declared)?;
        if body.len() < declared {
            if outcome.eof {
                d.close();
            } else {
                d.conn.stash(Pending::Body {
                    head,
                    body,
                    declared,
                });
            }
            return Ok(());
        }

        let parsed = parse_head(&head).map_err(ProtocolError::from)?;
        let req = parsed.into_request(&body);
        self.finish(d, &req)
    }

    fn finish(&self, d: &Dispatch<'_>, req: &Request<'_>) -> anyhow::Result<()> {
        debug!(
            method = req.method,
            path = req.path,
            version = req.version,
            headers = ?req.headers,
            "request"
        );
        self.route(d, req)?;
        if !d.conn.is_upgraded() {
            d.close();
        }
        Ok(())
    }

    /// Best-effort error response, then close. The error is passed on so the
    /// worker logs it.
    fn fail(&self, d: &Dispatch<'_>, err: anyhow::Error) -> anyhow::Result<()> {
        if !d.conn.is_upgraded() && !d.conn.is_closed() {
            let response = Response::error(status_of(&err));
            if let Err(e) = ResponseWriter::new(&response).write_to(&mut d.conn.writer()) {
                debug!(error = %e, "could not send error response");
            }
        }
        d.close();
        Err(err)
    }

    /// Decodes every complete frame that has arrived and broadcasts the
    /// messages. A trailing partial frame is kept for the next event.
    fn serve_websocket(&self, d: &Dispatch<'_>, buf: &mut [u8]) -> anyhow::Result<()> {
        let mut filled = 0;
        if let Some(Pending::Frame(prev)) = d.conn.take_pending() {
            buf[..prev.len()].copy_from_slice(&prev);
            filled = prev.len();
        }

        loop {
            let outcome = d.conn.read_into(&mut buf[filled..])?;
            filled += outcome.n;
            let was_full = filled == buf.len();

            let mut start = 0;
            while start < filled {
                let received = {
                    let mut out = d.conn.writer();
                    receive_frame(&mut out, &mut buf[start..], filled - start)
                };
                match received {
                    Ok((Incoming::Data(frame), used)) => {
                        self.broadcast(d, frame.opcode, frame.payload);
                        start += used;
                    }
                    Ok((Incoming::Control, used)) => start += used,
                    Ok((Incoming::Closed(_), _)) => {
                        d.close();
                        return Ok(());
                    }
                    Err(WsError::Frame(FrameError::Incomplete { .. })) => break,
                    Err(WsError::Frame(FrameError::TooLong { .. })) if start > 0 => break,
                    Err(e) => return Err(e.into()),
                }
            }

            if start > 0 {
                buf.copy_within(start..filled, 0);
                filled -= start;
            }

            if outcome.eof {
                d.close();
                return Ok(());
            }
            if !was_full {
                break;
            }
            if start == 0 {
                return Err(WsError::Frame(FrameError::TooLong {
                    needed: filled + 1,
                    capacity: buf.len(),
                })
                .into());
            }
        }

        if filled > 0 {
            d.conn.stash(Pending::Frame(buf[..filled].to_vec()));
        }
        Ok(())
    }

    /// Sends `payload` to every upgraded connection, prefixed with the
    /// sender's name.
    fn broadcast(&self, d: &Dispatch<'_>, opcode: Opcode, payload: &[u8]) {
        let sender = d.conn.user();
        let sender = sender.as_deref().unwrap_or("anonymous");
        let mut message = Vec::with_capacity(sender.len() + 2 + payload.len());
        message.extend_from_slice(sender.as_bytes());
        message.extend_from_slice(b": ");
        message.extend_from_slice(payload);
        let frame = encode_frame_vec(&message, opcode);

        for peer in d.connections.upgraded() {
            let mut out = peer.writer();
            if let Err(e) = out.write_all(&frame).and_then(|_| out.flush()) {
                drop(out);
                warn!(token = peer.token().0, peer = %peer.peer(), error = %e, "broadcast failed");
                d.connections.close(&peer);
            }
        }
    }
}

impl Handler for App {
    fn handle(&self, d: &Dispatch<'_>, buf: &mut [u8]) -> anyhow::Result<()> {
        if d.conn.is_upgraded() {
            self.serve_websocket(d, buf)
        } else {
            self.serve_http(d, buf)
        }
    }
}
