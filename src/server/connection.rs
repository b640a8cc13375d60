use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

const IDLE: u8 = 0;
const QUEUED: u8 = 1;
const REQUEUE: u8 = 2;

/// Bytes read for a message that has not fully arrived yet, kept on the
/// connection until the next readiness event.
#[derive(Debug)]
pub enum Pending {
    /// Partial request head.
    Head(Vec<u8>),
    /// Complete head, body still arriving. `body` grows to `declared`.
    Body {
        head: Vec<u8>,
        body: Vec<u8>,
        declared: usize,
    },
    /// Partial WebSocket frame.
    Frame(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub n: usize,
    /// The peer closed its side.
    pub eof: bool,
}

/// One accepted socket.
///
/// Shared between the engine (which owns its registration) and whichever
/// worker is handling it. The dispatch state guarantees at most one worker
/// at a time: readiness that arrives while a worker is busy is folded into a
/// single re-run by that same worker.
pub struct Connection {
    token: Token,
    stream: TcpStream,
    peer: SocketAddr,
    dispatch: AtomicU8,
    upgraded: AtomicBool,
    closed: AtomicBool,
    pending: Mutex<Option<Pending>>,
    write_lock: Mutex<()>,
    writable: Mutex<u64>,
    writable_cv: Condvar,
    write_timeout: Duration,
    user: Mutex<Option<String>>,
}

impl Connection {
    pub fn new(token: Token, stream: TcpStream, peer: SocketAddr, write_timeout: Duration) -> Self {
        Self {
            token,
            stream,
            peer,
            dispatch: AtomicU8::new(IDLE),
            upgraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pending: Mutex::new(None),
            write_lock: Mutex::new(()),
            writable: Mutex::new(0),
            writable_cv: Condvar::new(),
            write_timeout,
            user: Mutex::new(None),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Name of the logged-in user, remembered at upgrade time.
    pub fn user(&self) -> Option<String> {
        self.user.lock().clone()
    }

    pub fn set_user(&self, name: Option<String>) {
        *self.user.lock() = name;
    }

    /// Reads into `buf` until it is full, the socket would block, or the
    /// peer closes. Edge-triggered readiness requires draining like this.
    pub fn read_into(&self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut n = 0;
        while n < buf.len() {
            match (&self.stream).read(&mut buf[n..]) {
                Ok(0) => return Ok(ReadOutcome { n, eof: true }),
                Ok(k) => n += k,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ReadOutcome { n, eof: false })
    }

    /// Appends to `out` until it holds `target` bytes or the socket would
    /// block.
    pub fn read_to_len(&self, out: &mut Vec<u8>, target: usize) -> io::Result<ReadOutcome> {
        let start = out.len();
        if start >= target {
            return Ok(ReadOutcome { n: 0, eof: false });
        }
        out.resize(target, 0);
        let outcome = self.read_into(&mut out[start..]);
        let n = outcome.as_ref().map_or(0, |o| o.n);
        out.truncate(start + n);
        outcome
    }

    /// Exclusive writer for this connection.
    ///
    /// Broadcasts from other workers and replies from the owning worker go
    /// through here, so frames never interleave.
    pub fn writer(&self) -> ConnWriter<'_> {
        ConnWriter {
            conn: self,
            _guard: self.write_lock.lock(),
        }
    }

    /// Called by the engine on a writable event.
    pub fn notify_writable(&self) {
        let mut epoch = self.writable.lock();
        *epoch = epoch.wrapping_add(1);
        self.writable_cv.notify_all();
    }

    fn wait_writable(&self, seen: u64) -> io::Result<()> {
        let mut epoch = self.writable.lock();
        if *epoch != seen {
            return Ok(());
        }
        let timed_out = self
            .writable_cv
            .wait_while_for(&mut epoch, |e| *e == seen, self.write_timeout)
            .timed_out();
        if timed_out || self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "peer not reading"));
        }
        Ok(())
    }

    /// Marks the connection as having work. Returns true when the caller
    /// must queue it; false when a worker already has it.
    pub fn try_enqueue(&self) -> bool {
        let mut state = self.dispatch.load(Ordering::Acquire);
        loop {
            let next = match state {
                IDLE => QUEUED,
                QUEUED => REQUEUE,
                _ => return false,
            };
            match self
                .dispatch
                .compare_exchange(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return state == IDLE,
                Err(actual) => state = actual,
            }
        }
    }

    /// Called by the worker when a dispatch ends. Returns true when more
    /// readiness arrived meanwhile and the worker must run again.
    pub fn finish_dispatch(&self) -> bool {
        if self
            .dispatch
            .compare_exchange(QUEUED, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return false;
        }
        self.dispatch.store(QUEUED, Ordering::Release);
        true
    }

    pub fn stash(&self, pending: Pending) {
        *self.pending.lock() = Some(pending);
    }

    pub fn take_pending(&self) -> Option<Pending> {
        self.pending.lock().take()
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stream.shutdown(Shutdown::Both);
        // release any writer parked on this socket
        self.notify_writable();
    }
}

/// Holds the connection's write lock; on WouldBlock, parks until the engine
/// reports the socket writable again.
pub struct ConnWriter<'a> {
    conn: &'a Connection,
    _guard: MutexGuard<'a, ()>,
}

impl Write for ConnWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            if self.conn.is_closed() {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            let seen = *self.conn.writable.lock();
            match (&self.conn.stream).write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.conn.wait_writable(seen)?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                other => return other,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        (&self.conn.stream).flush()
    }
}

/// Registry of live connections, shared by the engine and the workers.
pub struct Connections {
    registry: Registry,
    table: RwLock<HashMap<Token, Arc<Connection>>>,
    next_token: AtomicUsize,
    write_timeout_ms: AtomicU64,
}

impl Connections {
    pub(crate) fn new(registry: Registry, first_token: usize, write_timeout: Duration) -> Self {
        Self {
            registry,
            table: RwLock::new(HashMap::new()),
            next_token: AtomicUsize::new(first_token),
            write_timeout_ms: AtomicU64::new(write_timeout.as_millis() as u64),
        }
    }

    pub(crate) fn set_write_timeout(&self, timeout: Duration) {
        self.write_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Adds an accepted stream to the readiness registry.
    pub(crate) fn register(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> io::Result<Arc<Connection>> {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        let timeout = Duration::from_millis(self.write_timeout_ms.load(Ordering::Relaxed));
        let conn = Arc::new(Connection::new(token, stream, peer, timeout));

        let fd = conn.stream.as_raw_fd();
        self.registry.register(
            &mut SourceFd(&fd),
            token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        self.table.write().insert(token, Arc::clone(&conn));
        debug!(token = token.0, peer = %peer, "registered connection");
        Ok(conn)
    }

    pub fn get(&self, token: Token) -> Option<Arc<Connection>> {
        self.table.read().get(&token).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Removes the connection from the registry and shuts the socket down.
    /// Safe to call more than once.
    pub fn close(&self, conn: &Connection) {
        if conn.is_closed() {
            return;
        }
        let fd = conn.stream.as_raw_fd();
        if let Err(e) = self.registry.deregister(&mut SourceFd(&fd)) {
            debug!(token = conn.token.0, error = %e, "deregister failed");
        }
        self.table.write().remove(&conn.token);
        conn.shutdown();
        debug!(token = conn.token.0, peer = %conn.peer, "closed connection");
    }

    /// Keeps `conn` registered once its HTTP exchange is over so further
    /// frames keep producing readiness events.
    pub fn register_for_repeated_events(&self, conn: &Connection) -> io::Result<()> {
        conn.upgraded.store(true, Ordering::Release);
        let fd = conn.stream.as_raw_fd();
        self.registry.reregister(
            &mut SourceFd(&fd),
            conn.token,
            Interest::READABLE | Interest::WRITABLE,
        )?;
        info!(token = conn.token.0, peer = %conn.peer, "connection upgraded");
        Ok(())
    }

    /// Snapshot of every upgraded connection.
    pub fn upgraded(&self) -> Vec<Arc<Connection>> {
        self.table
            .read()
            .values()
            .filter(|c| c.is_upgraded() && !c.is_closed())
            .cloned()
            .collect()
    }

    pub(crate) fn close_all(&self) {
        let all: Vec<_> = self.table.read().values().cloned().collect();
        for conn in all {
            self.close(&conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Connection, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let conn = Connection::new(
            Token(7),
            TcpStream::from_std(server),
            peer,
            Duration::from_millis(100),
        );
        (conn, client)
    }

    #[test]
    fn dispatch_state_folds_events() {
        let (conn, _client) = pair();
        assert!(conn.try_enqueue());
        // arrives while a worker holds it
        assert!(!conn.try_enqueue());
        assert!(!conn.try_enqueue());
        assert!(conn.finish_dispatch());
        assert!(!conn.finish_dispatch());
        assert!(conn.try_enqueue());
    }

    #[test]
    fn read_drains_until_would_block() {
        let (conn, mut client) = pair();
        client.write_all(b"hello").unwrap();
        client.flush().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut buf = [0u8; 64];
        let outcome = conn.read_into(&mut buf).unwrap();
        assert_eq!(&buf[..outcome.n], b"hello");
        assert!(!outcome.eof);

        drop(client);
        std::thread::sleep(Duration::from_millis(50));
        assert!(conn.read_into(&mut buf).unwrap().eof);
    }

    #[test]
    fn pending_is_taken_once() {
        let (conn, _client) = pair();
        conn.stash(Pending::Head(b"GET /".to_vec()));
        assert!(matches!(conn.take_pending(), Some(Pending::Head(_))));
        assert!(conn.take_pending().is_none());
    }
}
