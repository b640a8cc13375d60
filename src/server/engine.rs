use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::server::connection::{Connection, Connections};
use crate::server::pool::{self, Handler};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("socket setup: {0}")]
    Socket(#[from] io::Error),
}

/// Stops a running [`Engine::run_loop`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    stopping: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake event loop");
        }
    }
}

/// Listening socket, readiness registry and worker pool.
///
/// ```text
///   epoll ──► run_loop ──► queue ──► worker 0..n ──► handler(conn, buf)
///     ▲                                 │
///     └──── register_for_repeated_events┘
/// ```
pub struct Engine {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    max_events: usize,
    connections: Arc<Connections>,
    queue: Option<Sender<Arc<Connection>>>,
    workers: Vec<JoinHandle<()>>,
    waker: Arc<Waker>,
    stopping: Arc<AtomicBool>,
}

impl Engine {
    /// Binds a non-blocking listener (`SO_REUSEADDR`) on `addr` and registers
    /// it for edge-triggered readiness.
    pub fn start(addr: SocketAddr, max_events: usize) -> Result<Self, EngineError> {
        let mut listener = TcpListener::bind(addr).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::PermissionDenied => EngineError::Bind { addr, source: e },
            _ => EngineError::Socket(e),
        })?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let registry = poll.registry().try_clone()?;

        Ok(Self {
            poll,
            listener,
            local_addr,
            max_events: max_events.max(1),
            connections: Arc::new(Connections::new(
                registry,
                FIRST_CONNECTION,
                Duration::from_secs(10),
            )),
            queue: None,
            workers: Vec::new(),
            waker,
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connections(&self) -> Arc<Connections> {
        Arc::clone(&self.connections)
    }

    /// How long a worker may wait for a peer to accept more bytes.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.connections.set_write_timeout(timeout);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
            stopping: Arc::clone(&self.stopping),
        }
    }

    /// Spawns `n_workers` threads, each with its own `buffer_size` scratch
    /// buffer, running `handler` for every ready connection.
    pub fn register_worker_pool<H>(
        &mut self,
        n_workers: usize,
        buffer_size: usize,
        handler: H,
    ) -> Result<(), EngineError>
    where
        H: Handler,
    {
        let (tx, rx) = unbounded();
        let handler = Arc::new(handler);

        for id in 0..n_workers.max(1) {
            let worker = pool::spawn_worker(
                id,
                buffer_size,
                rx.clone(),
                Arc::clone(&self.connections),
                Arc::clone(&handler),
            )?;
            self.workers.push(worker);
        }

        self.queue = Some(tx);
        info!(workers = self.workers.len(), buffer_size, "worker pool started");
        Ok(())
    }

    /// Waits for readiness and feeds the worker pool until shut down.
    pub fn run_loop(mut self) -> Result<(), EngineError> {
        let mut events = Events::with_capacity(self.max_events);

        while !self.stopping.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_all(),
                    WAKER => {}
                    token => {
                        let Some(conn) = self.connections.get(token) else {
                            continue;
                        };
                        if event.is_writable() {
                            conn.notify_writable();
                        }
                        if event.is_readable() || event.is_error() || event.is_read_closed() {
                            self.dispatch(conn);
                        }
                    }
                }
            }
        }

        info!("event loop stopping");
        self.stop();
        Ok(())
    }

    fn accept_all(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "set_nodelay failed");
                    }
                    match self.connections.register(stream, peer) {
                        Ok(conn) => info!(token = conn.token().0, peer = %peer, "accepted"),
                        Err(e) => error!(peer = %peer, error = %e, "failed to register connection"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, conn: Arc<Connection>) {
        if !conn.try_enqueue() {
            return;
        }
        match &self.queue {
            Some(queue) => {
                if queue.send(conn).is_err() {
                    error!("worker queue closed");
                }
            }
            None => warn!(token = conn.token().0, "no worker pool registered"),
        }
    }

    fn stop(&mut self) {
        // dropping the sender ends every worker's recv loop
        self.queue = None;
        self.connections.close_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }
}
