use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, error};

use crate::server::connection::{Connection, Connections};

/// What a worker runs for each ready connection.
///
/// The buffer is the worker's own scratch space, reused across dispatches.
/// Returning an error closes the connection.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, dispatch: &Dispatch<'_>, buf: &mut [u8]) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Dispatch<'_>, &mut [u8]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, dispatch: &Dispatch<'_>, buf: &mut [u8]) -> anyhow::Result<()> {
        self(dispatch, buf)
    }
}

/// A connection handed to a worker, plus access to the rest of the server.
pub struct Dispatch<'a> {
    pub conn: &'a Arc<Connection>,
    pub connections: &'a Connections,
}

impl Dispatch<'_> {
    pub fn close(&self) {
        self.connections.close(self.conn);
    }

    pub fn register_for_repeated_events(&self) -> io::Result<()> {
        self.connections.register_for_repeated_events(self.conn)
    }
}

pub(crate) fn spawn_worker<H: Handler>(
    id: usize,
    buffer_size: usize,
    queue: Receiver<Arc<Connection>>,
    connections: Arc<Connections>,
    handler: Arc<H>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("worker-{id}"))
        .spawn(move || {
            let mut buf = vec![0u8; buffer_size];
            while let Ok(conn) = queue.recv() {
                loop {
                    run_one(&*handler, &conn, &connections, &mut buf);
                    if !conn.finish_dispatch() {
                        break;
                    }
                }
            }
            debug!(worker = id, "worker exiting");
        })
}

fn run_one<H: Handler>(
    handler: &H,
    conn: &Arc<Connection>,
    connections: &Connections,
    buf: &mut [u8],
) {
    if conn.is_closed() {
        return;
    }
    let dispatch = Dispatch { conn, connections };
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&dispatch, buf)));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(token = conn.token().0, peer = %conn.peer(), error = %e, "handler failed");
            dispatch.close();
        }
        Err(_) => {
            error!(token = conn.token().0, peer = %conn.peer(), "handler panicked");
            dispatch.close();
        }
    }
}
