//! Connection engine.
//!
//! - **`engine`**: listening socket, `mio` poll loop, shutdown
//! - **`connection`**: per-socket state shared between the loop and workers
//! - **`pool`**: worker threads draining the ready queue

pub mod connection;
pub mod engine;
pub mod pool;

pub use connection::{Connection, Connections, Pending};
pub use engine::{Engine, EngineError, ShutdownHandle};
pub use pool::{Dispatch, Handler};
