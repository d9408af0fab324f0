//! Deferred work: the per-session task queue drained by the application and
//! the shared background workers that run socket I/O.

mod queue;
mod worker;

pub use queue::{Task, TaskQueue};
pub use worker::{HTTP_WORKER, NETWORK_WORKER, WEBSOCKET_WORKER, Worker, WorkerRegistry};
