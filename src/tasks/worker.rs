//! Named background workers.
//!
//! Socket I/O runs on small tokio runtimes shared by every session in the
//! process. A worker is created the first time a transport asks for it and
//! torn down when the last handle to it is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::SessionError;

/// Worker running stream and datagram sockets.
pub const NETWORK_WORKER: &str = "_network";
/// Worker running request/response exchanges.
pub const HTTP_WORKER: &str = "_http";
/// Worker running WebSocket connections.
pub const WEBSOCKET_WORKER: &str = "_websocket";

struct WorkerInner {
    name: String,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Drop for WorkerInner {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!(worker = %self.name, "Shutting down worker");
            runtime.shutdown_background();
        }
    }
}

/// Cloneable handle to a background executor.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Worker backed by the tokio runtime the caller is running on.
    pub fn inline() -> Result<Self, SessionError> {
        let handle = Handle::try_current().map_err(|e| SessionError::Worker(e.to_string()))?;
        Ok(Self::from_handle(handle))
    }

    /// Worker backed by an existing runtime. The runtime is not shut down
    /// when the worker is dropped.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                name: "inline".to_string(),
                handle,
                runtime: None,
            }),
        }
    }

    fn owned(name: &str) -> Result<Self, SessionError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("funapi{name}"))
            .enable_all()
            .build()
            .map_err(|e| SessionError::Worker(e.to_string()))?;
        debug!(worker = %name, "Started worker");
        Ok(Self {
            inner: Arc::new(WorkerInner {
                name: name.to_string(),
                handle: runtime.handle().clone(),
                runtime: Some(runtime),
            }),
        })
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run a future on this worker.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.handle.spawn(future)
    }

    /// Runtime handle, for APIs that take one directly.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    fn downgrade(&self) -> Weak<WorkerInner> {
        Arc::downgrade(&self.inner)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.inner.name)
            .field("owned", &self.inner.runtime.is_some())
            .finish()
    }
}

/// Process-wide table of named workers.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, Weak<WorkerInner>>>,
}

impl WorkerRegistry {
    /// The process-wide registry.
    pub fn global() -> &'static WorkerRegistry {
        static REGISTRY: OnceLock<WorkerRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| WorkerRegistry {
            workers: Mutex::new(HashMap::new()),
        })
    }

    /// Get the named worker, starting it if no live handle exists.
    pub fn get(&self, name: &str) -> Result<Worker, SessionError> {
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(inner) = workers.get(name).and_then(Weak::upgrade) {
            return Ok(Worker { inner });
        }

        let worker = Worker::owned(name)?;
        workers.retain(|_, weak| weak.strong_count() > 0);
        workers.insert(name.to_string(), worker.downgrade());
        Ok(worker)
    }

    /// Whether the named worker is currently running.
    pub fn is_running(&self, name: &str) -> bool {
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_shares_and_releases() {
        let registry = WorkerRegistry::global();
        let name = "_test_shared";

        let a = registry.get(name).unwrap();
        let b = registry.get(name).unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert!(registry.is_running(name));

        let (tx, rx) = std::sync::mpsc::channel();
        a.spawn(async move {
            tx.send(7).unwrap();
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 7);

        drop(a);
        assert!(registry.is_running(name));
        drop(b);
        assert!(!registry.is_running(name));

        let c = registry.get(name).unwrap();
        assert!(registry.is_running(name));
        drop(c);
    }

    #[tokio::test]
    async fn test_inline_worker() {
        let worker = Worker::inline().unwrap();
        let value = worker.spawn(async { 3 + 4 }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(worker.name(), "inline");
    }

    #[test]
    fn test_inline_outside_runtime() {
        assert!(matches!(Worker::inline(), Err(SessionError::Worker(_))));
    }
}
