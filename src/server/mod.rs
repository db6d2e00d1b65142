//! TCP connection server
//!
//! Owns the listening socket and the set of live per-connection
//! workers. The accept loop never blocks on a worker; every accepted
//! connection gets its own task and serves its requests strictly
//! sequentially while distinct connections proceed in parallel.

mod worker;

use crate::registry::HandlerRegistry;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind; port 0 picks any unused port. Loopback vs
    /// public interface is the embedding host's call.
    pub bind_addr: String,
    /// Shared secret every connection must present as its first line
    /// before any request is processed
    pub secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            secret: None,
        }
    }
}

/// State shared between the server handle, the accept loop and the
/// connection workers
pub(crate) struct ServerShared {
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) secret: Option<String>,
    pub(crate) workers: WorkerSet,
    pub(crate) stopping: AtomicBool,
}

/// Live per-connection worker tasks
#[derive(Default)]
pub(crate) struct WorkerSet {
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl WorkerSet {
    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn insert(&self, id: u64, handle: JoinHandle<()>) {
        self.lock().insert(id, handle);
    }

    pub(crate) fn remove(&self, id: u64) -> Option<JoinHandle<()>> {
        self.lock().remove(&id)
    }

    fn active(&self) -> usize {
        self.lock().len()
    }

    fn drain(&self) -> Vec<JoinHandle<()>> {
        self.lock().drain().map(|(_, handle)| handle).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The dispatch server boundary: start accepting, then shut down
pub struct DispatchServer {
    config: ServerConfig,
    shared: Arc<ServerShared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchServer {
    pub fn new(registry: Arc<HandlerRegistry>, config: ServerConfig) -> Self {
        let shared = Arc::new(ServerShared {
            registry,
            secret: config.secret.clone(),
            workers: WorkerSet::default(),
            stopping: AtomicBool::new(false),
        });
        Self {
            config,
            shared,
            accept_task: Mutex::new(None),
        }
    }

    /// Start accepting on the configured address
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = self.config.bind_addr.clone();
        self.start_on(&addr).await
    }

    /// Start accepting on `addr`; returns the concrete bound address
    pub async fn start_on(&self, addr: &str) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let bound = listener.local_addr()?;
        info!("Dispatch server listening on {}", bound);

        let shared = self.shared.clone();
        let task = tokio::spawn(accept_loop(listener, shared));
        *self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);

        Ok(bound)
    }

    /// Number of live connections
    pub fn connections(&self) -> usize {
        self.shared.workers.active()
    }

    /// Full teardown: stop accepting, force every live connection
    /// closed, then notify constructed handlers
    ///
    /// Does not wait for workers; handler shutdown hooks run
    /// synchronously on the calling thread.
    pub fn shutdown(&self) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Dispatch server shutting down");

        // Close the listener first so that beyond this point there are
        // no incoming connections.
        if let Some(task) = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }

        // Force every live connection closed. Aborting a worker
        // cancels it at its pending read and drops the socket, so even
        // a worker stuck waiting for bytes goes down.
        for handle in self.shared.workers.drain() {
            handle.abort();
        }

        self.shared.registry.shutdown_all();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!("Connection from {}", peer);
                let id = shared.workers.allocate();
                let handle = tokio::spawn(worker::run(socket, peer, shared.clone(), id));
                // A worker that exits before this insert leaves a
                // finished handle in the set; aborting it at shutdown
                // is a no-op.
                shared.workers.insert(id, handle);
                // shutdown() can drain the set between the spawn and
                // the insert above. No await separates them, so a
                // re-check here is enough to catch the escapee.
                if shared.stopping.load(Ordering::SeqCst) {
                    if let Some(handle) = shared.workers.remove(id) {
                        handle.abort();
                    }
                    break;
                }
            }
            Err(e) => {
                if shared.stopping.load(Ordering::SeqCst) {
                    break;
                }
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
