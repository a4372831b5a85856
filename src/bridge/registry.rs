//! Name registry serving bridge calls on a TCP port.
//!
//! A [`BridgeRegistry`] is created on a port, never attached to: creation
//! fails if the port is taken. It owns the accept loop and every connection
//! task, so [`shutdown`](BridgeRegistry::shutdown) can drain and join them
//! all before returning.
//!
//! # Connection Handling
//!
//! ```text
//! accept ──► limit check ──► spawn into JoinSet
//!                               │
//!                               ▼
//!            read one line (bounded, timed) ──► route by name ──► reply
//! ```

use super::context::RemoteObject;
use super::protocol::{Call, ErrorCode, Request, Response, ResponseData};
use crate::constants::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_RPC_TIMEOUT, MAX_BRIDGE_CONNECTIONS, MAX_REQUEST_LINE_LEN};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

type Bindings = Arc<RwLock<HashMap<String, Arc<dyn RemoteObject>>>>;

/// Registry of bridge bindings listening on one port.
pub struct BridgeRegistry {
    local_addr: SocketAddr,
    bindings: Bindings,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeRegistry {
    /// Creates a registry listening on `addr`.
    ///
    /// Port 0 picks an ephemeral port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// [`Error::RegistryBindFailed`] if the port cannot be bound.
    pub async fn create(addr: SocketAddr) -> Result<Self> {
        Self::create_with_drain(addr, DEFAULT_DRAIN_TIMEOUT).await
    }

    /// Creates a registry whose shutdown lets in-flight calls run for up to
    /// `drain_timeout` before aborting them.
    ///
    /// # Errors
    ///
    /// [`Error::RegistryBindFailed`] if the port cannot be bound.
    pub async fn create_with_drain(addr: SocketAddr, drain_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::RegistryBindFailed {
                port: addr.port(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "bridge registry listening");

        let bindings: Bindings = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&bindings),
            shutdown_rx,
            drain_timeout,
        ));

        Ok(Self {
            local_addr,
            bindings,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Address the registry is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Binds `object` under `name`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyBound`] if the name is taken.
    pub fn bind(&self, name: &str, object: Arc<dyn RemoteObject>) -> Result<()> {
        let mut bindings = write_bindings(&self.bindings);
        if bindings.contains_key(name) {
            return Err(Error::AlreadyBound(name.to_string()));
        }
        bindings.insert(name.to_string(), object);
        info!(name, addr = %self.local_addr, "bridge bound");
        Ok(())
    }

    /// Removes the binding under `name` and returns it.
    ///
    /// # Errors
    ///
    /// [`Error::NotBound`] if nothing is bound under `name`.
    pub fn unbind(&self, name: &str) -> Result<Arc<dyn RemoteObject>> {
        let removed = write_bindings(&self.bindings).remove(name);
        match removed {
            Some(object) => {
                info!(name, addr = %self.local_addr, "bridge unbound");
                Ok(object)
            }
            None => Err(Error::NotBound(name.to_string())),
        }
    }

    /// Returns the object bound under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn RemoteObject>> {
        read_bindings(&self.bindings).get(name).cloned()
    }

    /// Names currently bound, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = read_bindings(&self.bindings).keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops accepting, drains in-flight calls, and joins every task.
    ///
    /// Idempotent: later calls return immediately.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self
            .accept_task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "registry accept task failed");
            }
            info!(addr = %self.local_addr, "bridge registry closed");
        }
    }
}

impl Drop for BridgeRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn read_bindings(bindings: &Bindings) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn RemoteObject>>> {
    bindings.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write_bindings(bindings: &Bindings) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn RemoteObject>>> {
    bindings.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// =============================================================================
// Accept Loop
// =============================================================================

async fn accept_loop(
    listener: TcpListener,
    bindings: Bindings,
    mut shutdown_rx: watch::Receiver<bool>,
    drain_timeout: Duration,
) {
    let connection_count = Arc::new(AtomicUsize::new(0));
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let current = connection_count.load(Ordering::Relaxed);
                        if current >= MAX_BRIDGE_CONNECTIONS {
                            warn!(addr = %addr, max = MAX_BRIDGE_CONNECTIONS, "connection rejected: limit reached");
                            continue;
                        }

                        debug!(addr = %addr, "bridge connection accepted");
                        let bindings = Arc::clone(&bindings);
                        let counter = Arc::clone(&connection_count);
                        counter.fetch_add(1, Ordering::Relaxed);

                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, &bindings).await {
                                debug!(error = %e, "bridge connection error");
                            }
                            counter.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                    }
                }
            }
        }

        while connections.try_join_next().is_some() {}
    }

    drop(listener);
    let in_flight = connections.len();
    if in_flight > 0 {
        debug!(in_flight, "draining bridge connections");
        let drained = tokio::time::timeout(drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), ?drain_timeout, "drain timed out, aborting calls");
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

/// Handles a single bridge connection.
async fn handle_connection(stream: TcpStream, bindings: &Bindings) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    let limit = u64::try_from(MAX_REQUEST_LINE_LEN).unwrap_or(u64::MAX);
    let read_result = tokio::time::timeout(
        DEFAULT_RPC_TIMEOUT,
        (&mut reader).take(limit + 1).read_line(&mut line),
    )
    .await;

    let response = match read_result {
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(n)) if n > MAX_REQUEST_LINE_LEN => {
            Response::error(ErrorCode::InvalidRequest, "request too large")
        }
        Ok(Ok(_)) => match Call::from_json(&line) {
            Ok(call) => route(call, bindings).await,
            Err(e) => Response::error(ErrorCode::InvalidRequest, format!("JSON parse error: {e}")),
        },
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
            Response::error(ErrorCode::InvalidRequest, "request is not valid UTF-8")
        }
        Ok(Err(e)) => Response::error(ErrorCode::Internal, format!("read error: {e}")),
        Err(_) => Response::error(ErrorCode::Timeout, "request timed out"),
    };

    let response_line = response.to_json_line()?;
    writer.write_all(response_line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

async fn route(call: Call, bindings: &Bindings) -> Response {
    let object = read_bindings(bindings).get(&call.name).cloned();
    let Some(object) = object else {
        return Response::error(ErrorCode::NotBound, format!("no binding named '{}'", call.name));
    };
    if !object.is_exported() {
        return Response::error(ErrorCode::Revoked, format!("binding '{}' has been unexported", call.name));
    }
    match call.request {
        Request::Lookup => Response::ok_with_data(ResponseData::Bound { name: call.name }),
        request => object.dispatch(request).await,
    }
}
