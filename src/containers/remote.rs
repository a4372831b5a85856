//! Remote test container.
//!
//! Driver-side stub for a framework running in another process. Every
//! operation becomes one request to the process's bridge over a fresh TCP
//! connection, bounded by the RPC timeout.
//!
//! # Fault Mapping
//!
//! | Condition | Error |
//! |-----------|-------|
//! | connect refused, I/O failure, malformed reply | [`Error::Remote`] |
//! | RPC timeout elapsed, remote `timeout` code | [`Error::Timeout`] |
//! | `not_bound` / `revoked` | [`Error::NotBound`] / [`Error::Revoked`] |
//! | bundle, service, install or start codes | [`Error::Rejected`] |
//!
//! # Example
//!
//! ```rust,ignore
//! let container = RemoteTestContainer::new("127.0.0.1:4100".parse()?)
//!     .with_rpc_timeout(Duration::from_secs(10))
//!     .with_start_timeout(Duration::from_secs(30));
//!
//! container.start().await?;
//! let id = container.install(BundleSource::location("mvn:org.acme/probe/1.0")).await?;
//! container.start_bundle(id).await?;
//! ```

use crate::bridge::protocol::{Call, ErrorCode, ErrorPayload, Request, Response, ResponseData};
use crate::constants::{BRIDGE_BINDING_NAME, DEFAULT_POLL_INTERVAL, DEFAULT_RPC_TIMEOUT, DEFAULT_START_TIMEOUT};
use crate::container::{BundleId, BundleSource, BundleState, TestContainer, poll_until};
use crate::error::{Error, ErrorKind, Result};
use crate::options::{ContainerOption, OptionDescription};
use crate::service::{Service, ServiceQuery};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

// =============================================================================
// Client
// =============================================================================

/// Client for one bridge binding.
///
/// Each request opens a new connection, sends one line, reads one line,
/// and closes the connection.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    addr: SocketAddr,
    name: String,
    timeout: Duration,
}

impl BridgeClient {
    /// Creates a client for the well-known binding at `addr`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            name: BRIDGE_BINDING_NAME.to_string(),
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    /// Sets the binding name requests are addressed to.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registry address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binding name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.addr, self.name)
    }

    fn remote(&self, reason: impl Into<String>) -> Error {
        Error::Remote {
            endpoint: self.endpoint(),
            reason: reason.into(),
        }
    }

    /// Sends a request and returns the response data.
    async fn send_request(&self, request: Request) -> Result<Option<ResponseData>> {
        let action = request.action();
        let operation = format!("{action} on {}", self.endpoint());

        let stream = timeout(self.timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| Error::timeout(operation.clone(), self.timeout))?
            .map_err(|e| self.remote(format!("connect failed: {e}")))?;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let request_line = Call::new(self.name.clone(), request).to_json_line()?;
        let exchange = async {
            writer.write_all(request_line.as_bytes()).await?;
            writer.flush().await?;
            let mut response_line = String::new();
            reader.read_line(&mut response_line).await?;
            Ok::<_, std::io::Error>(response_line)
        };
        let response_line = timeout(self.timeout, exchange)
            .await
            .map_err(|_| Error::timeout(operation.clone(), self.timeout))?
            .map_err(|e| self.remote(format!("{action} failed: {e}")))?;

        if response_line.is_empty() {
            return Err(self.remote("connection closed before response"));
        }
        let response = Response::from_json(&response_line)
            .map_err(|e| self.remote(format!("malformed response: {e}")))?;

        match response {
            Response::Ok(payload) => Ok(payload.data),
            Response::Error(err) => Err(self.fault(&operation, err)),
        }
    }

    fn fault(&self, operation: &str, err: ErrorPayload) -> Error {
        match err.code {
            ErrorCode::Timeout => Error::timeout(format!("{operation}: {}", err.message), self.timeout),
            ErrorCode::NotBound => Error::NotBound(self.name.clone()),
            ErrorCode::Revoked => Error::Revoked(self.endpoint()),
            ErrorCode::InvalidRequest | ErrorCode::Internal => {
                self.remote(format!("{}: {}", err.code, err.message))
            }
            code => Error::Rejected {
                endpoint: self.endpoint(),
                code: code.to_string(),
                message: err.message,
            },
        }
    }

    fn unexpected(&self, expected: &str, got: Option<ResponseData>) -> Error {
        self.remote(format!("unexpected response: expected {expected}, got {got:?}"))
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Resolves the binding.
    ///
    /// # Errors
    ///
    /// [`Error::NotBound`] if the registry has no such binding.
    pub async fn lookup(&self) -> Result<()> {
        match self.send_request(Request::Lookup).await? {
            Some(ResponseData::Bound { .. }) => Ok(()),
            other => Err(self.unexpected("Bound", other)),
        }
    }

    /// Pings the bridge and returns its version and bundle count.
    ///
    /// # Errors
    ///
    /// Returns error if the bridge is unreachable or replies with an error.
    pub async fn ping(&self) -> Result<(String, usize)> {
        match self.send_request(Request::Ping).await? {
            Some(ResponseData::Pong { version, bundle_count }) => Ok((version, bundle_count)),
            other => Err(self.unexpected("Pong", other)),
        }
    }

    /// Checks if the bridge is reachable.
    pub async fn is_available(&self) -> bool {
        self.ping().await.is_ok()
    }

    /// Installs a bundle.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] if the framework refuses the bundle.
    pub async fn install(&self, source: &BundleSource) -> Result<BundleId> {
        let request = match source {
            BundleSource::Location(location) => Request::Install {
                location: location.clone(),
                content: None,
            },
            BundleSource::Bytes { location, content } => Request::Install {
                location: location.clone(),
                content: Some(STANDARD.encode(content)),
            },
        };
        match self.send_request(request).await? {
            Some(ResponseData::Installed { bundle }) => Ok(BundleId(bundle)),
            other => Err(self.unexpected("Installed", other)),
        }
    }

    /// Starts a bundle.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] for an unknown id or failed start.
    pub async fn start_bundle(&self, id: BundleId) -> Result<()> {
        self.send_request(Request::StartBundle { bundle: id.value() }).await?;
        Ok(())
    }

    /// Reads a bundle's state.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] for an unknown id.
    pub async fn bundle_state(&self, id: BundleId) -> Result<BundleState> {
        match self.send_request(Request::BundleState { bundle: id.value() }).await? {
            Some(ResponseData::State { state }) => Ok(state),
            other => Err(self.unexpected("State", other)),
        }
    }

    /// Sets a bundle's start level.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] for an unknown id or invalid level.
    pub async fn set_start_level(&self, id: BundleId, level: u32) -> Result<()> {
        self.send_request(Request::SetStartLevel {
            bundle: id.value(),
            level,
        })
        .await?;
        Ok(())
    }

    /// Looks up one service; `None` if nothing matches yet.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] for a malformed filter.
    pub async fn get_service(&self, type_name: &str, filter: Option<&str>) -> Result<Option<(u64, String)>> {
        let request = Request::GetService {
            type_name: type_name.to_string(),
            filter: filter.map(str::to_string),
        };
        match self.send_request(request).await {
            Ok(Some(ResponseData::Service { service, type_name })) => Ok(Some((service, type_name))),
            Ok(other) => Err(self.unexpected("Service", other)),
            Err(Error::Rejected { code, .. }) if code == ErrorCode::ServiceNotFound.as_str() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Invokes a method on an exported service.
    ///
    /// # Errors
    ///
    /// [`Error::Rejected`] if the service fails or is no longer exported.
    pub async fn invoke(&self, service: u64, method: &str, args: Value) -> Result<Value> {
        let request = Request::Invoke {
            service,
            method: method.to_string(),
            args,
        };
        match self.send_request(request).await? {
            Some(ResponseData::Value { value }) => Ok(value),
            other => Err(self.unexpected("Value", other)),
        }
    }

    /// Stops the remote framework.
    ///
    /// # Errors
    ///
    /// Returns error if the bridge is unreachable or replies with an error.
    pub async fn stop_framework(&self) -> Result<()> {
        self.send_request(Request::StopFramework).await?;
        Ok(())
    }

    /// Drops every bundle and service in the remote framework.
    ///
    /// # Errors
    ///
    /// Returns error if the bridge is unreachable or replies with an error.
    pub async fn reset(&self) -> Result<()> {
        self.send_request(Request::Reset).await?;
        Ok(())
    }
}

// =============================================================================
// Remote Service Stub
// =============================================================================

/// A service exported by a bridge, invoked over the wire.
pub struct RemoteService {
    client: BridgeClient,
    service: u64,
    query: ServiceQuery,
}

impl RemoteService {
    /// Export id on the bridge.
    #[must_use]
    pub fn export_id(&self) -> u64 {
        self.service
    }
}

#[async_trait]
impl Service for RemoteService {
    fn type_name(&self) -> &str {
        &self.query.type_name
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        self.query.check_method(method)?;
        self.client.invoke(self.service, method, args).await
    }
}

// =============================================================================
// Remote Test Container
// =============================================================================

/// Test container reached through a bridge.
///
/// Only provision options can be applied remotely; every other option is
/// reported as ignored.
pub struct RemoteTestContainer {
    name: String,
    client: BridgeClient,
    start_timeout: Duration,
    options: Vec<ContainerOption>,
}

impl RemoteTestContainer {
    /// Creates a container for the bridge registry at `addr`.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            name: format!("remote:{addr}"),
            client: BridgeClient::new(addr),
            start_timeout: DEFAULT_START_TIMEOUT,
            options: Vec::new(),
        }
    }

    /// Sets the container name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the timeout of each bridge round trip.
    #[must_use]
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    /// Sets how long `start` waits for the bridge to appear.
    #[must_use]
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Sets the container options.
    #[must_use]
    pub fn with_options(mut self, options: Vec<ContainerOption>) -> Self {
        self.options = options;
        self
    }

    /// The client used for every operation.
    #[must_use]
    pub fn client(&self) -> &BridgeClient {
        &self.client
    }

    fn accepts(option: &ContainerOption) -> bool {
        matches!(option, ContainerOption::Provision { .. })
    }
}

#[async_trait]
impl TestContainer for RemoteTestContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn option_description(&self) -> OptionDescription {
        OptionDescription::partition(&self.options, Self::accepts)
    }

    /// Waits for the bridge binding to resolve, then provisions bundles.
    async fn start(&self) -> Result<()> {
        let operation = format!("bridge lookup at {}", self.client.endpoint());
        poll_until(&operation, self.start_timeout, DEFAULT_POLL_INTERVAL, move || async move {
            match self.client.lookup().await {
                Ok(()) => Ok(Some(())),
                Err(e) if matches!(e.kind(), ErrorKind::Remote | ErrorKind::Timeout) => {
                    debug!(container = %self.name, error = %e, "bridge not ready");
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        })
        .await?;

        for option in &self.options {
            if let ContainerOption::Provision { location } = option {
                let id = self.client.install(&BundleSource::location(location.clone())).await?;
                self.client.start_bundle(id).await?;
                debug!(container = %self.name, bundle = %id, location = %location, "provisioned");
            }
        }
        info!(container = %self.name, addr = %self.client.addr(), "remote container started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.client.stop_framework().await
    }

    /// Resets the remote framework. A bridge that is already gone counts as
    /// clean.
    async fn cleanup(&self) -> Result<()> {
        match self.client.reset().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::Remote => {
                debug!(container = %self.name, error = %e, "bridge gone, nothing to clean");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn install(&self, source: BundleSource) -> Result<BundleId> {
        self.client.install(&source).await
    }

    async fn start_bundle(&self, id: BundleId) -> Result<()> {
        self.client.start_bundle(id).await
    }

    async fn bundle_state(&self, id: BundleId) -> Result<BundleState> {
        self.client.bundle_state(id).await
    }

    async fn set_bundle_start_level(&self, id: BundleId, level: u32) -> Result<()> {
        self.client.set_start_level(id, level).await
    }

    async fn get_service(&self, query: &ServiceQuery, timeout: Duration) -> Result<Arc<dyn Service>> {
        let operation = format!("lookup of service '{}' in {}", query.type_name, self.name);
        let filter = query.filter.as_deref();
        let service = poll_until(&operation, timeout, DEFAULT_POLL_INTERVAL, move || async move {
            self.client.get_service(&query.type_name, filter).await
        })
        .await?;

        let (service, _) = service;
        Ok(Arc::new(RemoteService {
            client: self.client.clone(),
            service,
            query: query.clone(),
        }))
    }
}
