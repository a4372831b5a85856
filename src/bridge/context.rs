//! The exported bridge object.
//!
//! [`RemoteBundleContext`] wraps one [`Framework`] and executes wire
//! requests against it. Calls are serialized through an async gate; the
//! framework is never entered by two bridge calls at once.

use super::protocol::{ErrorCode, Request, Response, ResponseData};
use crate::constants::MAX_BUNDLE_SIZE;
use crate::container::{BundleId, BundleSource};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::framework::Framework;
use crate::service::Service;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// An object a registry can bind and route calls to.
#[async_trait]
pub trait RemoteObject: Send + Sync {
    /// Executes one request.
    async fn dispatch(&self, request: Request) -> Response;

    /// Returns false once the export has been revoked.
    fn is_exported(&self) -> bool;
}

#[derive(Default)]
struct ExportTable {
    next_id: u64,
    services: HashMap<u64, Arc<dyn Service>>,
}

/// Bridge over a framework's bundle and service operations.
pub struct RemoteBundleContext {
    framework: Arc<Framework>,
    exported: AtomicBool,
    gate: AsyncMutex<()>,
    exports: Mutex<ExportTable>,
}

impl RemoteBundleContext {
    /// Creates an exported bridge over `framework`.
    #[must_use]
    pub fn new(framework: Arc<Framework>) -> Self {
        Self {
            framework,
            exported: AtomicBool::new(true),
            gate: AsyncMutex::new(()),
            exports: Mutex::new(ExportTable {
                next_id: 1,
                services: HashMap::new(),
            }),
        }
    }

    /// Revokes the export. Later calls are answered with `revoked`.
    pub fn unexport(&self) {
        if self.exported.swap(false, Ordering::SeqCst) {
            self.table().services.clear();
            debug!(framework = %self.framework.name(), "bridge unexported");
        }
    }

    /// Number of services currently exported.
    #[must_use]
    pub fn exported_services(&self) -> usize {
        self.table().services.len()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, ExportTable> {
        self.exports
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Exports `service`, reusing the id of an earlier export of the same
    /// instance.
    fn export(&self, service: Arc<dyn Service>) -> u64 {
        let mut table = self.table();
        if let Some((&id, _)) = table.services.iter().find(|(_, s)| Arc::ptr_eq(s, &service)) {
            return id;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.services.insert(id, service);
        id
    }

    fn exported_service(&self, id: u64) -> Option<Arc<dyn Service>> {
        self.table().services.get(&id).cloned()
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let framework = &self.framework;
        match request {
            Request::Lookup | Request::Ping => Ok(Response::ok_with_data(ResponseData::Pong {
                version: env!("CARGO_PKG_VERSION").to_string(),
                bundle_count: framework.bundles().len(),
            })),
            Request::Install { location, content } => {
                let source = match content {
                    None => BundleSource::Location(location),
                    Some(encoded) => decode_bundle(location, &encoded)?,
                };
                let id = framework.install(&source)?;
                Ok(Response::ok_with_data(ResponseData::Installed { bundle: id.value() }))
            }
            Request::StartBundle { bundle } => {
                framework.start_bundle(BundleId(bundle))?;
                Ok(Response::ok())
            }
            Request::BundleState { bundle } => {
                let state = framework.bundle_state(BundleId(bundle))?;
                Ok(Response::ok_with_data(ResponseData::State { state }))
            }
            Request::SetStartLevel { bundle, level } => {
                framework.set_start_level(BundleId(bundle), level)?;
                Ok(Response::ok())
            }
            Request::GetService { type_name, filter } => {
                let filter = filter.as_deref().map(Filter::parse).transpose()?;
                let Some(service) = framework.find_service(&type_name, filter.as_ref()) else {
                    return Ok(Response::error(
                        ErrorCode::ServiceNotFound,
                        format!("no service of type '{type_name}' registered"),
                    ));
                };
                let service = self.export(service);
                Ok(Response::ok_with_data(ResponseData::Service { service, type_name }))
            }
            Request::Invoke {
                service,
                method,
                args,
            } => {
                let Some(target) = self.exported_service(service) else {
                    return Ok(Response::error(
                        ErrorCode::ServiceNotFound,
                        format!("service export {service} not found"),
                    ));
                };
                let value = target.invoke(&method, args).await?;
                Ok(Response::ok_with_data(ResponseData::Value { value }))
            }
            Request::StopFramework => {
                framework.stop()?;
                Ok(Response::ok())
            }
            Request::Reset => {
                framework.reset();
                self.table().services.clear();
                Ok(Response::ok())
            }
        }
    }
}

#[async_trait]
impl RemoteObject for RemoteBundleContext {
    async fn dispatch(&self, request: Request) -> Response {
        if !self.is_exported() {
            return Response::error(ErrorCode::Revoked, "bridge has been unexported");
        }
        let _gate = self.gate.lock().await;
        let action = request.action();
        match self.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(action, error = %e, "bridge call failed");
                Response::from_error(&e)
            }
        }
    }

    fn is_exported(&self) -> bool {
        self.exported.load(Ordering::SeqCst)
    }
}

fn decode_bundle(location: String, encoded: &str) -> Result<BundleSource> {
    // base64 grows 3 bytes into 4
    if encoded.len() / 4 * 3 > MAX_BUNDLE_SIZE + 3 {
        return Err(Error::InstallFailed {
            location,
            reason: format!("bundle exceeds {MAX_BUNDLE_SIZE} bytes"),
        });
    }
    match STANDARD.decode(encoded) {
        Ok(content) => Ok(BundleSource::Bytes { location, content }),
        Err(e) => Err(Error::InstallFailed {
            location,
            reason: format!("invalid base64 payload: {e}"),
        }),
    }
}
