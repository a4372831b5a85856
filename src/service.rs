//! Services looked up inside a test container.
//!
//! A service is reached through the object-safe [`Service`] trait: one
//! `invoke(method, args)` entry point taking and returning JSON values. This
//! is what crosses the bridge wire and what a composite fans out.
//!
//! Typed access sits on top. A [`Capability`] names a service type and its
//! declared method set; each method is a [`Method<C, A, R>`] constant tied to
//! its capability, so calling a method that the capability does not declare
//! does not type-check:
//!
//! ```rust,ignore
//! struct ProbeInvoker;
//!
//! impl Capability for ProbeInvoker {
//!     const TYPE_NAME: &'static str = "probe.Invoker";
//!     const METHODS: &'static [&'static str] = &["call"];
//! }
//!
//! impl ProbeInvoker {
//!     const CALL: Method<Self, (String,), String> = Method::new("call");
//! }
//!
//! let invoker = container.service::<ProbeInvoker>(None, timeout).await?;
//! let outcome = invoker.call(ProbeInvoker::CALL, ("my-test".into(),)).await?;
//! ```

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

// =============================================================================
// Untyped Service
// =============================================================================

/// A service instance living in (or reached through) a container.
#[async_trait]
pub trait Service: Send + Sync {
    /// Type name the service was registered under.
    fn type_name(&self) -> &str;

    /// Invokes `method` with JSON-encoded arguments.
    async fn invoke(&self, method: &str, args: Value) -> Result<Value>;
}

/// Decodes invocation arguments inside a [`Service::invoke`] implementation.
///
/// # Errors
///
/// Returns [`Error::ServiceFailed`] if `args` does not match `A`.
pub fn decode_args<A: DeserializeOwned>(service: &str, method: &str, args: Value) -> Result<A> {
    serde_json::from_value(args).map_err(|e| Error::ServiceFailed {
        service: service.to_string(),
        method: method.to_string(),
        reason: format!("bad arguments: {e}"),
    })
}

// =============================================================================
// Typed Capabilities
// =============================================================================

/// A service type known at compile time.
pub trait Capability: Send + Sync + 'static {
    /// Registry type name.
    const TYPE_NAME: &'static str;

    /// Names of every method the capability declares.
    const METHODS: &'static [&'static str];
}

/// A method of capability `C` taking `A` and returning `R`.
pub struct Method<C, A, R> {
    name: &'static str,
    _marker: PhantomData<fn(C, A) -> R>,
}

impl<C, A, R> Method<C, A, R> {
    /// Declares a method by name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Wire name of the method.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<C, A, R> Clone for Method<C, A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, A, R> Copy for Method<C, A, R> {}

impl<C, A, R> std::fmt::Debug for Method<C, A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Method").field("name", &self.name).finish()
    }
}

/// What to look up in a container's service registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceQuery {
    /// Registry type name.
    pub type_name: String,
    /// Optional filter expression (see [`crate::filter`]).
    pub filter: Option<String>,
    /// Declared method set. Empty means undeclared (any method passes).
    pub methods: Vec<String>,
}

impl ServiceQuery {
    /// Queries a service by type name only.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            filter: None,
            methods: Vec::new(),
        }
    }

    /// Queries the service type of capability `C`.
    #[must_use]
    pub fn of<C: Capability>() -> Self {
        Self {
            type_name: C::TYPE_NAME.to_string(),
            filter: None,
            methods: C::METHODS.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    /// Adds a filter expression.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Returns an error if `method` is outside a non-empty declared set.
    pub(crate) fn check_method(&self, method: &str) -> Result<()> {
        if self.methods.is_empty() || self.methods.iter().any(|m| m == method) {
            Ok(())
        } else {
            Err(Error::UnknownMethod {
                service: self.type_name.clone(),
                method: method.to_string(),
            })
        }
    }
}

/// Typed handle to one service of capability `C`.
pub struct ServiceHandle<C> {
    service: Arc<dyn Service>,
    _capability: PhantomData<fn() -> C>,
}

impl<C: Capability> ServiceHandle<C> {
    /// Wraps an untyped service.
    #[must_use]
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self {
            service,
            _capability: PhantomData,
        }
    }

    /// Calls a declared method.
    ///
    /// # Errors
    ///
    /// Propagates the service's error, or a serialization error if the
    /// arguments or result do not round-trip through JSON.
    pub async fn call<A, R>(&self, method: Method<C, A, R>, args: A) -> Result<R>
    where
        A: Serialize + Send,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args)?;
        let value = self.service.invoke(method.name(), args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The untyped service behind this handle.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Service> {
        &self.service
    }
}

// =============================================================================
// Broadcast
// =============================================================================

/// Service that forwards every invocation to N services in order.
///
/// The result of `invoke` is a JSON array holding each target's result in
/// target order. Invocation is fail-fast: the first failing target aborts
/// the call and later targets are not invoked.
pub struct BroadcastService {
    query: ServiceQuery,
    targets: Vec<Arc<dyn Service>>,
}

impl BroadcastService {
    /// Creates a broadcast over `targets` restricted to `query`'s methods.
    #[must_use]
    pub fn new(query: ServiceQuery, targets: Vec<Arc<dyn Service>>) -> Self {
        Self { query, targets }
    }

    /// Number of services behind this broadcast.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if there are no services behind this broadcast.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Invokes `method` on every target and collects the results in order.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMethod`] if `method` is not declared, otherwise the
    /// first target failure wrapped as [`Error::Composite`].
    pub async fn invoke_all(&self, method: &str, args: Value) -> Result<Vec<Value>> {
        self.query.check_method(method)?;
        let mut results = Vec::with_capacity(self.targets.len());
        for (index, target) in self.targets.iter().enumerate() {
            let value = target
                .invoke(method, args.clone())
                .await
                .map_err(|e| e.at_target(index, method))?;
            results.push(value);
        }
        Ok(results)
    }
}

#[async_trait]
impl Service for BroadcastService {
    fn type_name(&self) -> &str {
        &self.query.type_name
    }

    async fn invoke(&self, method: &str, args: Value) -> Result<Value> {
        Ok(Value::Array(self.invoke_all(method, args).await?))
    }
}

/// Typed multiplexing handle: every call returns one result per target.
pub struct Multiplexed<C> {
    broadcast: BroadcastService,
    _capability: PhantomData<fn() -> C>,
}

impl<C: Capability> Multiplexed<C> {
    /// Wraps per-target services of capability `C`.
    #[must_use]
    pub fn new(targets: Vec<Arc<dyn Service>>) -> Self {
        Self {
            broadcast: BroadcastService::new(ServiceQuery::of::<C>(), targets),
            _capability: PhantomData,
        }
    }

    /// Calls a declared method on every target, in target order.
    ///
    /// # Errors
    ///
    /// The first target failure, wrapped as [`Error::Composite`].
    pub async fn call<A, R>(&self, method: Method<C, A, R>, args: A) -> Result<Vec<R>>
    where
        A: Serialize + Send,
        R: DeserializeOwned,
    {
        let args = serde_json::to_value(args)?;
        self.broadcast
            .invoke_all(method.name(), args)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.broadcast.len()
    }

    /// Returns true if there are no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.broadcast.is_empty()
    }
}
