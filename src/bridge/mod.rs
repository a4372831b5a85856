//! # Remote Bridge
//!
//! Exposes a framework living in an isolated container process to the
//! driver process.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────────────────┐
//! │ Driver                   │        │ Container process                    │
//! │  RemoteTestContainer     │        │  BridgeActivator                     │
//! │  ┌────────────────┐      │  TCP   │  ┌────────────────────────────────┐  │
//! │  │ BridgeClient   │──────┼───────►│  │ BridgeRegistry (port)          │  │
//! │  └────────────────┘      │ JSON   │  │  "probekit.bridge...." ─┐      │  │
//! │                          │ lines  │  └─────────────────────────┼──────┘  │
//! └──────────────────────────┘        │                            ▼         │
//!                                     │  RemoteBundleContext ──► Framework   │
//!                                     └──────────────────────────────────────┘
//! ```
//!
//! ## Lifetime
//!
//! The activator creates the registry, binds exactly one context under
//! [`BRIDGE_BINDING_NAME`](crate::constants::BRIDGE_BINDING_NAME), and keeps
//! both alive until `stop`. Stopping unbinds the name, revokes the export,
//! lets in-flight calls drain for the configured timeout, aborts what is
//! left, and joins every task before returning.
//!
//! ## Modules
//!
//! - [`protocol`]: request/response types
//! - [`context`]: the exported object dispatching to the framework
//! - [`registry`]: name registry and TCP server
//! - [`activator`]: publish/withdraw lifecycle

pub mod activator;
pub mod context;
pub mod protocol;
pub mod registry;

pub use activator::BridgeActivator;
pub use context::{RemoteBundleContext, RemoteObject};
pub use protocol::{Call, ErrorCode, ErrorPayload, OkPayload, Request, Response, ResponseData};
pub use registry::BridgeRegistry;
