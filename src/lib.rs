//! # probekit
//!
//! **Test-Container Orchestration for Isolated Probe Runtimes**
//!
//! Integration tests run as *probes* inside one or more isolated runtimes
//! and report back to a driving test process. This crate is the layer in
//! between: the lifecycle contract every runtime implements, a composite
//! that drives several runtimes as one, and a bridge that exposes a runtime
//! living in another process.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Driver                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                   TestContainer Trait                       │    │
//! │  │  start → install → start_bundle → wait_for_state            │    │
//! │  │        → get_service → stop → cleanup                       │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │          │                     │                       │            │
//! │  ┌───────┴────────┐  ┌─────────┴────────┐  ┌───────────┴─────────┐  │
//! │  │ LocalTest-     │  │ RemoteTest-      │  │ CompositeTest-      │  │
//! │  │ Container      │  │ Container        │  │ Container           │  │
//! │  │ (in-process)   │  │ (BridgeClient)   │  │ (fan-out over N)    │  │
//! │  └───────┬────────┘  └─────────┬────────┘  └─────────────────────┘  │
//! └──────────┼─────────────────────┼────────────────────────────────────┘
//!            │                     │ TCP, JSON lines
//!            ▼                     ▼
//!      ┌───────────┐   ┌──────────────────────────────────────────┐
//!      │ Framework │   │ Container process                        │
//!      └───────────┘   │  BridgeRegistry ─► RemoteBundleContext   │
//!                      │                        ─► Framework      │
//!                      └──────────────────────────────────────────┘
//! ```
//!
//! # Fault Classes
//!
//! Every error maps to one [`ErrorKind`]: configuration, container,
//! timeout, remote, or composite. Composite faults carry the zero-based
//! index of the target that failed.
//!
//! # Example
//!
//! ```rust,ignore
//! use probekit::{CompositeTestContainer, LocalTestContainer, RemoteTestContainer};
//! use probekit::{BundleSource, BundleState, TestContainer};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> probekit::Result<()> {
//!     let composite = CompositeTestContainer::new("all", vec![
//!         Arc::new(LocalTestContainer::new("local")),
//!         Arc::new(RemoteTestContainer::new("127.0.0.1:4100".parse().unwrap())),
//!     ]);
//!
//!     composite.start().await?;
//!     let id = composite.install(BundleSource::location("mvn:org.acme/probe/1.0")).await?;
//!     composite.start_bundle(id).await?;
//!     composite.wait_for_state(id, BundleState::Active, Duration::from_secs(5)).await?;
//!     composite.stop().await?;
//!     composite.cleanup().await
//! }
//! ```

pub mod address;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod container;
pub mod containers;
pub mod error;
pub mod filter;
pub mod framework;
pub mod options;
pub mod service;

// Re-exports
pub use address::TestAddress;
pub use bridge::{BridgeActivator, BridgeRegistry, RemoteBundleContext};
pub use config::BridgeConfig;
pub use constants::*;
pub use container::{BundleId, BundleSource, BundleState, TestContainer, TestContainerExt};
pub use containers::{BridgeClient, CompositeTestContainer, LocalTestContainer, RemoteTestContainer};
pub use error::{Error, ErrorKind, Result};
pub use filter::Filter;
pub use framework::{BundleActivator, BundleInfo, Framework};
pub use options::{ContainerOption, OptionDescription};
pub use service::{BroadcastService, Capability, Method, Multiplexed, Service, ServiceHandle, ServiceQuery};
