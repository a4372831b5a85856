//! Test container implementations.
//!
//! Each backend implements [`TestContainer`](crate::container::TestContainer)
//! for one kind of runtime:
//!
//! - [`LocalTestContainer`]: framework in the driver's own process
//! - [`RemoteTestContainer`]: framework in another process, reached through
//!   its bridge
//! - [`CompositeTestContainer`]: any mix of the above, driven as one

pub mod composite;
pub mod local;
pub mod remote;

pub use self::composite::CompositeTestContainer;
pub use self::local::LocalTestContainer;
pub use self::remote::{BridgeClient, RemoteService, RemoteTestContainer};
