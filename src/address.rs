//! Test addresses.
//!
//! A [`TestAddress`] is the persistent identity of one executable probe.
//! Addresses form a tree: replicating a probe onto another container derives
//! a child address whose [`root`](TestAddress::root) points back at the
//! canonical address it was built from.
//!
//! ```text
//!            root  (caption "MyTest.run")
//!           /    \
//!   [felix] child  child [equinox]
//! ```
//!
//! The parent chain is immutable and shared, so cloning an address is cheap
//! and following `root` always terminates.

use crate::constants::MAX_ADDRESS_DEPTH;
use crate::error::{Error, Result};
use serde_json::Value;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of one executable probe.
///
/// Equality and hashing use only the [`identifier`](Self::identifier).
#[derive(Debug, Clone)]
pub struct TestAddress {
    node: Arc<AddressNode>,
}

#[derive(Debug)]
struct AddressNode {
    identifier: String,
    caption: String,
    arguments: Vec<Value>,
    parent: Option<TestAddress>,
    depth: usize,
}

impl TestAddress {
    /// Creates a new root address with a fresh UUIDv7 identifier.
    #[must_use]
    pub fn new(caption: impl Into<String>) -> Self {
        Self::with_arguments(caption, Vec::new())
    }

    /// Creates a new root address carrying default invocation arguments.
    #[must_use]
    pub fn with_arguments(caption: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            node: Arc::new(AddressNode {
                identifier: uuid::Uuid::now_v7().to_string(),
                caption: caption.into(),
                arguments,
                parent: None,
                depth: 0,
            }),
        }
    }

    /// Derives a child address from this one.
    ///
    /// The child inherits this address's arguments and shares its root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressTooDeep`] if the chain would exceed
    /// [`MAX_ADDRESS_DEPTH`].
    pub fn derive(&self, caption: impl Into<String>) -> Result<Self> {
        let depth = self.node.depth + 1;
        if depth > MAX_ADDRESS_DEPTH {
            return Err(Error::AddressTooDeep {
                identifier: self.node.identifier.clone(),
                max: MAX_ADDRESS_DEPTH,
            });
        }
        Ok(Self {
            node: Arc::new(AddressNode {
                identifier: uuid::Uuid::now_v7().to_string(),
                caption: caption.into(),
                arguments: self.node.arguments.clone(),
                parent: Some(self.clone()),
                depth,
            }),
        })
    }

    /// Persistent identifier of this address.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.node.identifier
    }

    /// Human readable label. Not unique.
    #[must_use]
    pub fn caption(&self) -> &str {
        &self.node.caption
    }

    /// Default invocation arguments.
    #[must_use]
    pub fn arguments(&self) -> &[Value] {
        &self.node.arguments
    }

    /// The address this one was derived from, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&TestAddress> {
        self.node.parent.as_ref()
    }

    /// Topmost address of the derivation tree. A root returns itself.
    #[must_use]
    pub fn root(&self) -> TestAddress {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current.clone()
    }

    /// Number of derivation steps between this address and its root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.node.depth
    }

    /// Returns true if this address was not derived from another.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.node.parent.is_none()
    }
}

impl PartialEq for TestAddress {
    fn eq(&self, other: &Self) -> bool {
        self.node.identifier == other.node.identifier
    }
}

impl Eq for TestAddress {}

impl Hash for TestAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.identifier.hash(state);
    }
}

impl std::fmt::Display for TestAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.node.caption, self.node.identifier)
    }
}
