//! Container options and their usage report.
//!
//! Options are handed to a container when it is built. Each backend consumes
//! the options it understands and passes the rest through untouched; the
//! split is reported as an [`OptionDescription`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Configuration option for a test container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerOption {
    /// Package the runtime delegates to its boot loader.
    BootDelegation {
        /// Package name (e.g. `sun.*`).
        package: String,
    },
    /// Property set on the runtime before start.
    SystemProperty {
        /// Property key.
        key: String,
        /// Property value.
        value: String,
    },
    /// Bundle installed and started when the container starts.
    Provision {
        /// Bundle location.
        location: String,
    },
    /// Backend-specific option no built-in container consumes.
    Custom {
        /// Opaque option text.
        value: String,
    },
}

impl ContainerOption {
    /// Creates a boot delegation option.
    #[must_use]
    pub fn boot_delegation(package: impl Into<String>) -> Self {
        Self::BootDelegation {
            package: package.into(),
        }
    }

    /// Creates a system property option.
    #[must_use]
    pub fn system_property(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::SystemProperty {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a provisioning option.
    #[must_use]
    pub fn provision(location: impl Into<String>) -> Self {
        Self::Provision {
            location: location.into(),
        }
    }

    /// Creates a custom option.
    #[must_use]
    pub fn custom(value: impl Into<String>) -> Self {
        Self::Custom {
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ContainerOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BootDelegation { package } => write!(f, "BootDelegationOption{{package='{package}'}}"),
            Self::SystemProperty { key, value } => write!(f, "SystemPropertyOption{{{key}={value}}}"),
            Self::Provision { location } => write!(f, "ProvisionOption{{{location}}}"),
            Self::Custom { value } => write!(f, "CustomOption{{{value}}}"),
        }
    }
}

/// Which options a container consumed and which it ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDescription {
    /// Options the container acted on.
    pub used: BTreeSet<ContainerOption>,
    /// Options the container passed through unrecognized.
    pub ignored: BTreeSet<ContainerOption>,
}

impl OptionDescription {
    /// Splits `options` into used and ignored using `accepts`.
    pub fn partition<'a, F>(options: impl IntoIterator<Item = &'a ContainerOption>, accepts: F) -> Self
    where
        F: Fn(&ContainerOption) -> bool,
    {
        let mut description = Self::default();
        for option in options {
            if accepts(option) {
                description.used.insert(option.clone());
            } else {
                description.ignored.insert(option.clone());
            }
        }
        description
    }

    /// Folds another description into this one.
    ///
    /// An option used by either side is reported as used, even if the other
    /// side ignored it.
    pub fn merge(&mut self, other: OptionDescription) {
        self.used.extend(other.used);
        self.ignored.extend(other.ignored);
        let used = &self.used;
        self.ignored.retain(|option| !used.contains(option));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_used() {
        let shared = ContainerOption::boot_delegation("sun.*");
        let mut a = OptionDescription::default();
        a.ignored.insert(shared.clone());
        let mut b = OptionDescription::default();
        b.used.insert(shared.clone());

        a.merge(b);
        assert!(a.used.contains(&shared));
        assert!(a.ignored.is_empty());
    }

    #[test]
    fn test_option_serialization() {
        let json = serde_json::to_string(&ContainerOption::provision("mvn:g/a/1.0")).unwrap();
        assert!(json.contains("\"type\":\"provision\""));
        assert!(json.contains("\"location\":\"mvn:g/a/1.0\""));
    }
}
