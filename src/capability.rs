//! Capability registry and dispatch-time policy.
//!
//! A capability is a named permission mapping to a set of concrete
//! operations. The registry is loaded once at startup; the policy is
//! consulted at a single dispatch boundary, which is what makes the
//! restriction enforceable rather than advisory. Workers receive a
//! `TaskPermit` resolved from their declared capability set and cannot
//! widen it.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::{clog_debug, Result};

/// Denial returned when a worker requests an operation outside its
/// permit. Surfaced to callers as a `CapabilityDenied` task failure,
/// distinct from ordinary execution failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("operation '{operation}' denied")]
pub struct Denied {
    pub operation: String,
}

/// Known capabilities and the operations each one grants.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, BTreeSet<String>>,
}

#[derive(Deserialize)]
struct RegistryFile {
    #[serde(default)]
    capabilities: HashMap<String, BTreeSet<String>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability granting the given operations.
    pub fn register(mut self, capability: &str, operations: &[&str]) -> Self {
        self.capabilities.insert(
            capability.to_string(),
            operations.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Whether a capability name is known.
    pub fn contains(&self, capability: &str) -> bool {
        self.capabilities.contains_key(capability)
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Operations granted by one capability, if registered.
    pub fn operations(&self, capability: &str) -> Option<&BTreeSet<String>> {
        self.capabilities.get(capability)
    }

    /// Parse a registry from TOML:
    ///
    /// ```toml
    /// [capabilities]
    /// fs_read = ["read_file", "list_dir"]
    /// network = ["http_get"]
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(input)?;
        Ok(Self {
            capabilities: file.capabilities,
        })
    }

    /// Load a registry file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        clog_debug!("CapabilityRegistry::load path={}", path.display());
        Self::from_toml_str(&fs::read_to_string(path)?)
    }
}

/// Dispatch-time policy: resolves a task's declared capability set into
/// the permit its worker will carry.
#[derive(Debug, Clone)]
pub struct CapabilityPolicy {
    registry: CapabilityRegistry,
}

impl CapabilityPolicy {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Resolve a declared capability set into a permit.
    ///
    /// Unknown capabilities grant nothing; the validator has already
    /// rejected batches that declare them.
    pub fn permit_for(&self, capabilities: &BTreeSet<String>) -> TaskPermit {
        let allowed = capabilities
            .iter()
            .filter_map(|c| self.registry.operations(c))
            .flat_map(|ops| ops.iter().cloned())
            .collect();
        TaskPermit { allowed }
    }
}

/// The operations one task is allowed to exercise.
///
/// Constructed only by the policy; a worker can check or consume it but
/// never extend it.
#[derive(Debug, Clone)]
pub struct TaskPermit {
    allowed: BTreeSet<String>,
}

impl TaskPermit {
    /// Authorize one operation against the permit.
    pub fn authorize(&self, operation: &str) -> std::result::Result<(), Denied> {
        if self.allowed.contains(operation) {
            Ok(())
        } else {
            Err(Denied {
                operation: operation.to_string(),
            })
        }
    }

    /// Whether the permit grants an operation.
    pub fn allows(&self, operation: &str) -> bool {
        self.allowed.contains(operation)
    }

    /// Number of granted operations.
    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}
