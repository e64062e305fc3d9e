//! Process-wide policy registries keyed by operation.

use crate::identity::OperationId;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Concurrent registry of shared policy instances.
///
/// Registration is first-write-wins: once a policy exists for an operation,
/// later registrations return the existing instance.
pub struct PolicyRegistry<P> {
    entries: DashMap<OperationId, Arc<P>>,
}

impl<P> PolicyRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Get the policy registered for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<P>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Register a policy unless one already exists, returning the stored one.
    pub fn register(&self, name: OperationId, create: impl FnOnce() -> Arc<P>) -> Arc<P> {
        Arc::clone(self.entries.entry(name).or_insert_with(create).value())
    }

    /// Remove a policy. Plans already resolved keep their handle.
    pub fn remove(&self, name: &str) -> Option<Arc<P>> {
        self.entries.remove(name).map(|(_, policy)| policy)
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered operation names.
    pub fn names(&self) -> Vec<OperationId> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<P> Default for PolicyRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for PolicyRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}
