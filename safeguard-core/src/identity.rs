//! Operation identity.
//!
//! Every registry and the plan cache are keyed by an [`OperationId`], a stable
//! string derived from a callable's declared signature.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Stable key identifying one guarded operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(Arc<str>);

impl OperationId {
    /// Wrap a precomputed key.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Build the key from a qualified name and its parameter types.
    ///
    /// ```
    /// use safeguard_core::OperationId;
    ///
    /// let id = OperationId::from_signature("inventory::Stock::reserve", &["u64", "&str"]);
    /// assert_eq!(id.as_str(), "inventory::Stock::reserve(u64,&str)");
    /// ```
    pub fn from_signature(qualified_name: &str, parameter_types: &[&str]) -> Self {
        let mut key = String::with_capacity(
            qualified_name.len() + parameter_types.iter().map(|p| p.len() + 1).sum::<usize>() + 2,
        );
        key.push_str(qualified_name);
        key.push('(');
        key.push_str(&parameter_types.join(","));
        key.push(')');
        Self(Arc::from(key))
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for OperationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationId {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for OperationId {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}
