//! Generic component identifier.
//!
//! Routes and the queue consumer are identified by a `ComponentKey` in logs,
//! metrics labels and configuration maps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a running component.
///
/// A transparent wrapper around a `String`, so it serializes as a plain map key
/// in YAML configuration.
#[derive(Debug, Clone, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentKey(String);

impl ComponentKey {
    /// Create a new component key from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying identifier string.
    pub fn id(&self) -> &str {
        &self.0
    }

    /// Derive a key from a directory path.
    ///
    /// Uses the last non-empty path segment, or `"default"` when there is none.
    ///
    /// # Examples
    ///
    /// ```
    /// use conveyor_core::config::ComponentKey;
    ///
    /// assert_eq!(ComponentKey::from_path("input/orders").id(), "orders");
    /// assert_eq!(ComponentKey::from_path("/var/spool/orders/").id(), "orders");
    /// assert_eq!(ComponentKey::from_path("").id(), "default");
    /// ```
    pub fn from_path(path: &str) -> Self {
        let key = path
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or("default");

        Self(key.to_string())
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ComponentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let key = ComponentKey::new("orders");
        assert_eq!(key.id(), "orders");
        assert_eq!(key.to_string(), "orders");
    }

    #[test]
    fn test_from_path_relative() {
        assert_eq!(ComponentKey::from_path("input/orders").id(), "orders");
    }

    #[test]
    fn test_from_path_trailing_separator() {
        assert_eq!(ComponentKey::from_path("input/orders//").id(), "orders");
    }

    #[test]
    fn test_from_path_windows_separator() {
        assert_eq!(ComponentKey::from_path(r"C:\spool\orders").id(), "orders");
    }

    #[test]
    fn test_from_path_root_only() {
        assert_eq!(ComponentKey::from_path("/").id(), "default");
    }

    #[test]
    fn test_yaml_map_key() {
        let map: std::collections::BTreeMap<ComponentKey, u32> =
            serde_yaml::from_str("orders: 1\nreturns: 2").unwrap();
        let keys: Vec<_> = map.keys().map(ComponentKey::id).collect();
        assert_eq!(keys, vec!["orders", "returns"]);
    }
}
