//! Identifier types for sale entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque product identifier as produced by the storefront
///
/// Never empty. Used verbatim as the sorted-set member in rankings and as
/// the suffix of per-product history keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Create a new ProductId
    ///
    /// # Panics
    /// Panics if the identifier is empty
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        assert!(!s.is_empty(), "ProductId must not be empty");
        Self(s)
    }

    /// Try to create a ProductId, returning None if empty
    pub fn try_new(id: impl Into<String>) -> Option<Self> {
        let s = id.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Get the identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_creation() {
        let id = ProductId::new("P7");
        assert_eq!(id.as_str(), "P7");
        assert_eq!(id.to_string(), "P7");
    }

    #[test]
    fn test_product_id_try_new() {
        assert!(ProductId::try_new("P1").is_some());
        assert!(ProductId::try_new("").is_none());
    }

    #[test]
    #[should_panic(expected = "ProductId must not be empty")]
    fn test_product_id_empty() {
        ProductId::new("");
    }

    #[test]
    fn test_product_id_serialization() {
        let id = ProductId::new("SKU-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"SKU-42\"");
    }
}
