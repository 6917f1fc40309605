//! Sale categories
//!
//! The storefront tags every sale with a small integer category code. The
//! aggregation engine folds codes into a closed set of labels; any code it
//! does not know lands in `Unknown` rather than failing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical category of a sale
///
/// Serialized as the store-facing label used in aggregate key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CategoryLabel {
    #[serde(rename = "electronica")]
    Electronics,
    #[serde(rename = "ropa")]
    Clothing,
    #[serde(rename = "hogar")]
    Home,
    #[serde(rename = "belleza")]
    Beauty,
    #[serde(rename = "desconocida")]
    Unknown,
}

impl CategoryLabel {
    /// Every label, named categories first.
    pub const ALL: [CategoryLabel; 5] = [
        CategoryLabel::Electronics,
        CategoryLabel::Clothing,
        CategoryLabel::Home,
        CategoryLabel::Beauty,
        CategoryLabel::Unknown,
    ];

    /// Resolve a wire category code. Total: unmapped codes are `Unknown`.
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => CategoryLabel::Electronics,
            2 => CategoryLabel::Clothing,
            3 => CategoryLabel::Home,
            4 => CategoryLabel::Beauty,
            _ => CategoryLabel::Unknown,
        }
    }

    /// Wire code for named categories; `Unknown` has none.
    pub const fn code(self) -> Option<i64> {
        match self {
            CategoryLabel::Electronics => Some(1),
            CategoryLabel::Clothing => Some(2),
            CategoryLabel::Home => Some(3),
            CategoryLabel::Beauty => Some(4),
            CategoryLabel::Unknown => None,
        }
    }

    /// Label as it appears in store keys and hash fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            CategoryLabel::Electronics => "electronica",
            CategoryLabel::Clothing => "ropa",
            CategoryLabel::Home => "hogar",
            CategoryLabel::Beauty => "belleza",
            CategoryLabel::Unknown => "desconocida",
        }
    }

    /// Parse a store-facing label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == label)
    }

    /// Only electronics sales keep a per-product price history.
    pub const fn tracks_price_history(self) -> bool {
        matches!(self, CategoryLabel::Electronics)
    }
}

impl fmt::Display for CategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category resolver: fixed lookup from wire code to label.
pub fn resolve(code: i64) -> CategoryLabel {
    CategoryLabel::from_code(code)
}
