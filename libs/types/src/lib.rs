//! Types library for the sales stream aggregation engine
//!
//! Provides the sale-domain types shared by the aggregation service:
//! the decoded `SaleEvent`, its identifier and numeric newtypes, the
//! closed category taxonomy, and the decoding error taxonomy.
//!
//! # Modules
//! - `ids`: Product identifiers
//! - `numeric`: Decimal price and integer quantity newtypes
//! - `category`: Category codes and canonical labels
//! - `sale`: Wire decoding of sale events
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod category;
pub mod sale;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::category::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::sale::*;
}
