//! Aggregate store key naming
//!
//! Dashboards read these keys directly, so names are bit-exact.

use types::category::CategoryLabel;
use types::ids::ProductId;

/// All-time highest sale price.
pub const PRICE_MAX: &str = "ventas:global:precio_max";
/// All-time lowest sale price.
pub const PRICE_MIN: &str = "ventas:global:precio_min";
/// Product → cumulative quantity across all categories.
pub const RANKING_GLOBAL: &str = "ranking:global";
/// Category → cumulative price sum.
pub const STATS_PRICE_SUM: &str = "stats:precio:suma";
/// Category → cumulative quantity sum.
pub const STATS_QUANTITY_SUM: &str = "stats:cantidad:suma";
/// Category → event count.
pub const STATS_COUNT: &str = "stats:conteo";

/// Number of price samples kept per electronics product.
pub const DEFAULT_PRICE_HISTORY_LEN: usize = 20;

/// Product → cumulative quantity within one category.
pub fn ranking(category: CategoryLabel) -> String {
    format!("ranking:{}", category.as_str())
}

/// Report counter for one category.
pub fn report_total(category: CategoryLabel) -> String {
    format!("reportes:total:{}", category.as_str())
}

/// Price history of one electronics product.
pub fn price_history(product_id: &ProductId) -> String {
    format!("history:electronica:{}", product_id.as_str())
}

/// Sorted-set member for one history sample: `<price, 6 decimals>:<unix secs>`.
pub fn history_member(price: f64, timestamp: i64) -> String {
    format!("{price:.6}:{timestamp}")
}

/// Split a history member back into `(price, timestamp)`.
pub fn parse_history_member(member: &str) -> Option<(f64, i64)> {
    let (price, timestamp) = member.rsplit_once(':')?;
    Some((price.parse().ok()?, timestamp.parse().ok()?))
}
