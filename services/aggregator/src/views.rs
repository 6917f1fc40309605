//! Dashboard read views
//!
//! Derived figures computed from the stored aggregates. Nothing here writes.
//! Every view serializes to the JSON shape dashboards consume.

use serde::Serialize;
use types::category::CategoryLabel;
use types::ids::ProductId;

use crate::keys;
use crate::store::{AggregateReader, StoreResult};

/// All-time price extremes. Both are None before the first sale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceExtremes {
    pub max: Option<f64>,
    pub min: Option<f64>,
}

/// One ranking entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProduct {
    pub product_id: String,
    pub quantity: f64,
}

/// Running statistics of one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CategoryStats {
    pub label: CategoryLabel,
    pub price_sum: f64,
    pub quantity_sum: f64,
    pub count: u64,
    pub reports: u64,
}

impl CategoryStats {
    pub fn mean_price(&self) -> Option<f64> {
        (self.count > 0).then(|| self.price_sum / self.count as f64)
    }

    pub fn mean_quantity(&self) -> Option<f64> {
        (self.count > 0).then(|| self.quantity_sum / self.count as f64)
    }
}

/// One electronics price sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceSample {
    pub price: f64,
    pub timestamp: i64,
}

pub async fn price_extremes<R>(reader: &R) -> StoreResult<PriceExtremes>
where
    R: AggregateReader + ?Sized,
{
    Ok(PriceExtremes {
        max: reader.get_f64(keys::PRICE_MAX).await?,
        min: reader.get_f64(keys::PRICE_MIN).await?,
    })
}

/// Best-selling products by cumulative quantity, globally or within one
/// category. Ties are ordered by product id, descending.
pub async fn top_products<R>(
    reader: &R,
    scope: Option<CategoryLabel>,
    limit: usize,
) -> StoreResult<Vec<RankedProduct>>
where
    R: AggregateReader + ?Sized,
{
    let key = match scope {
        Some(label) => keys::ranking(label),
        None => keys::RANKING_GLOBAL.to_string(),
    };
    let ranked = reader.ztop(&key, limit).await?;
    Ok(ranked
        .into_iter()
        .map(|(product_id, quantity)| RankedProduct {
            product_id,
            quantity,
        })
        .collect())
}

pub async fn category_stats<R>(reader: &R, label: CategoryLabel) -> StoreResult<CategoryStats>
where
    R: AggregateReader + ?Sized,
{
    let field = label.as_str();
    let price_sum = reader.hget_f64(keys::STATS_PRICE_SUM, field).await?;
    let quantity_sum = reader.hget_f64(keys::STATS_QUANTITY_SUM, field).await?;
    let count = reader.hget_f64(keys::STATS_COUNT, field).await?;
    let reports = reader.get_i64(&keys::report_total(label)).await?;

    Ok(CategoryStats {
        label,
        price_sum: price_sum.unwrap_or(0.0),
        quantity_sum: quantity_sum.unwrap_or(0.0),
        count: count.map_or(0, |c| c.max(0.0) as u64),
        reports: reports.map_or(0, |r| r.max(0) as u64),
    })
}

/// Statistics for every category, in [`CategoryLabel::ALL`] order.
pub async fn all_category_stats<R>(reader: &R) -> StoreResult<Vec<CategoryStats>>
where
    R: AggregateReader + ?Sized,
{
    let mut stats = Vec::with_capacity(CategoryLabel::ALL.len());
    for label in CategoryLabel::ALL {
        stats.push(category_stats(reader, label).await?);
    }
    Ok(stats)
}

/// Retained price samples of one electronics product, oldest first.
/// Members that do not parse are skipped.
pub async fn price_history<R>(reader: &R, product_id: &ProductId) -> StoreResult<Vec<PriceSample>>
where
    R: AggregateReader + ?Sized,
{
    let members = reader.zall(&keys::price_history(product_id)).await?;
    Ok(members
        .iter()
        .filter_map(|(member, _)| keys::parse_history_member(member))
        .map(|(price, timestamp)| PriceSample { price, timestamp })
        .collect())
}
