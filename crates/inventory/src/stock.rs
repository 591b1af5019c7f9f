//! Flat stock rows: the projected read model and its rendered form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, ProductId, StockRowId};

use crate::product::Product;
use crate::status::StockStatus;

/// A persisted row of the Stocks projection.
///
/// `batch_id == None` is the legacy shape; such rows are orphans once the
/// projection is batch-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRow {
    pub id: StockRowId,
    pub product_id: ProductId,
    pub batch_id: Option<BatchId>,
    pub name: String,
    pub stock_qty: i64,
    pub expiry_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockRow {
    pub fn status(&self) -> StockStatus {
        StockStatus::classify(self.stock_qty)
    }

    /// Missing or blank batch id.
    pub fn is_orphaned(&self) -> bool {
        self.batch_id.as_ref().is_none_or(|b| b.is_empty())
    }
}

/// Mutable fields of one projected row, keyed by `(product_id, batch_id)`.
///
/// `created_at` only applies when the row is first inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedStock {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub name: String,
    pub stock_qty: i64,
    pub expiry_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rendered listing row, with the computed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub product_id: ProductId,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub name: String,
    pub stock_qty: i64,
    #[serde(rename = "expiry_date")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub status: StockStatus,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl From<&StockRow> for StockItem {
    fn from(row: &StockRow) -> Self {
        Self {
            product_id: row.product_id.clone(),
            batch_id: row.batch_id.clone(),
            name: row.name.clone(),
            stock_qty: row.stock_qty,
            expiry_date: row.expiry_date,
            status: row.status(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl Product {
    /// Rows the projection should hold for this product. Batches with a blank
    /// id are skipped; legacy products project nothing.
    pub fn projected_stocks(&self) -> Vec<ProjectedStock> {
        self.batches
            .iter()
            .filter(|b| !b.batch_id.is_empty())
            .map(|b| ProjectedStock {
                product_id: self.product_id.clone(),
                batch_id: b.batch_id.clone(),
                name: self.name.clone(),
                stock_qty: b.stock_qty,
                expiry_date: b.expiry_date,
                created_at: b.created_at,
                updated_at: b.updated_at,
            })
            .collect()
    }

    /// Expand into listing rows: one per batch, or a single legacy row carrying
    /// the product's scalar stock and timestamps.
    pub fn stock_items(&self) -> Vec<StockItem> {
        if !self.is_batched() {
            return vec![StockItem {
                product_id: self.product_id.clone(),
                batch_id: None,
                name: self.name.clone(),
                stock_qty: self.stock_qty,
                expiry_date: self.expiry_date,
                status: StockStatus::classify(self.stock_qty),
                created_at: self.created_at,
                updated_at: self.updated_at,
            }];
        }

        self.batches
            .iter()
            .map(|b| StockItem {
                product_id: self.product_id.clone(),
                batch_id: Some(b.batch_id.clone()),
                name: self.name.clone(),
                stock_qty: b.stock_qty,
                expiry_date: b.expiry_date,
                status: StockStatus::classify(b.stock_qty),
                created_at: b.created_at,
                updated_at: b.updated_at,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use crate::batch::Batch;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn legacy_product_expands_to_single_row_and_projects_nothing() {
        let product = Product::legacy(ProductId::new("P1"), "Legacy", 12, None, at());

        let items = product.stock_items();
        assert_eq!(items.len(), 1);
        assert!(items[0].batch_id.is_none());
        assert_eq!(items[0].status, StockStatus::Average);
        assert!(product.projected_stocks().is_empty());
    }

    #[test]
    fn projection_skips_blank_batch_ids() {
        let mut product = Product::legacy(ProductId::new("P1"), "Batched", 0, None, at());
        product.batches = vec![
            Batch::new(BatchId::new("B1"), 3, None, Decimal::ZERO, Decimal::ZERO, at()),
            Batch::new(BatchId::new(""), 4, None, Decimal::ZERO, Decimal::ZERO, at()),
        ];
        product.stock_qty = 7;

        let rows = product.projected_stocks();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_id.as_str(), "B1");
        assert_eq!(product.stock_items().len(), 2);
    }

    #[test]
    fn orphan_detection_covers_missing_and_blank_ids() {
        let row = |batch_id: Option<&str>| StockRow {
            id: StockRowId::new("STK1"),
            product_id: ProductId::new("P1"),
            batch_id: batch_id.map(BatchId::new),
            name: "x".to_string(),
            stock_qty: 30,
            expiry_date: None,
            created_at: at(),
            updated_at: at(),
        };
        assert!(row(None).is_orphaned());
        assert!(row(Some("  ")).is_orphaned());
        assert!(!row(Some("B1")).is_orphaned());
        assert_eq!(row(Some("B1")).status(), StockStatus::Good);
    }

    #[test]
    fn stock_item_renders_status_string() {
        let product = Product::legacy(ProductId::new("P1"), "Legacy", 3, None, at());
        let json = serde_json::to_value(&product.stock_items()[0]).unwrap();
        assert_eq!(json["status"], "Low");
        assert_eq!(json["stockQty"], 3);
        assert!(json["batchId"].is_null());
    }
}
