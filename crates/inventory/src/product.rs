use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, DomainError, DomainResult, IdGenerator, ProductId};

use crate::batch::Batch;

/// Aggregate root: Product. System of record for its batches.
///
/// Two shapes exist. A *batched* product carries a non-empty `batches` array and
/// its `stock_qty` is the sum of batch quantities. A *legacy* product has no
/// batches and keeps stock in the scalar `stock_qty` / `expiry_date` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub subcategory_id: Option<String>,
    #[serde(default)]
    pub cost_price: Decimal,
    #[serde(default)]
    pub selling_price: Decimal,
    pub stock_qty: i64,
    #[serde(rename = "expiry_date", default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub batches: Vec<Batch>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub version: u64,
    #[serde(rename = "created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Create a product with zero or one initial batch.
    pub fn create(cmd: &CreateProduct, ids: &dyn IdGenerator) -> DomainResult<Self> {
        if cmd.name.trim().is_empty() {
            return Err(DomainError::invalid_argument("product name cannot be empty"));
        }
        if cmd.initial_stock < 0 {
            return Err(DomainError::invalid_argument("initial stock cannot be negative"));
        }
        if cmd.cost_price.is_sign_negative() || cmd.selling_price.is_sign_negative() {
            return Err(DomainError::invalid_argument("prices cannot be negative"));
        }

        let batches = if cmd.initial_stock > 0 {
            vec![Batch::new(
                ids.next_batch_id(),
                cmd.initial_stock,
                cmd.expiry_date,
                cmd.cost_price,
                cmd.selling_price,
                cmd.occurred_at,
            )]
        } else {
            Vec::new()
        };

        Ok(Self {
            product_id: cmd.product_id.clone(),
            name: cmd.name.trim().to_string(),
            barcode: cmd.barcode.clone(),
            category_id: cmd.category_id.clone(),
            brand_id: cmd.brand_id.clone(),
            subcategory_id: cmd.subcategory_id.clone(),
            cost_price: cmd.cost_price,
            selling_price: cmd.selling_price,
            stock_qty: cmd.initial_stock,
            expiry_date: cmd.expiry_date,
            batches,
            deleted: false,
            version: 0,
            created_at: cmd.occurred_at,
            updated_at: cmd.occurred_at,
        })
    }

    /// Legacy product with scalar stock and no batches (pre-migration data).
    pub fn legacy(
        product_id: ProductId,
        name: impl Into<String>,
        stock_qty: i64,
        expiry_date: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            barcode: None,
            category_id: None,
            brand_id: None,
            subcategory_id: None,
            cost_price: Decimal::ZERO,
            selling_price: Decimal::ZERO,
            stock_qty,
            expiry_date,
            batches: Vec::new(),
            deleted: false,
            version: 0,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn is_batched(&self) -> bool {
        !self.batches.is_empty()
    }

    /// Sellable quantity: batch sum when batched, legacy scalar otherwise.
    pub fn total_stock(&self) -> i64 {
        if self.is_batched() {
            self.batches.iter().map(|b| b.stock_qty).sum()
        } else {
            self.stock_qty
        }
    }

    pub fn batch(&self, batch_id: &BatchId) -> Option<&Batch> {
        self.batches.iter().find(|b| &b.batch_id == batch_id)
    }

    /// Fails `NotFound` for soft-deleted products.
    pub fn ensure_active(&self) -> DomainResult<()> {
        if self.deleted {
            return Err(DomainError::not_found(format!(
                "product {} not found",
                self.product_id
            )));
        }
        Ok(())
    }

    /// Verify the batch-sum and no-empty-batch invariants.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if let Some(empty) = self.batches.iter().find(|b| b.is_empty()) {
            return Err(DomainError::failed_precondition(format!(
                "batch {} of product {} has no stock",
                empty.batch_id, self.product_id
            )));
        }
        if self.is_batched() {
            let sum: i64 = self.batches.iter().map(|b| b.stock_qty).sum();
            if sum != self.stock_qty {
                return Err(DomainError::failed_precondition(format!(
                    "product {} stock_qty {} does not match batch total {}",
                    self.product_id, self.stock_qty, sum
                )));
            }
        }
        Ok(())
    }

    /// Drop empty batches and recompute the aggregate total after a batch-array
    /// edit. Removing the last batch leaves a product with zero stock.
    pub(crate) fn settle(&mut self, at: DateTime<Utc>) {
        self.batches.retain(|b| !b.is_empty());
        self.stock_qty = self.batches.iter().map(|b| b.stock_qty).sum();
        self.updated_at = at;
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default)]
    pub subcategory_id: Option<String>,
    #[serde(default)]
    pub cost_price: Decimal,
    #[serde(default)]
    pub selling_price: Decimal,
    #[serde(rename = "stockQty", default)]
    pub initial_stock: i64,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now", skip_serializing)]
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use stockledger_core::SequentialIdGenerator;

    fn create_cmd(initial_stock: i64) -> CreateProduct {
        CreateProduct {
            product_id: ProductId::new("P1"),
            name: "Paracetamol 500mg".to_string(),
            barcode: Some("8901234".to_string()),
            category_id: None,
            brand_id: None,
            subcategory_id: None,
            cost_price: Decimal::new(120, 2),
            selling_price: Decimal::new(200, 2),
            initial_stock,
            expiry_date: None,
            occurred_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn create_with_initial_stock_opens_first_batch() {
        let ids = SequentialIdGenerator::new();
        let product = Product::create(&create_cmd(12), &ids).unwrap();

        assert!(product.is_batched());
        assert_eq!(product.batches.len(), 1);
        assert_eq!(product.batches[0].batch_id.as_str(), "BATCH000001");
        assert_eq!(product.stock_qty, 12);
        assert!(product.check_invariants().is_ok());
    }

    #[test]
    fn create_without_stock_has_no_batches() {
        let ids = SequentialIdGenerator::new();
        let product = Product::create(&create_cmd(0), &ids).unwrap();
        assert!(!product.is_batched());
        assert_eq!(product.total_stock(), 0);
    }

    #[test]
    fn create_rejects_blank_name_and_negative_stock() {
        let ids = SequentialIdGenerator::new();
        let mut cmd = create_cmd(1);
        cmd.name = "  ".to_string();
        assert!(matches!(Product::create(&cmd, &ids), Err(DomainError::InvalidArgument(_))));

        assert!(matches!(
            Product::create(&create_cmd(-1), &ids),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn soft_deleted_product_is_not_found() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut product = Product::legacy(ProductId::new("P9"), "Old", 4, None, at);
        product.deleted = true;
        assert!(matches!(product.ensure_active(), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn legacy_total_uses_scalar() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let product = Product::legacy(ProductId::new("P2"), "Legacy", 5, None, at);
        assert_eq!(product.total_stock(), 5);
        assert!(product.check_invariants().is_ok());
    }
}
