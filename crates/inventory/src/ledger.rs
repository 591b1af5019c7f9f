//! Batch ledger rules.
//!
//! Every operation is pure: it validates against `&self` and returns the next
//! product state, so a rejected command leaves the caller's copy untouched.
//! Persisting the result (and projecting it) is the infra layer's job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, DomainError, DomainResult, IdGenerator, ProductId};

use crate::batch::Batch;
use crate::product::Product;

/// Command: AddStock (match-or-create a batch by expiry day).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddStock {
    pub product_id: ProductId,
    #[serde(rename = "stockQty")]
    pub quantity: i64,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cost_price: Option<Decimal>,
    #[serde(default)]
    pub selling_price: Option<Decimal>,
    #[serde(default = "Utc::now", skip_serializing)]
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditBatchStock (absolute quantity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditBatchStock {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    #[serde(rename = "stockQty")]
    pub new_quantity: i64,
    #[serde(default = "Utc::now", skip_serializing)]
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditBatchDetails. Quantity is never touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditBatchDetails {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cost_price: Option<Decimal>,
    #[serde(default)]
    pub selling_price: Option<Decimal>,
    #[serde(default = "Utc::now", skip_serializing)]
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveStockFromBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveStockFromBatch {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    #[serde(rename = "quantityToRemove")]
    pub quantity: i64,
    #[serde(default = "Utc::now", skip_serializing)]
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBatch {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    #[serde(default = "Utc::now", skip_serializing)]
    pub occurred_at: DateTime<Utc>,
}

/// Only strictly positive prices overwrite stored ones.
fn positive(price: Option<Decimal>) -> Option<Decimal> {
    price.filter(|p| *p > Decimal::ZERO)
}

impl Product {
    fn batch_index(&self, batch_id: &BatchId) -> DomainResult<usize> {
        self.batches
            .iter()
            .position(|b| &b.batch_id == batch_id)
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "batch {batch_id} not found on product {}",
                    self.product_id
                ))
            })
    }

    /// Convert a legacy product to the batched shape. Scalar stock becomes the
    /// first batch; a legacy product without stock simply gets no batch.
    fn into_batched(mut self, ids: &dyn IdGenerator, at: DateTime<Utc>) -> Self {
        if !self.is_batched() && self.stock_qty > 0 {
            self.batches.push(Batch::new(
                ids.next_batch_id(),
                self.stock_qty,
                self.expiry_date,
                self.cost_price,
                self.selling_price,
                at,
            ));
        }
        self
    }

    /// Add stock to the batch sharing the requested expiry day, or open a new one.
    ///
    /// Returns the next product state and the id of the batch that received the
    /// quantity.
    pub fn add_stock(
        &self,
        cmd: &AddStock,
        ids: &dyn IdGenerator,
    ) -> DomainResult<(Product, BatchId)> {
        self.ensure_active()?;
        if cmd.quantity <= 0 {
            return Err(DomainError::invalid_argument(format!(
                "quantity must be positive, got {}",
                cmd.quantity
            )));
        }

        let mut next = self.clone().into_batched(ids, cmd.occurred_at);
        let cost = positive(cmd.cost_price);
        let selling = positive(cmd.selling_price);

        let receiving = match next
            .batches
            .iter_mut()
            .find(|b| b.matches_expiry(cmd.expiry_date))
        {
            Some(batch) => {
                batch.stock_qty += cmd.quantity;
                if let Some(cost) = cost {
                    batch.cost_price = cost;
                }
                if let Some(selling) = selling {
                    batch.selling_price = selling;
                }
                batch.updated_at = cmd.occurred_at;
                batch.batch_id.clone()
            }
            None => {
                let batch = Batch::new(
                    ids.next_batch_id(),
                    cmd.quantity,
                    cmd.expiry_date,
                    cost.unwrap_or(self.cost_price),
                    selling.unwrap_or(self.selling_price),
                    cmd.occurred_at,
                );
                let id = batch.batch_id.clone();
                next.batches.push(batch);
                id
            }
        };

        next.settle(cmd.occurred_at);
        Ok((next, receiving))
    }

    /// Set a batch's quantity absolutely. Zero prunes the batch.
    pub fn edit_batch_stock(&self, cmd: &EditBatchStock) -> DomainResult<Product> {
        self.ensure_active()?;
        if cmd.new_quantity < 0 {
            return Err(DomainError::invalid_argument(format!(
                "quantity cannot be negative, got {}",
                cmd.new_quantity
            )));
        }
        let idx = self.batch_index(&cmd.batch_id)?;

        let mut next = self.clone();
        let batch = &mut next.batches[idx];
        batch.stock_qty = cmd.new_quantity;
        batch.updated_at = cmd.occurred_at;

        next.settle(cmd.occurred_at);
        Ok(next)
    }

    /// Overwrite the supplied batch attributes.
    pub fn edit_batch_details(&self, cmd: &EditBatchDetails) -> DomainResult<Product> {
        self.ensure_active()?;
        let idx = self.batch_index(&cmd.batch_id)?;

        let mut next = self.clone();
        let batch = &mut next.batches[idx];
        if let Some(expiry) = cmd.expiry_date {
            batch.expiry_date = Some(expiry);
        }
        if let Some(cost) = positive(cmd.cost_price) {
            batch.cost_price = cost;
        }
        if let Some(selling) = positive(cmd.selling_price) {
            batch.selling_price = selling;
        }
        batch.updated_at = cmd.occurred_at;

        next.settle(cmd.occurred_at);
        Ok(next)
    }

    pub fn remove_stock_from_batch(&self, cmd: &RemoveStockFromBatch) -> DomainResult<Product> {
        self.ensure_active()?;
        if cmd.quantity <= 0 {
            return Err(DomainError::invalid_argument(format!(
                "quantity to remove must be positive, got {}",
                cmd.quantity
            )));
        }
        let idx = self.batch_index(&cmd.batch_id)?;
        let available = self.batches[idx].stock_qty;
        if cmd.quantity > available {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }

        let mut next = self.clone();
        let batch = &mut next.batches[idx];
        batch.stock_qty -= cmd.quantity;
        batch.updated_at = cmd.occurred_at;

        next.settle(cmd.occurred_at);
        Ok(next)
    }

    /// Remove a batch regardless of its remaining quantity.
    pub fn delete_batch(&self, cmd: &DeleteBatch) -> DomainResult<Product> {
        self.ensure_active()?;
        let idx = self.batch_index(&cmd.batch_id)?;

        let mut next = self.clone();
        next.batches.remove(idx);
        next.settle(cmd.occurred_at);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use stockledger_core::SequentialIdGenerator;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn add(product: &Product, qty: i64, expiry: Option<DateTime<Utc>>) -> AddStock {
        AddStock {
            product_id: product.product_id.clone(),
            quantity: qty,
            expiry_date: expiry,
            cost_price: None,
            selling_price: None,
            occurred_at: t0(),
        }
    }

    fn legacy(qty: i64) -> Product {
        Product::legacy(ProductId::new("P1"), "Legacy", qty, None, t0())
    }

    #[test]
    fn legacy_product_is_converted_before_adding() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(5);

        let (next, batch_id) = product
            .add_stock(&add(&product, 3, Some(day(2025, 1, 1))), &ids)
            .unwrap();

        assert_eq!(next.batches.len(), 2);
        assert_eq!(next.batches[0].stock_qty, 5);
        assert_eq!(next.batches[1].stock_qty, 3);
        assert_eq!(next.batches[1].batch_id, batch_id);
        assert_eq!(next.stock_qty, 8);
        assert!(next.check_invariants().is_ok());
    }

    #[test]
    fn add_with_legacy_expiry_merges_into_converted_batch() {
        let ids = SequentialIdGenerator::new();
        let mut product = legacy(5);
        product.expiry_date = Some(day(2025, 1, 1));

        let at_noon = day(2025, 1, 1) + Duration::hours(12);
        let (next, _) = product.add_stock(&add(&product, 3, Some(at_noon)), &ids).unwrap();

        assert_eq!(next.batches.len(), 1);
        assert_eq!(next.stock_qty, 8);
    }

    #[test]
    fn add_merges_same_day_and_overwrites_only_positive_prices() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(0);
        let (product, first) = product.add_stock(&add(&product, 4, None), &ids).unwrap();
        let original_selling = product.batches[0].selling_price;

        let mut cmd = add(&product, 6, None);
        cmd.cost_price = Some(Decimal::new(250, 2));
        cmd.selling_price = Some(Decimal::ZERO);
        let (next, receiving) = product.add_stock(&cmd, &ids).unwrap();

        assert_eq!(receiving, first);
        assert_eq!(next.batches.len(), 1);
        assert_eq!(next.batches[0].stock_qty, 10);
        assert_eq!(next.batches[0].cost_price, Decimal::new(250, 2));
        assert_eq!(next.batches[0].selling_price, original_selling);
    }

    #[test]
    fn add_rejects_non_positive_quantity_and_deleted_products() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(5);
        assert!(matches!(
            product.add_stock(&add(&product, 0, None), &ids),
            Err(DomainError::InvalidArgument(_))
        ));

        let mut deleted = legacy(5);
        deleted.deleted = true;
        assert!(matches!(
            deleted.add_stock(&add(&deleted, 1, None), &ids),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn edit_batch_stock_to_zero_prunes_the_batch() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(0);
        let (product, a) = product.add_stock(&add(&product, 4, None), &ids).unwrap();
        let (product, b) = product
            .add_stock(&add(&product, 7, Some(day(2025, 2, 1))), &ids)
            .unwrap();

        let next = product
            .edit_batch_stock(&EditBatchStock {
                product_id: product.product_id.clone(),
                batch_id: a.clone(),
                new_quantity: 0,
                occurred_at: t0(),
            })
            .unwrap();

        assert!(next.batch(&a).is_none());
        assert_eq!(next.batch(&b).unwrap().stock_qty, 7);
        assert_eq!(next.stock_qty, 7);
    }

    #[test]
    fn edit_batch_stock_validates_inputs() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(0);
        let (product, a) = product.add_stock(&add(&product, 4, None), &ids).unwrap();

        let negative = EditBatchStock {
            product_id: product.product_id.clone(),
            batch_id: a,
            new_quantity: -1,
            occurred_at: t0(),
        };
        assert!(matches!(
            product.edit_batch_stock(&negative),
            Err(DomainError::InvalidArgument(_))
        ));

        let missing = EditBatchStock {
            batch_id: BatchId::new("NOPE"),
            new_quantity: 1,
            ..negative
        };
        assert!(matches!(
            product.edit_batch_stock(&missing),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn edit_details_keeps_quantity() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(0);
        let (product, a) = product.add_stock(&add(&product, 4, None), &ids).unwrap();

        let next = product
            .edit_batch_details(&EditBatchDetails {
                product_id: product.product_id.clone(),
                batch_id: a.clone(),
                expiry_date: Some(day(2026, 3, 3)),
                cost_price: Some(Decimal::new(99, 0)),
                selling_price: None,
                occurred_at: t0(),
            })
            .unwrap();

        let batch = next.batch(&a).unwrap();
        assert_eq!(batch.stock_qty, 4);
        assert_eq!(batch.expiry_date, Some(day(2026, 3, 3)));
        assert_eq!(batch.cost_price, Decimal::new(99, 0));
        assert_eq!(batch.selling_price, product.batch(&a).unwrap().selling_price);
    }

    #[test]
    fn over_removal_fails_and_leaves_state_unchanged() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(0);
        let (product, a) = product.add_stock(&add(&product, 4, None), &ids).unwrap();
        let before = product.clone();

        let result = product.remove_stock_from_batch(&RemoveStockFromBatch {
            product_id: product.product_id.clone(),
            batch_id: a,
            quantity: 5,
            occurred_at: t0(),
        });

        assert!(matches!(result, Err(DomainError::FailedPrecondition(_))));
        assert_eq!(product, before);
    }

    #[test]
    fn removing_everything_prunes_and_delete_is_unconditional() {
        let ids = SequentialIdGenerator::new();
        let product = legacy(0);
        let (product, a) = product.add_stock(&add(&product, 4, None), &ids).unwrap();
        let (product, b) = product
            .add_stock(&add(&product, 9, Some(day(2025, 5, 5))), &ids)
            .unwrap();

        let product = product
            .remove_stock_from_batch(&RemoveStockFromBatch {
                product_id: product.product_id.clone(),
                batch_id: a.clone(),
                quantity: 4,
                occurred_at: t0(),
            })
            .unwrap();
        assert!(product.batch(&a).is_none());

        let product = product
            .delete_batch(&DeleteBatch {
                product_id: product.product_id.clone(),
                batch_id: b,
                occurred_at: t0(),
            })
            .unwrap();
        assert!(product.batches.is_empty());
        assert_eq!(product.stock_qty, 0);
    }

    #[test]
    fn add_stock_request_uses_wire_names() {
        let json = r#"{"productId":"P1","stockQty":3,"expiryDate":"2025-01-01T00:00:00Z","costPrice":"1.50"}"#;
        let cmd: AddStock = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.quantity, 3);
        assert_eq!(cmd.cost_price, Some(Decimal::new(150, 2)));
        assert_eq!(cmd.expiry_date, Some(day(2025, 1, 1)));

        let remove = r#"{"productId":"P1","batchId":"B1","quantityToRemove":2}"#;
        let cmd: RemoveStockFromBatch = serde_json::from_str(remove).unwrap();
        assert_eq!(cmd.quantity, 2);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { qty: i64, expiry_day: Option<u8> },
        Edit { pick: usize, qty: i64 },
        Remove { pick: usize, qty: i64 },
        Delete { pick: usize },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50, proptest::option::of(0u8..5))
                .prop_map(|(qty, expiry_day)| Op::Add { qty, expiry_day }),
            (0usize..8, 0i64..40).prop_map(|(pick, qty)| Op::Edit { pick, qty }),
            (0usize..8, 1i64..40).prop_map(|(pick, qty)| Op::Remove { pick, qty }),
            (0usize..8).prop_map(|pick| Op::Delete { pick }),
        ]
    }

    fn apply(product: &Product, op: &Op, ids: &SequentialIdGenerator) -> DomainResult<Product> {
        let pick = |i: usize| {
            if product.batches.is_empty() {
                BatchId::new("MISSING")
            } else {
                product.batches[i % product.batches.len()].batch_id.clone()
            }
        };
        let pid = product.product_id.clone();
        match *op {
            Op::Add { qty, expiry_day } => {
                let expiry = expiry_day.map(|d| day(2025, 1, 1) + Duration::days(i64::from(d)));
                product
                    .add_stock(&add(product, qty, expiry), ids)
                    .map(|(p, _)| p)
            }
            Op::Edit { pick: i, qty } => product.edit_batch_stock(&EditBatchStock {
                product_id: pid,
                batch_id: pick(i),
                new_quantity: qty,
                occurred_at: t0(),
            }),
            Op::Remove { pick: i, qty } => product.remove_stock_from_batch(&RemoveStockFromBatch {
                product_id: pid,
                batch_id: pick(i),
                quantity: qty,
                occurred_at: t0(),
            }),
            Op::Delete { pick: i } => product.delete_batch(&DeleteBatch {
                product_id: pid,
                batch_id: pick(i),
                occurred_at: t0(),
            }),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 500, .. ProptestConfig::default() })]

        #[test]
        fn total_always_equals_batch_sum(
            legacy_qty in 0i64..30,
            ops in proptest::collection::vec(op_strategy(), 1..40),
        ) {
            let ids = SequentialIdGenerator::new();
            let mut product = legacy(legacy_qty);

            for op in &ops {
                if let Ok(next) = apply(&product, op, &ids) {
                    product = next;
                }
                if product.is_batched() {
                    let sum: i64 = product.batches.iter().map(|b| b.stock_qty).sum();
                    prop_assert_eq!(product.stock_qty, sum);
                    prop_assert!(product.batches.iter().all(|b| b.stock_qty > 0));
                }
            }
        }
    }
}
