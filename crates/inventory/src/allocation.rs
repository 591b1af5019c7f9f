//! FEFO (first-expires-first-out) allocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BatchId, DomainError, DomainResult, ProductId};

use crate::product::Product;

/// Quantity drawn from one batch by an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDraw {
    pub batch_id: BatchId,
    pub taken: i64,
    /// Quantity left in the batch; zero means the batch was dropped.
    pub remaining: i64,
}

/// Outcome of a FEFO allocation against one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub product_id: ProductId,
    pub requested: i64,
    pub draws: Vec<BatchDraw>,
    /// True when the scalar stock of an unbatched product was decremented.
    pub legacy: bool,
}

impl Product {
    /// Deplete `quantity` units, soonest-expiring batch first.
    ///
    /// Batches without an expiry date go last; equal expiries keep array order.
    /// Persisted batch order is preserved, only consumed batches are removed.
    /// Fails `FailedPrecondition` without changes when stock is insufficient.
    pub fn allocate_fefo(
        &self,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> DomainResult<(Product, Allocation)> {
        self.ensure_active()?;
        if quantity <= 0 {
            return Err(DomainError::invalid_argument(format!(
                "allocation quantity must be positive, got {quantity}"
            )));
        }

        let available = self.total_stock();
        if quantity > available {
            return Err(DomainError::insufficient_stock(quantity, available));
        }

        let mut next = self.clone();

        if !self.is_batched() {
            next.stock_qty -= quantity;
            next.updated_at = at;
            let allocation = Allocation {
                product_id: self.product_id.clone(),
                requested: quantity,
                draws: Vec::new(),
                legacy: true,
            };
            return Ok((next, allocation));
        }

        let mut order: Vec<usize> = (0..next.batches.len()).collect();
        order.sort_by_key(|&i| {
            let expiry = next.batches[i].expiry_date;
            (expiry.is_none(), expiry)
        });

        let mut remaining = quantity;
        let mut draws = Vec::new();
        for i in order {
            if remaining == 0 {
                break;
            }
            let batch = &mut next.batches[i];
            let taken = remaining.min(batch.stock_qty);
            if taken == 0 {
                continue;
            }
            batch.stock_qty -= taken;
            batch.updated_at = at;
            remaining -= taken;
            draws.push(BatchDraw {
                batch_id: batch.batch_id.clone(),
                taken,
                remaining: batch.stock_qty,
            });
        }

        if remaining > 0 {
            return Err(DomainError::insufficient_stock(quantity, quantity - remaining));
        }

        next.settle(at);
        let allocation = Allocation {
            product_id: self.product_id.clone(),
            requested: quantity,
            draws,
            legacy: false,
        };
        Ok((next, allocation))
    }
}
