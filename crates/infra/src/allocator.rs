//! FEFO allocation service and sale recording.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use stockledger_core::{IdGenerator, ProductId};
use stockledger_inventory::Allocation;
use stockledger_sales::{NewSale, Sale};

use crate::config::EngineConfig;
use crate::deadline::with_deadline;
use crate::error::EngineResult;
use crate::ledger::{Committed, ProductWriter, SyncWarning};
use crate::projections::StockSyncEngine;
use crate::store::{ProductStore, SaleStore, StockStore};

/// A committed sale together with the stock it consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedSale {
    pub sale: Sale,
    pub allocations: Vec<Allocation>,
    pub sync_warnings: Vec<SyncWarning>,
}

#[derive(Clone)]
pub struct FefoAllocator<P, S, Q> {
    writer: ProductWriter<P, S>,
    sales: Q,
    ids: Arc<dyn IdGenerator>,
}

impl<P, S, Q> FefoAllocator<P, S, Q>
where
    P: ProductStore + Clone,
    S: StockStore + Clone,
    Q: SaleStore,
{
    pub fn new(
        products: P,
        stocks: S,
        sales: Q,
        ids: Arc<dyn IdGenerator>,
        config: EngineConfig,
    ) -> Self {
        let sync = StockSyncEngine::new(products.clone(), stocks, ids.clone(), config.clone());
        Self {
            writer: ProductWriter::new(products, sync, config),
            sales,
            ids,
        }
    }

    /// Deplete `quantity` units of a product, soonest expiry first.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn allocate(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> EngineResult<Committed<Allocation>> {
        with_deadline(
            "allocate",
            self.writer.config().operation_timeout,
            self.allocate_inner(product_id, quantity),
        )
        .await
    }

    async fn allocate_inner(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> EngineResult<Committed<Allocation>> {
        let committed = self
            .writer
            .apply(product_id, |p| p.allocate_fefo(quantity, Utc::now()))
            .await?;
        info!(
            draws = committed.detail.draws.len(),
            stock_qty = committed.product.stock_qty,
            "stock allocated"
        );
        Ok(committed)
    }

    /// Validate and price a sale, allocate every line, then persist the sale.
    ///
    /// Lines are allocated in request order. A failing line stops the sale;
    /// lines allocated before it stay committed.
    #[instrument(skip(self, request), fields(items = request.items.len()), err)]
    pub async fn record_sale(&self, request: &NewSale) -> EngineResult<RecordedSale> {
        with_deadline("record_sale", self.writer.config().operation_timeout, async {
            let sale = Sale::from_request(self.ids.next_sale_id(), request)?;

            let mut allocations = Vec::with_capacity(sale.items.len());
            let mut sync_warnings = Vec::new();
            for (line, item) in sale.items.iter().enumerate() {
                let committed = match self.allocate_inner(&item.product_id, item.quantity).await {
                    Ok(committed) => committed,
                    Err(err) => {
                        if line > 0 {
                            warn!(
                                sale_id = %sale.sale_id,
                                failed_line = line,
                                product_id = %item.product_id,
                                "sale aborted after earlier lines were allocated"
                            );
                        }
                        return Err(err);
                    }
                };
                sync_warnings.extend(committed.sync_warning);
                allocations.push(committed.detail);
            }

            self.sales.insert_sale(&sale).await?;
            info!(sale_id = %sale.sale_id, total = %sale.total, "sale recorded");
            Ok(RecordedSale {
                sale,
                allocations,
                sync_warnings,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use rust_decimal::Decimal;

    use stockledger_core::{BatchId, SequentialIdGenerator};
    use stockledger_inventory::{Batch, Product};
    use stockledger_sales::{DiscountType, NewSaleItem, PaymentMethod};

    use crate::error::EngineError;
    use crate::store::InMemoryStore;

    type Allocator = FefoAllocator<Arc<InMemoryStore>, Arc<InMemoryStore>, Arc<InMemoryStore>>;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 1, 10, 0, 0).unwrap()
    }

    fn setup() -> (Arc<InMemoryStore>, Allocator) {
        let store = Arc::new(InMemoryStore::new());
        let allocator = FefoAllocator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(SequentialIdGenerator::new()),
            EngineConfig::default(),
        );
        (store, allocator)
    }

    async fn seed_batched(store: &InMemoryStore, id: &str, batches: Vec<(&str, i64, Option<DateTime<Utc>>)>) {
        let mut product = Product::legacy(ProductId::new(id), id, 0, None, at());
        product.batches = batches
            .into_iter()
            .map(|(b, qty, expiry)| Batch::new(BatchId::new(b), qty, expiry, Decimal::ONE, Decimal::new(3, 0), at()))
            .collect();
        product.stock_qty = product.batches.iter().map(|b| b.stock_qty).sum();
        store.insert_product(&product).await.unwrap();
    }

    fn sale_of(items: Vec<(&str, i64)>) -> NewSale {
        NewSale {
            customer_name: Some("Walk-in".into()),
            mobile_number: None,
            items: items
                .into_iter()
                .map(|(p, q)| NewSaleItem {
                    product_id: ProductId::new(p),
                    product_name: p.to_string(),
                    quantity: q,
                    unit_price: Decimal::new(3, 0),
                })
                .collect(),
            tax_percentage: Decimal::ZERO,
            discount: Decimal::ZERO,
            discount_type: DiscountType::Fixed,
            payment_method: PaymentMethod::Cash,
            amount_received: Some(Decimal::new(100, 0)),
            occurred_at: at(),
        }
    }

    #[tokio::test]
    async fn allocation_persists_and_resyncs_rows() {
        let (store, allocator) = setup();
        let jan1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        seed_batched(&store, "P1", vec![("A", 10, None), ("B", 5, Some(jan1))]).await;

        let committed = allocator.allocate(&ProductId::new("P1"), 12).await.unwrap();

        assert_eq!(committed.product.stock_qty, 3);
        assert_eq!(committed.detail.draws[0].batch_id.as_str(), "B");
        let rows = store.rows_for_product(&ProductId::new("P1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].batch_id, Some(BatchId::new("A")));
        assert_eq!(rows[0].stock_qty, 3);
    }

    #[tokio::test]
    async fn insufficient_stock_changes_nothing() {
        let (store, allocator) = setup();
        seed_batched(&store, "P1", vec![("A", 2, None)]).await;

        let result = allocator.allocate(&ProductId::new("P1"), 3).await;

        assert!(matches!(result, Err(EngineError::FailedPrecondition(_))));
        let stored = store.find_product(&ProductId::new("P1")).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.stock_qty, 2);
    }

    #[tokio::test]
    async fn sale_allocates_every_line_and_is_stored() {
        let (store, allocator) = setup();
        seed_batched(&store, "P1", vec![("A", 5, None)]).await;
        seed_batched(&store, "P2", vec![("B", 5, None)]).await;

        let recorded = allocator.record_sale(&sale_of(vec![("P1", 2), ("P2", 5)])).await.unwrap();

        assert_eq!(recorded.allocations.len(), 2);
        assert_eq!(recorded.sale.total, Decimal::new(21, 0));
        assert_eq!(recorded.sale.change, Some(Decimal::new(79, 0)));
        let stored = store.sales_between(at(), at() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(stored.len(), 1);
        let p2 = store.find_product(&ProductId::new("P2")).await.unwrap().unwrap();
        assert_eq!(p2.stock_qty, 0);
        assert!(p2.batches.is_empty());
    }

    #[tokio::test]
    async fn failing_line_keeps_earlier_lines_and_drops_the_sale() {
        let (store, allocator) = setup();
        seed_batched(&store, "P1", vec![("A", 5, None)]).await;
        seed_batched(&store, "P2", vec![("B", 1, None)]).await;

        let result = allocator.record_sale(&sale_of(vec![("P1", 2), ("P2", 4)])).await;

        assert!(matches!(result, Err(EngineError::FailedPrecondition(_))));
        let p1 = store.find_product(&ProductId::new("P1")).await.unwrap().unwrap();
        assert_eq!(p1.stock_qty, 3);
        let p2 = store.find_product(&ProductId::new("P2")).await.unwrap().unwrap();
        assert_eq!(p2.stock_qty, 1);
        let stored = store.sales_between(at(), at() + chrono::Duration::seconds(1)).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn invalid_sale_is_rejected_before_any_allocation() {
        let (store, allocator) = setup();
        seed_batched(&store, "P1", vec![("A", 5, None)]).await;

        let result = allocator.record_sale(&sale_of(vec![("P1", 2), ("P1", 0)])).await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));

        let empty = allocator.record_sale(&sale_of(vec![])).await;
        assert!(matches!(empty, Err(EngineError::InvalidArgument(_))));

        let p1 = store.find_product(&ProductId::new("P1")).await.unwrap().unwrap();
        assert_eq!(p1.stock_qty, 5);
    }
}
