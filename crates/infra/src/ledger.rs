//! Persisted batch ledger.
//!
//! Each mutation reads the product, applies a pure ledger rule, and writes the
//! whole document back with `ExpectedVersion::Exact`. A concurrent writer makes
//! the write fail with a conflict; the read-compute-write cycle is then retried
//! up to `max_conflict_retries` times. After a successful write the product is
//! re-projected into Stocks on a best-effort basis.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use stockledger_core::{
    BatchId, DomainResult, ExpectedVersion, IdGenerator, ProductId,
};
use stockledger_inventory::{
    AddStock, CreateProduct, DeleteBatch, EditBatchDetails, EditBatchStock, Product,
    RemoveStockFromBatch,
};

use crate::config::EngineConfig;
use crate::deadline::with_deadline;
use crate::error::{EngineError, EngineResult};
use crate::projections::StockSyncEngine;
use crate::store::{ProductStore, StockStore, StoreError};

/// A projection sync that failed after the product write had committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncWarning {
    pub product_id: ProductId,
    pub message: String,
}

/// Result of a committed product mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    /// Product as stored, with its new version.
    pub product: Product,
    pub detail: T,
    /// Set when the Stocks projection may be stale for this product.
    pub sync_warning: Option<SyncWarning>,
}

/// Shared write path of the ledger and the allocator.
#[derive(Clone)]
pub(crate) struct ProductWriter<P, S> {
    products: P,
    sync: StockSyncEngine<P, S>,
    config: EngineConfig,
}

impl<P, S> ProductWriter<P, S>
where
    P: ProductStore,
    S: StockStore,
{
    pub(crate) fn new(products: P, sync: StockSyncEngine<P, S>, config: EngineConfig) -> Self {
        Self {
            products,
            sync,
            config,
        }
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) async fn load_active(&self, product_id: &ProductId) -> EngineResult<Product> {
        self.products
            .find_product(product_id)
            .await?
            .filter(|p| !p.deleted)
            .ok_or_else(|| EngineError::NotFound(format!("product {product_id} not found")))
    }

    /// Project a freshly written product; failures become a warning.
    pub(crate) async fn sync_best_effort(&self, product: &Product) -> Option<SyncWarning> {
        match self.sync.sync_single_product(product).await {
            Ok(_) => None,
            Err(err) => {
                warn!(
                    product_id = %product.product_id,
                    error = %err,
                    "stock projection sync failed after committed write"
                );
                Some(SyncWarning {
                    product_id: product.product_id.clone(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Read, apply `rule`, conditionally write, sync. Retries on conflict.
    pub(crate) async fn apply<T, F>(
        &self,
        product_id: &ProductId,
        rule: F,
    ) -> EngineResult<Committed<T>>
    where
        F: Fn(&Product) -> DomainResult<(Product, T)> + Send + Sync,
        T: Send,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let current = self.load_active(product_id).await?;
            let (next, detail) = rule(&current)?;

            match self
                .products
                .save_product(&next, ExpectedVersion::Exact(current.version))
                .await
            {
                Ok(stored) => {
                    let sync_warning = self.sync_best_effort(&stored).await;
                    return Ok(Committed {
                        product: stored,
                        detail,
                        sync_warning,
                    });
                }
                Err(StoreError::Conflict(msg)) if attempt <= self.config.max_conflict_retries => {
                    debug!(%product_id, attempt, %msg, "version conflict, retrying");
                }
                Err(err) => {
                    if matches!(err, StoreError::Conflict(_)) {
                        warn!(%product_id, attempt, "giving up after repeated version conflicts");
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

/// Batch ledger service.
#[derive(Clone)]
pub struct BatchLedger<P, S> {
    writer: ProductWriter<P, S>,
    ids: Arc<dyn IdGenerator>,
}

impl<P, S> BatchLedger<P, S>
where
    P: ProductStore + Clone,
    S: StockStore + Clone,
{
    pub fn new(products: P, stocks: S, ids: Arc<dyn IdGenerator>, config: EngineConfig) -> Self {
        let sync = StockSyncEngine::new(products.clone(), stocks, ids.clone(), config.clone());
        Self {
            writer: ProductWriter::new(products, sync, config),
            ids,
        }
    }

    fn timeout(&self) -> std::time::Duration {
        self.writer.config().operation_timeout
    }

    /// Create a product (zero or one initial batch) and project it.
    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id), err)]
    pub async fn create_product(&self, cmd: &CreateProduct) -> EngineResult<Committed<()>> {
        with_deadline("create_product", self.timeout(), async {
            let product = Product::create(cmd, self.ids.as_ref())?;
            let stored = self.writer.products.insert_product(&product).await?;
            let sync_warning = self.writer.sync_best_effort(&stored).await;
            info!(stock_qty = stored.stock_qty, "product created");
            Ok(Committed {
                product: stored,
                detail: (),
                sync_warning,
            })
        })
        .await
    }

    /// Add stock, merging into the batch with the same expiry day or opening a
    /// new one. `detail` is the receiving batch.
    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, quantity = cmd.quantity), err)]
    pub async fn add_stock(&self, cmd: &AddStock) -> EngineResult<Committed<BatchId>> {
        let ids = self.ids.clone();
        with_deadline("add_stock", self.timeout(), async {
            let committed = self
                .writer
                .apply(&cmd.product_id, |p| p.add_stock(cmd, ids.as_ref()))
                .await?;
            info!(batch_id = %committed.detail, stock_qty = committed.product.stock_qty, "stock added");
            Ok(committed)
        })
        .await
    }

    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product_id, batch_id = %cmd.batch_id, new_quantity = cmd.new_quantity),
        err
    )]
    pub async fn edit_batch_stock(&self, cmd: &EditBatchStock) -> EngineResult<Committed<()>> {
        with_deadline("edit_batch_stock", self.timeout(), async {
            self.writer
                .apply(&cmd.product_id, |p| Ok((p.edit_batch_stock(cmd)?, ())))
                .await
        })
        .await
    }

    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, batch_id = %cmd.batch_id), err)]
    pub async fn edit_batch_details(&self, cmd: &EditBatchDetails) -> EngineResult<Committed<()>> {
        with_deadline("edit_batch_details", self.timeout(), async {
            self.writer
                .apply(&cmd.product_id, |p| Ok((p.edit_batch_details(cmd)?, ())))
                .await
        })
        .await
    }

    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product_id, batch_id = %cmd.batch_id, quantity = cmd.quantity),
        err
    )]
    pub async fn remove_stock_from_batch(
        &self,
        cmd: &RemoveStockFromBatch,
    ) -> EngineResult<Committed<()>> {
        with_deadline("remove_stock_from_batch", self.timeout(), async {
            self.writer
                .apply(&cmd.product_id, |p| Ok((p.remove_stock_from_batch(cmd)?, ())))
                .await
        })
        .await
    }

    #[instrument(skip(self, cmd), fields(product_id = %cmd.product_id, batch_id = %cmd.batch_id), err)]
    pub async fn delete_batch(&self, cmd: &DeleteBatch) -> EngineResult<Committed<()>> {
        with_deadline("delete_batch", self.timeout(), async {
            self.writer
                .apply(&cmd.product_id, |p| Ok((p.delete_batch(cmd)?, ())))
                .await
        })
        .await
    }

    /// Soft-delete a product; its Stocks rows are removed by the sync.
    #[instrument(skip(self), fields(product_id = %product_id), err)]
    pub async fn soft_delete_product(&self, product_id: &ProductId) -> EngineResult<Committed<()>> {
        with_deadline("soft_delete_product", self.timeout(), async {
            self.writer
                .apply(product_id, |p| {
                    let mut next = p.clone();
                    next.deleted = true;
                    next.updated_at = chrono::Utc::now();
                    Ok((next, ()))
                })
                .await
        })
        .await
    }

    pub async fn find_product(&self, product_id: &ProductId) -> EngineResult<Product> {
        self.writer.load_active(product_id).await
    }
}
