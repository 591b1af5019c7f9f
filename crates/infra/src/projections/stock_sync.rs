//! Stocks projection: one flat row per `(product_id, batch_id)`.
//!
//! Products are the system of record. This engine re-projects a single
//! product after each ledger write and offers the maintenance passes
//! (full resync, orphan cleanup, integrity report) that repair drift.
//!
//! Every write carries the product version it was derived from. The store
//! skips a projection older than one it already applied, so a slow sync
//! finishing last cannot bring back rows of a batch a newer version removed.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use stockledger_core::{BatchId, IdGenerator, ProductId};
use stockledger_inventory::{Product, StockRow};

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::store::{
    ProductFilter, ProductProjection, ProductStore, ProjectionMode, StockRowUpsert, StockStore,
};

/// Outcome of a full resync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub products_scanned: u64,
    pub rows_upserted: u64,
    /// Batches ignored because their id was blank.
    pub batches_skipped: u64,
    /// Products already projected from a newer version while the scan ran.
    #[serde(default)]
    pub stale_products_skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Ok,
    IssuesFound,
}

/// Read-only integrity findings. Nothing is repaired while producing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub orphaned_rows: u64,
    /// Products referenced by rows that are absent or soft-deleted.
    pub missing_products: Vec<ProductId>,
    /// Rows whose batch no longer exists on an active product.
    pub stale_batch_rows: u64,
    pub issues: Vec<String>,
    pub status: IntegrityStatus,
}

/// Outcome of `fix_integrity`: cleanup, resync, pruning, then a fresh report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixReport {
    pub orphans_found: u64,
    pub orphans_deleted: u64,
    pub sync: SyncReport,
    pub stale_rows_removed: u64,
    pub integrity: IntegrityReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockStatistics {
    pub total_rows: u64,
    pub rows_with_batches: u64,
    pub orphaned_rows: u64,
    pub unique_products: u64,
}

/// Stocks projection maintainer.
#[derive(Clone)]
pub struct StockSyncEngine<P, S> {
    products: P,
    stocks: S,
    ids: Arc<dyn IdGenerator>,
    config: EngineConfig,
}

impl<P, S> StockSyncEngine<P, S>
where
    P: ProductStore,
    S: StockStore,
{
    pub fn new(products: P, stocks: S, ids: Arc<dyn IdGenerator>, config: EngineConfig) -> Self {
        Self {
            products,
            stocks,
            ids,
            config,
        }
    }

    /// Rows for the given product version; none for legacy or deleted products.
    fn projection_of(&self, product: &Product) -> ProductProjection {
        let rows = if product.deleted || !product.is_batched() {
            Vec::new()
        } else {
            product
                .projected_stocks()
                .into_iter()
                .map(|stock| StockRowUpsert {
                    id_on_insert: self.ids.next_stock_row_id(),
                    stock,
                })
                .collect()
        };
        ProductProjection {
            product_id: product.product_id.clone(),
            version: product.version,
            rows,
        }
    }

    /// Make the product's rows match its current batches.
    ///
    /// Legacy and soft-deleted products end up with no rows. Returns the rows
    /// written; zero when a newer version of the product was already projected.
    #[instrument(skip(self, product), fields(product_id = %product.product_id, version = product.version), err)]
    pub async fn sync_single_product(&self, product: &Product) -> EngineResult<u64> {
        let projection = self.projection_of(product);
        let outcome = self
            .stocks
            .apply_projections(std::slice::from_ref(&projection), ProjectionMode::Replace)
            .await?;

        if !outcome.stale.is_empty() {
            debug!("newer version already projected, skipping");
            return Ok(0);
        }
        debug!(
            removed = outcome.rows_removed,
            written = outcome.rows_written,
            "product re-projected"
        );
        Ok(outcome.rows_written)
    }

    /// Upsert rows for every active product, page by page.
    ///
    /// Idempotent. Rows of products that are no longer returned are left in
    /// place; `cleanup_orphaned_rows` and `validate_integrity` cover those.
    #[instrument(skip(self), fields(page_size = self.config.sync_page_size), err)]
    pub async fn sync_all_products(&self) -> EngineResult<SyncReport> {
        let page_size = self.config.sync_page_size.max(1);
        let filter = ProductFilter::active();
        let mut report = SyncReport::default();
        let mut offset = 0u64;

        loop {
            let page = self.products.scan_products(&filter, offset, page_size).await?;
            let fetched = page.len();

            let mut projections = Vec::with_capacity(fetched);
            for product in &page {
                report.batches_skipped +=
                    product.batches.iter().filter(|b| b.batch_id.is_empty()).count() as u64;
                projections.push(self.projection_of(product));
            }
            let outcome = self
                .stocks
                .apply_projections(&projections, ProjectionMode::Merge)
                .await?;
            report.products_scanned += fetched as u64;
            report.rows_upserted += outcome.rows_written;
            report.stale_products_skipped += outcome.stale.len() as u64;

            debug!(offset, fetched, rows = outcome.rows_written, "synced product page");
            if fetched < page_size {
                break;
            }
            offset += fetched as u64;
        }

        info!(
            products_scanned = report.products_scanned,
            rows_upserted = report.rows_upserted,
            batches_skipped = report.batches_skipped,
            stale_products_skipped = report.stale_products_skipped,
            "full stock sync completed"
        );
        Ok(report)
    }

    /// Re-project every active product that still has rows for batches it no
    /// longer holds. Returns the number of rows deleted.
    #[instrument(skip(self), err)]
    pub async fn prune_stale_batch_rows(&self) -> EngineResult<u64> {
        let mut removed = 0u64;
        for product_id in self.stocks.distinct_product_ids().await? {
            let Some(product) = self
                .products
                .find_product(&product_id)
                .await?
                .filter(|p| !p.deleted)
            else {
                continue;
            };
            let rows = self.stocks.rows_for_product(&product_id).await?;
            if stale_row_count(&product, &rows) == 0 {
                continue;
            }
            let outcome = self
                .stocks
                .apply_projections(&[self.projection_of(&product)], ProjectionMode::Replace)
                .await?;
            removed += outcome.rows_removed;
        }

        if removed > 0 {
            warn!(removed, "removed stock rows of deleted batches");
        }
        Ok(removed)
    }

    /// Delete rows with a missing or blank batch id. Returns the count removed.
    #[instrument(skip(self), err)]
    pub async fn cleanup_orphaned_rows(&self) -> EngineResult<u64> {
        let deleted = self.stocks.delete_orphaned_rows().await?;
        if deleted > 0 {
            warn!(deleted, "removed orphaned stock rows");
        } else {
            info!("no orphaned stock rows found");
        }
        Ok(deleted)
    }

    /// Report orphaned rows, rows whose product is gone, and rows whose batch
    /// is gone.
    #[instrument(skip(self), err)]
    pub async fn validate_integrity(&self) -> EngineResult<IntegrityReport> {
        let orphaned_rows = self.stocks.count_orphaned_rows().await?;
        let mut missing_products = Vec::new();
        let mut stale_batch_rows = 0u64;
        let mut issues = Vec::new();

        if orphaned_rows > 0 {
            issues.push(format!("{orphaned_rows} stock rows have no batch id"));
        }

        for product_id in self.stocks.distinct_product_ids().await? {
            match self.products.find_product(&product_id).await? {
                Some(product) if !product.deleted => {
                    let rows = self.stocks.rows_for_product(&product_id).await?;
                    let stale = stale_row_count(&product, &rows);
                    if stale > 0 {
                        issues.push(format!(
                            "{stale} stock rows reference removed batches of product {product_id}"
                        ));
                        stale_batch_rows += stale;
                    }
                }
                Some(_) => {
                    issues.push(format!("stock rows reference deleted product {product_id}"));
                    missing_products.push(product_id);
                }
                None => {
                    issues.push(format!("stock rows reference non-existent product {product_id}"));
                    missing_products.push(product_id);
                }
            }
        }

        let status = if issues.is_empty() {
            IntegrityStatus::Ok
        } else {
            IntegrityStatus::IssuesFound
        };
        if status == IntegrityStatus::IssuesFound {
            warn!(
                orphaned_rows,
                missing_products = missing_products.len(),
                stale_batch_rows,
                "stock projection integrity issues found"
            );
        }

        Ok(IntegrityReport {
            orphaned_rows,
            missing_products,
            stale_batch_rows,
            issues,
            status,
        })
    }

    /// Count and delete orphans, resync everything, prune rows of removed
    /// batches, then re-validate.
    #[instrument(skip(self), err)]
    pub async fn fix_integrity(&self) -> EngineResult<FixReport> {
        let orphans_found = self.stocks.count_orphaned_rows().await?;
        let orphans_deleted = self.cleanup_orphaned_rows().await?;
        let sync = self.sync_all_products().await?;
        let stale_rows_removed = self.prune_stale_batch_rows().await?;
        let integrity = self.validate_integrity().await?;

        info!(
            orphans_found,
            orphans_deleted,
            stale_rows_removed,
            status = ?integrity.status,
            "stock integrity fix completed"
        );
        Ok(FixReport {
            orphans_found,
            orphans_deleted,
            sync,
            stale_rows_removed,
            integrity,
        })
    }

    pub async fn statistics(&self) -> EngineResult<StockStatistics> {
        let total_rows = self.stocks.count_rows(None).await?;
        let orphaned_rows = self.stocks.count_orphaned_rows().await?;
        let unique_products = self.stocks.distinct_product_ids().await?.len() as u64;

        Ok(StockStatistics {
            total_rows,
            rows_with_batches: total_rows.saturating_sub(orphaned_rows),
            orphaned_rows,
            unique_products,
        })
    }
}

/// Batch rows of `product` whose batch it no longer holds.
fn stale_row_count(product: &Product, rows: &[StockRow]) -> u64 {
    let live: HashSet<&BatchId> = product.batches.iter().map(|b| &b.batch_id).collect();
    rows.iter()
        .filter(|r| !r.is_orphaned())
        .filter(|r| r.batch_id.as_ref().is_some_and(|b| !live.contains(b)))
        .count() as u64
}
